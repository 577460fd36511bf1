//! Mailboxes.
//!
//! A mailbox holds up to `N` messages. One semaphore counts free slots and
//! another counts posted messages, so posting to a full mailbox and fetching
//! from an empty one both block on an ordinary semaphore wait and honour
//! timeouts and resets the same way.

use core::fmt;

use heapless::Deque;
use log::trace;
use rtk::{Interval, Kernel, Semaphore, Status, Sys};

/// A message that could not be posted, handed back with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected<T> {
    pub status: Status,
    pub msg: T,
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message not posted: {}", self.status)
    }
}

/// Bounded FIFO of `N` messages.
pub struct Mailbox<T, const N: usize> {
    kernel: Kernel,
    buffer: spin::Mutex<Deque<T, N>>,
    free: Semaphore,
    used: Semaphore,
}

impl<T, const N: usize> fmt::Debug for Mailbox<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("capacity", &N)
            .field("used", &self.used_count())
            .finish()
    }
}

impl<T, const N: usize> Mailbox<T, N> {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel: kernel.clone(),
            buffer: spin::Mutex::new(Deque::new()),
            free: Semaphore::new(kernel, N as isize),
            used: Semaphore::new(kernel, 0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Posts `msg` at the back, waiting for a free slot as long as needed.
    pub fn post(&self, msg: T) -> Result<(), Rejected<T>> {
        self.post_timeout(msg, Interval::INFINITE)
    }

    /// Posts `msg` at the back, waiting at most `timeout` for a free slot.
    pub fn post_timeout(&self, msg: T, timeout: Interval) -> Result<(), Rejected<T>> {
        self.post_with(msg, timeout, false)
    }

    /// Posts `msg` at the front so it is fetched next.
    pub fn post_ahead(&self, msg: T) -> Result<(), Rejected<T>> {
        self.post_ahead_timeout(msg, Interval::INFINITE)
    }

    pub fn post_ahead_timeout(&self, msg: T, timeout: Interval) -> Result<(), Rejected<T>> {
        self.post_with(msg, timeout, true)
    }

    /// Posts from interrupt context. Fails with `WouldBlock` when full.
    pub fn try_post_i(&self, cs: &mut Sys<'_>, msg: T) -> Result<(), Rejected<T>> {
        match self.free.try_wait_i(cs) {
            Status::Ok => self.store_i(cs, msg, false),
            status => Err(Rejected { status, msg }),
        }
    }

    pub fn try_post_ahead_i(&self, cs: &mut Sys<'_>, msg: T) -> Result<(), Rejected<T>> {
        match self.free.try_wait_i(cs) {
            Status::Ok => self.store_i(cs, msg, true),
            status => Err(Rejected { status, msg }),
        }
    }

    /// Takes the oldest message, waiting as long as needed.
    pub fn fetch(&self) -> Result<T, Status> {
        self.fetch_timeout(Interval::INFINITE)
    }

    /// Takes the oldest message, waiting at most `timeout`.
    pub fn fetch_timeout(&self, timeout: Interval) -> Result<T, Status> {
        match self.used.wait_timeout(timeout) {
            Status::Ok => self.kernel.lock(|cs| self.take_i(cs)),
            status => Err(status),
        }
    }

    /// Takes the oldest message from interrupt context.
    pub fn try_fetch_i(&self, cs: &mut Sys<'_>) -> Result<T, Status> {
        match self.used.try_wait_i(cs) {
            Status::Ok => self.take_i(cs),
            status => Err(status),
        }
    }

    /// Drops every queued message. Blocked posters and fetchers wake up
    /// with `Reset`.
    pub fn reset(&self) {
        self.kernel.lock(|cs| self.reset_i(cs));
    }

    pub fn reset_i(&self, cs: &mut Sys<'_>) {
        let dropped = {
            let mut buffer = self.buffer.lock();
            let n = buffer.len();
            buffer.clear();
            n
        };
        self.free.reset_i(cs, N as isize);
        self.used.reset_i(cs, 0);
        trace!("mailbox reset, {dropped} messages dropped");
    }

    /// Messages waiting to be fetched.
    pub fn used_count(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Slots still free.
    pub fn free_count(&self) -> usize {
        N - self.used_count()
    }

    fn post_with(&self, msg: T, timeout: Interval, ahead: bool) -> Result<(), Rejected<T>> {
        match self.free.wait_timeout(timeout) {
            Status::Ok => self.kernel.lock(|cs| self.store_i(cs, msg, ahead)),
            status => Err(Rejected { status, msg }),
        }
    }

    fn store_i(&self, cs: &mut Sys<'_>, msg: T, ahead: bool) -> Result<(), Rejected<T>> {
        let stored = {
            let mut buffer = self.buffer.lock();
            if ahead {
                buffer.push_front(msg)
            } else {
                buffer.push_back(msg)
            }
        };
        match stored {
            Ok(()) => {
                self.used.signal_i(cs);
                Ok(())
            }
            // The slot was taken back by a reset after our wait succeeded.
            Err(msg) => Err(Rejected {
                status: Status::Reset,
                msg,
            }),
        }
    }

    fn take_i(&self, cs: &mut Sys<'_>) -> Result<T, Status> {
        let msg = self.buffer.lock().pop_front();
        match msg {
            Some(msg) => {
                self.free.signal_i(cs);
                Ok(msg)
            }
            None => Err(Status::Reset),
        }
    }
}
