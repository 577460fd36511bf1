//! Byte queues between interrupt handlers and threads.
//!
//! An [`InputQueue`] is filled by an interrupt handler with
//! [`put_i`](InputQueue::put_i) and drained by a thread that blocks while it
//! is empty. An [`OutputQueue`] is the mirror image: a thread writes and
//! blocks while it is full, an interrupt handler drains it with
//! [`get_i`](OutputQueue::get_i).
//!
//! Both sides can carry a [`Notify`] callback, run inside the critical
//! section after each byte moves, typically to start or stop a transmitter.

use core::fmt;

use heapless::Deque;
use rtk::{Interval, Kernel, Semaphore, Status, Sys};

/// Called with the fill level after every byte put or taken.
pub type Notify = Box<dyn Fn(&mut Sys<'_>, usize) + Send + Sync>;

struct Buffer<const N: usize> {
    bytes: spin::Mutex<Deque<u8, N>>,
    notify: Option<Notify>,
}

impl<const N: usize> Buffer<N> {
    fn new() -> Self {
        Self {
            bytes: spin::Mutex::new(Deque::new()),
            notify: None,
        }
    }

    fn push_i(&self, cs: &mut Sys<'_>, byte: u8) -> bool {
        let level = {
            let mut bytes = self.bytes.lock();
            if bytes.push_back(byte).is_err() {
                return false;
            }
            bytes.len()
        };
        self.notify_i(cs, level);
        true
    }

    fn pop_i(&self, cs: &mut Sys<'_>) -> Option<u8> {
        let (byte, level) = {
            let mut bytes = self.bytes.lock();
            (bytes.pop_front()?, bytes.len())
        };
        self.notify_i(cs, level);
        Some(byte)
    }

    fn notify_i(&self, cs: &mut Sys<'_>, level: usize) {
        if let Some(notify) = &self.notify {
            notify(cs, level);
        }
    }

    fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    fn clear(&self) {
        self.bytes.lock().clear();
    }
}

/// Interrupt-to-thread byte queue of capacity `N`.
pub struct InputQueue<const N: usize> {
    kernel: Kernel,
    buffer: Buffer<N>,
    /// Counts the bytes a reader may take.
    filled: Semaphore,
}

impl<const N: usize> fmt::Debug for InputQueue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputQueue")
            .field("capacity", &N)
            .field("len", &self.len())
            .finish()
    }
}

impl<const N: usize> InputQueue<N> {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel: kernel.clone(),
            buffer: Buffer::new(),
            filled: Semaphore::new(kernel, 0),
        }
    }

    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(&mut Sys<'_>, usize) + Send + Sync + 'static,
    {
        self.buffer.notify = Some(Box::new(notify));
        self
    }

    /// Appends a byte from interrupt context. `WouldBlock` when full.
    pub fn put_i(&self, cs: &mut Sys<'_>, byte: u8) -> Status {
        if !self.buffer.push_i(cs, byte) {
            return Status::WouldBlock;
        }
        self.filled.signal_i(cs);
        Status::Ok
    }

    pub fn get(&self) -> Result<u8, Status> {
        self.get_timeout(Interval::INFINITE)
    }

    /// Takes the oldest byte, waiting at most `timeout` for one to arrive.
    pub fn get_timeout(&self, timeout: Interval) -> Result<u8, Status> {
        match self.filled.wait_timeout(timeout) {
            Status::Ok => self
                .kernel
                .lock(|cs| self.buffer.pop_i(cs))
                .ok_or(Status::Reset),
            status => Err(status),
        }
    }

    /// Fills `buf`, waiting at most `timeout` for each byte. Returns how
    /// many bytes were read; fewer than `buf.len()` means a wait failed.
    pub fn read(&self, buf: &mut [u8], timeout: Interval) -> usize {
        for (n, slot) in buf.iter_mut().enumerate() {
            match self.get_timeout(timeout) {
                Ok(byte) => *slot = byte,
                Err(_) => return n,
            }
        }
        buf.len()
    }

    /// Discards the buffered bytes. Blocked readers wake up with `Reset`.
    pub fn reset(&self) {
        self.kernel.lock(|cs| self.reset_i(cs));
    }

    pub fn reset_i(&self, cs: &mut Sys<'_>) {
        self.buffer.clear();
        self.filled.reset_i(cs, 0);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }
}

/// Thread-to-interrupt byte queue of capacity `N`.
pub struct OutputQueue<const N: usize> {
    kernel: Kernel,
    buffer: Buffer<N>,
    /// Counts the bytes a writer may add.
    space: Semaphore,
}

impl<const N: usize> fmt::Debug for OutputQueue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputQueue")
            .field("capacity", &N)
            .field("len", &self.len())
            .finish()
    }
}

impl<const N: usize> OutputQueue<N> {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel: kernel.clone(),
            buffer: Buffer::new(),
            space: Semaphore::new(kernel, N as isize),
        }
    }

    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(&mut Sys<'_>, usize) + Send + Sync + 'static,
    {
        self.buffer.notify = Some(Box::new(notify));
        self
    }

    pub fn put(&self, byte: u8) -> Status {
        self.put_timeout(byte, Interval::INFINITE)
    }

    /// Appends a byte, waiting at most `timeout` for room.
    pub fn put_timeout(&self, byte: u8, timeout: Interval) -> Status {
        match self.space.wait_timeout(timeout) {
            Status::Ok => {
                if self.kernel.lock(|cs| self.buffer.push_i(cs, byte)) {
                    Status::Ok
                } else {
                    Status::Reset
                }
            }
            status => status,
        }
    }

    /// Writes all of `buf`, waiting at most `timeout` for each byte.
    /// Returns how many bytes were queued.
    pub fn write(&self, buf: &[u8], timeout: Interval) -> usize {
        for (n, &byte) in buf.iter().enumerate() {
            if !self.put_timeout(byte, timeout).is_ok() {
                return n;
            }
        }
        buf.len()
    }

    /// Takes the oldest byte from interrupt context.
    pub fn get_i(&self, cs: &mut Sys<'_>) -> Result<u8, Status> {
        let byte = self.buffer.pop_i(cs).ok_or(Status::WouldBlock)?;
        self.space.signal_i(cs);
        Ok(byte)
    }

    /// Discards the buffered bytes. Blocked writers wake up with `Reset`.
    pub fn reset(&self) {
        self.kernel.lock(|cs| self.reset_i(cs));
    }

    pub fn reset_i(&self, cs: &mut Sys<'_>) {
        self.buffer.clear();
        self.space.reset_i(cs, N as isize);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }
}
