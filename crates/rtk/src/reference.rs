//! Thread references and thread queues.
//!
//! The low-level building blocks for custom primitives: a reference holds at
//! most one suspended thread, a queue holds any number in FIFO order.

use std::fmt;
use std::sync::Arc;

use rtk_core::{Interval, Msg, MSG_TIMEOUT};

use crate::arena::arena_key;
use crate::kernel::{Handle, Kernel, Sys};
use crate::list::ThreadQueue;
use crate::state::KernelState;
use crate::thread::State;

arena_key! {
    pub(crate) struct RefKey;
}

arena_key! {
    pub(crate) struct QueueKey;
}

/// Slot for a single suspended thread.
#[derive(Clone)]
pub struct ThreadReference {
    handle: Arc<Handle<RefKey>>,
}

impl fmt::Debug for ThreadReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadReference").field(&self.handle.key()).finish()
    }
}

impl ThreadReference {
    pub fn new(kernel: &Kernel) -> Self {
        let key = match kernel.lock_state().refs.insert(None) {
            Some(key) => key,
            None => unreachable!("reference arena has no limit"),
        };
        Self {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    /// Suspends the caller in this reference until resumed.
    pub fn suspend(&self) -> Msg {
        self.suspend_timeout(Interval::INFINITE)
    }

    /// Suspends the caller for at most `timeout`. Returns the message given
    /// to [`resume`](Self::resume), or `MSG_TIMEOUT`.
    pub fn suspend_timeout(&self, timeout: Interval) -> Msg {
        if timeout.is_immediate() {
            return MSG_TIMEOUT;
        }
        let mut guard = self.handle.kernel().lock_s();
        let me = guard.me;
        let r = self.handle.key();
        let st = &mut *guard.st;
        if st.refs[r].is_some() {
            st.fatal(format!("thread reference {r:?} already in use"));
        }
        st.refs[r] = Some(me);
        guard.go_sleep_timeout(State::Suspended(r), timeout)
    }

    /// Resumes the suspended thread, if any, with `msg`.
    pub fn resume(&self, msg: Msg) {
        self.handle.kernel().lock(|cs| self.resume_i(cs, msg));
    }

    /// I-class [`resume`](Self::resume).
    pub fn resume_i(&self, cs: &mut Sys<'_>, msg: Msg) {
        let st = cs.state_for(self.handle.uid());
        if let Some(t) = st.refs[self.handle.key()].take() {
            st.wake_i(t, msg);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handle.kernel().lock_state().refs[self.handle.key()].is_none()
    }
}

/// FIFO of suspended threads.
#[derive(Clone)]
pub struct ThreadsQueue {
    handle: Arc<Handle<QueueKey>>,
}

impl fmt::Debug for ThreadsQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadsQueue").field(&self.handle.key()).finish()
    }
}

impl ThreadsQueue {
    pub fn new(kernel: &Kernel) -> Self {
        let key = match kernel.lock_state().queues.insert(ThreadQueue::EMPTY) {
            Some(key) => key,
            None => unreachable!("thread queue arena has no limit"),
        };
        Self {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    /// Enqueues the caller for at most `timeout`.
    pub fn enqueue_timeout(&self, timeout: Interval) -> Msg {
        if timeout.is_immediate() {
            return MSG_TIMEOUT;
        }
        let mut guard = self.handle.kernel().lock_s();
        let me = guard.me;
        let q = self.handle.key();
        let st = &mut *guard.st;
        st.queues[q].push_back(&mut st.threads, me);
        guard.go_sleep_timeout(State::WaitQueue(q), timeout)
    }

    /// Wakes the oldest waiter with `msg`.
    pub fn dequeue_next_i(&self, cs: &mut Sys<'_>, msg: Msg) {
        let st = cs.state_for(self.handle.uid());
        if let Some(t) = st.queues[self.handle.key()].pop_front(&mut st.threads) {
            st.wake_i(t, msg);
        }
    }

    /// Wakes every waiter with `msg`.
    pub fn dequeue_all_i(&self, cs: &mut Sys<'_>, msg: Msg) {
        let st = cs.state_for(self.handle.uid());
        let q = self.handle.key();
        while let Some(t) = st.queues[q].pop_front(&mut st.threads) {
            st.wake_i(t, msg);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handle.kernel().lock_state().queues[self.handle.key()].is_empty()
    }
}

impl KernelState {
    pub(crate) fn dispose_threads_queue(&mut self, q: QueueKey) {
        if let Some(queue) = self.queues.remove(q) {
            debug_assert!(queue.is_empty(), "thread queue dropped with waiters");
        }
    }
}
