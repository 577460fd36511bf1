//! Counting and binary semaphores.
//!
//! Waiters are served strictly in arrival order, whatever their priority.
//! A negative count is the number of queued waiters.

use std::fmt;
use std::sync::Arc;

use rtk_core::{Interval, Status, MSG_OK, MSG_RESET};

use crate::arena::arena_key;
use crate::kernel::{Handle, Kernel, Sys, SysGuard};
use crate::list::ThreadQueue;
use crate::state::KernelState;
use crate::thread::State;

arena_key! {
    pub(crate) struct SemKey;
}

pub(crate) struct SemCb {
    pub(crate) count: isize,
    pub(crate) queue: ThreadQueue,
}

/// Counting semaphore.
#[derive(Clone)]
pub struct Semaphore {
    handle: Arc<Handle<SemKey>>,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Semaphore").field(&self.handle.key()).finish()
    }
}

impl Semaphore {
    /// A semaphore with `count` initial permits. `count` must not be
    /// negative.
    pub fn new(kernel: &Kernel, count: isize) -> Self {
        let mut st = kernel.lock_state();
        if count < 0 {
            st.fatal(format!("semaphore created with count {count}"));
        }
        let cb = SemCb {
            count,
            queue: ThreadQueue::EMPTY,
        };
        let key = match st.sems.insert(cb) {
            Some(key) => key,
            None => unreachable!("semaphore arena has no limit"),
        };
        drop(st);
        Self {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    fn key(&self) -> SemKey {
        self.handle.key()
    }

    fn kernel(&self) -> &Kernel {
        self.handle.kernel()
    }

    pub fn wait(&self) -> Status {
        self.wait_timeout(Interval::INFINITE)
    }

    /// Takes a permit, blocking for at most `timeout`. `Timeout` if none
    /// came in time, `Reset` if the semaphore was reset meanwhile.
    pub fn wait_timeout(&self, timeout: Interval) -> Status {
        let mut guard = self.kernel().lock_s();
        guard.sem_wait(self.key(), timeout)
    }

    /// Takes a permit only if one is available.
    pub fn try_wait(&self) -> Status {
        self.kernel().lock(|cs| self.try_wait_i(cs))
    }

    /// I-class [`try_wait`](Self::try_wait).
    pub fn try_wait_i(&self, cs: &mut Sys<'_>) -> Status {
        let sem = &mut cs.state_for(self.handle.uid()).sems[self.key()];
        if sem.count > 0 {
            sem.count -= 1;
            Status::Ok
        } else {
            Status::WouldBlock
        }
    }

    /// Adds a permit, waking the longest waiter if there is one.
    pub fn signal(&self) {
        self.kernel().lock(|cs| self.signal_i(cs));
    }

    /// I-class [`signal`](Self::signal).
    pub fn signal_i(&self, cs: &mut Sys<'_>) {
        cs.state_for(self.handle.uid()).sem_signal_i(self.key());
    }

    /// Adds `n` permits at once.
    pub fn add_count_i(&self, cs: &mut Sys<'_>, n: usize) {
        let st = cs.state_for(self.handle.uid());
        for _ in 0..n {
            st.sem_signal_i(self.key());
        }
    }

    /// Wakes every waiter with `Reset` and sets the count to `count`.
    pub fn reset(&self, count: isize) {
        self.kernel().lock(|cs| self.reset_i(cs, count));
    }

    /// I-class [`reset`](Self::reset).
    pub fn reset_i(&self, cs: &mut Sys<'_>, count: isize) {
        let st = cs.state_for(self.handle.uid());
        if count < 0 {
            st.fatal(format!("semaphore reset to count {count}"));
        }
        let s = self.key();
        st.sems[s].count = count;
        while let Some(t) = st.sems[s].queue.pop_front(&mut st.threads) {
            st.wake_i(t, MSG_RESET);
        }
    }

    /// Current count; negative values count the waiters.
    pub fn count(&self) -> isize {
        self.kernel().lock_state().sems[self.key()].count
    }

    /// Signals `signal` and waits on `wait` in one atomic step.
    pub fn signal_wait(signal: &Semaphore, wait: &Semaphore) -> Status {
        let mut guard = wait.kernel().lock_s();
        if signal.handle.uid() != wait.handle.uid() {
            guard.st.fatal("signal_wait across kernels");
        }
        guard.st.sem_signal_i(signal.key());
        guard.sem_wait(wait.key(), Interval::INFINITE)
    }
}

/// Semaphore with at most one permit.
#[derive(Debug, Clone)]
pub struct BinarySemaphore {
    sem: Semaphore,
}

impl BinarySemaphore {
    /// `taken` starts the semaphore without its permit.
    pub fn new(kernel: &Kernel, taken: bool) -> Self {
        Self {
            sem: Semaphore::new(kernel, if taken { 0 } else { 1 }),
        }
    }

    pub fn wait(&self) -> Status {
        self.sem.wait()
    }

    pub fn wait_timeout(&self, timeout: Interval) -> Status {
        self.sem.wait_timeout(timeout)
    }

    pub fn try_wait(&self) -> Status {
        self.sem.try_wait()
    }

    /// Releases the permit. Has no effect if it is already available.
    pub fn signal(&self) {
        self.sem.kernel().lock(|cs| self.signal_i(cs));
    }

    pub fn signal_i(&self, cs: &mut Sys<'_>) {
        let st = cs.state_for(self.sem.handle.uid());
        if st.sems[self.sem.key()].count < 1 {
            st.sem_signal_i(self.sem.key());
        }
    }

    /// Wakes every waiter with `Reset`, leaving the semaphore taken or not.
    pub fn reset(&self, taken: bool) {
        self.sem.reset(if taken { 0 } else { 1 });
    }

    pub fn is_taken(&self) -> bool {
        self.sem.count() <= 0
    }
}

impl SysGuard<'_> {
    pub(crate) fn sem_wait(&mut self, s: SemKey, timeout: Interval) -> Status {
        let me = self.me;
        let st = &mut *self.st;
        let sem = &mut st.sems[s];
        sem.count -= 1;
        if sem.count >= 0 {
            return Status::Ok;
        }
        if timeout.is_immediate() {
            sem.count += 1;
            return Status::Timeout;
        }
        sem.queue.push_back(&mut st.threads, me);
        Status::from_msg(self.go_sleep_timeout(State::WaitSem(s), timeout))
    }
}

impl KernelState {
    pub(crate) fn sem_signal_i(&mut self, s: SemKey) {
        let sem = &mut self.sems[s];
        sem.count += 1;
        if sem.count <= 0 {
            if let Some(t) = sem.queue.pop_front(&mut self.threads) {
                self.wake_i(t, MSG_OK);
            }
        }
    }

    pub(crate) fn dispose_semaphore(&mut self, s: SemKey) {
        if let Some(sem) = self.sems.remove(s) {
            debug_assert!(sem.queue.is_empty(), "semaphore dropped with waiters");
        }
    }
}
