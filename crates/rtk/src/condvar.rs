//! Condition variables.

use std::fmt;
use std::sync::Arc;

use rtk_core::{Interval, Status, MSG_OK, MSG_RESET};

use crate::arena::arena_key;
use crate::kernel::{Handle, Kernel, Sys};
use crate::list::ThreadQueue;
use crate::mutex::Mutex;
use crate::state::KernelState;
use crate::thread::State;

arena_key! {
    pub(crate) struct CondKey;
}

pub(crate) struct CondCb {
    pub(crate) queue: ThreadQueue,
}

/// Condition variable used together with a [`Mutex`].
///
/// Waiters are woken in arrival order; they then compete for the mutex by
/// priority.
#[derive(Clone)]
pub struct CondVar {
    handle: Arc<Handle<CondKey>>,
}

impl fmt::Debug for CondVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CondVar").field(&self.handle.key()).finish()
    }
}

impl CondVar {
    pub fn new(kernel: &Kernel) -> Self {
        let cb = CondCb {
            queue: ThreadQueue::EMPTY,
        };
        let key = match kernel.lock_state().condvars.insert(cb) {
            Some(key) => key,
            None => unreachable!("condvar arena has no limit"),
        };
        Self {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    /// Releases `mutex`, waits for a signal and reacquires `mutex`. The
    /// caller must own `mutex`.
    pub fn wait(&self, mutex: &Mutex) -> Status {
        self.wait_timeout(mutex, Interval::INFINITE)
    }

    /// Like [`wait`](Self::wait) with a timeout. The mutex is held again on
    /// return whatever the outcome.
    pub fn wait_timeout(&self, mutex: &Mutex, timeout: Interval) -> Status {
        if timeout.is_immediate() {
            return Status::Timeout;
        }
        let mut guard = self.handle.kernel().lock_s();
        let me = guard.me;
        let c = self.handle.key();
        let m = mutex.key();
        let st = &mut *guard.st;
        if mutex.uid() != self.handle.uid() {
            st.fatal("condvar used with a mutex of another kernel");
        }
        if st.mutexes[m].owner != Some(me) {
            st.fatal(format!("{me} waited on a condvar without owning {m:?}"));
        }
        st.mutex_release(m, me);
        st.condvars[c].queue.push_back(&mut st.threads, me);
        let msg = guard.go_sleep_timeout(State::WaitCond(c), timeout);
        guard.mutex_lock(m);
        Status::from_msg(msg)
    }

    /// Wakes the longest waiter with `Ok`.
    pub fn signal(&self) {
        self.handle.kernel().lock(|cs| self.signal_i(cs));
    }

    pub fn signal_i(&self, cs: &mut Sys<'_>) {
        let st = cs.state_for(self.handle.uid());
        let c = self.handle.key();
        if let Some(t) = st.condvars[c].queue.pop_front(&mut st.threads) {
            st.wake_i(t, MSG_OK);
        }
    }

    /// Wakes every waiter with `Reset`.
    pub fn broadcast(&self) {
        self.handle.kernel().lock(|cs| self.broadcast_i(cs));
    }

    pub fn broadcast_i(&self, cs: &mut Sys<'_>) {
        let st = cs.state_for(self.handle.uid());
        let c = self.handle.key();
        while let Some(t) = st.condvars[c].queue.pop_front(&mut st.threads) {
            st.wake_i(t, MSG_RESET);
        }
    }
}

impl KernelState {
    pub(crate) fn dispose_condvar(&mut self, c: CondKey) {
        if let Some(cb) = self.condvars.remove(c) {
            debug_assert!(cb.queue.is_empty(), "condvar dropped with waiters");
        }
    }
}
