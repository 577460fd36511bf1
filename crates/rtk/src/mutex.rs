//! Mutex with priority inheritance.
//!
//! Waiters queue by effective priority. While a mutex is contended its owner
//! runs at least at the priority of the highest waiter, and the boost
//! follows the chain of owners blocked on further mutexes. A thread's
//! effective priority is always recomputed from scratch as the maximum of
//! its nominal priority and the head waiter of every mutex it still holds,
//! so a boost lasts exactly as long as the mutex that caused it is held.

use std::fmt;
use std::sync::Arc;

use rtk_core::{Priority, Status, MSG_OK};

use crate::arena::arena_key;
use crate::kernel::{Handle, Kernel, SysGuard};
use crate::list::ThreadQueue;
use crate::state::KernelState;
use crate::thread::{State, ThreadId};

arena_key! {
    pub(crate) struct MutexKey;
}

pub(crate) struct MutexCb {
    pub(crate) owner: Option<ThreadId>,
    pub(crate) queue: ThreadQueue,
}

/// Priority-inheritance mutex.
///
/// Locking a mutex the caller already owns is a fatal error.
#[derive(Clone)]
pub struct Mutex {
    handle: Arc<Handle<MutexKey>>,
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mutex").field(&self.handle.key()).finish()
    }
}

impl Mutex {
    pub fn new(kernel: &Kernel) -> Self {
        let cb = MutexCb {
            owner: None,
            queue: ThreadQueue::EMPTY,
        };
        let key = match kernel.lock_state().mutexes.insert(cb) {
            Some(key) => key,
            None => unreachable!("mutex arena has no limit"),
        };
        Self {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    pub(crate) fn key(&self) -> MutexKey {
        self.handle.key()
    }

    pub(crate) fn uid(&self) -> u64 {
        self.handle.uid()
    }

    /// Acquires the mutex, blocking while another thread owns it.
    pub fn lock(&self) {
        let mut guard = self.handle.kernel().lock_s();
        guard.mutex_lock(self.key());
    }

    /// Acquires the mutex if it is free. Returns `WouldBlock` otherwise,
    /// including when the caller already owns it.
    pub fn try_lock(&self) -> Status {
        let mut guard = self.handle.kernel().lock_s();
        let me = guard.me;
        let st = &mut *guard.st;
        let m = self.key();
        if st.mutexes[m].owner.is_some() {
            return Status::WouldBlock;
        }
        st.mutexes[m].owner = Some(me);
        st.threads[me].held.push(m);
        Status::Ok
    }

    /// Releases the mutex, handing it to the highest-priority waiter.
    pub fn unlock(&self) {
        let mut guard = self.handle.kernel().lock_s();
        let me = guard.me;
        guard.st.mutex_release(self.key(), me);
        guard.reschedule();
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.handle.kernel().lock_state().mutexes[self.key()].owner
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }
}

impl Kernel {
    /// Releases every mutex the calling thread holds and drops any inherited
    /// boost.
    pub fn unlock_all(&self) {
        let mut guard = self.lock_s();
        let me = guard.me;
        while let Some(&m) = guard.st.threads[me].held.last() {
            guard.st.mutex_release(m, me);
        }
        guard.reschedule();
    }
}

impl SysGuard<'_> {
    pub(crate) fn mutex_lock(&mut self, m: MutexKey) {
        let me = self.me;
        let st = &mut *self.st;
        let owner = st.mutexes[m].owner;
        match owner {
            None => {
                st.mutexes[m].owner = Some(me);
                st.threads[me].held.push(m);
            }
            Some(owner) if owner == me => st.fatal(format!("recursive lock of {m:?} by {me}")),
            Some(_) => {
                let prio = st.threads[me].prio;
                st.mutexes[m].queue.insert_by_priority(&mut st.threads, me);
                st.boost_chain(m, prio);
                // Ownership is handed over by the releasing thread.
                self.go_sleep(State::WaitMutex(m));
            }
        }
    }
}

impl KernelState {
    /// Releases `m` held by `me` without rescheduling. The head waiter, if
    /// any, becomes the owner and is readied.
    pub(crate) fn mutex_release(&mut self, m: MutexKey, me: ThreadId) {
        if self.mutexes[m].owner != Some(me) {
            self.fatal(format!("{me} unlocked {m:?} which it does not own"));
        }
        let held = &mut self.threads[me].held;
        if let Some(pos) = held.iter().rposition(|&h| h == m) {
            held.remove(pos);
        }

        let next = self.mutexes[m].queue.pop_front(&mut self.threads);
        self.mutexes[m].owner = next;
        if let Some(w) = next {
            self.threads[w].held.push(m);
            // The new owner inherits from the waiters it leaves behind.
            let boosted = self.inherited_priority(w);
            self.threads[w].prio = boosted;
            self.wake_i(w, MSG_OK);
        }

        let restored = self.inherited_priority(me);
        self.reprioritize(me, restored);
    }

    /// Nominal priority of `t` raised to the head waiter of every mutex it
    /// holds.
    pub(crate) fn inherited_priority(&self, t: ThreadId) -> Priority {
        let tcb = &self.threads[t];
        tcb.held
            .iter()
            .filter_map(|&m| self.mutexes[m].queue.front())
            .map(|w| self.threads[w].prio)
            .fold(tcb.real_prio, Priority::max)
    }

    /// Sets the effective priority of `t`, repositioning it in the list it
    /// is linked into and propagating the change along the ownership chain.
    pub(crate) fn reprioritize(&mut self, t: ThreadId, prio: Priority) {
        let old = self.threads[t].prio;
        if old == prio {
            return;
        }
        if let Some(m) = self.move_to_priority(t, prio) {
            if prio > old {
                self.boost_chain(m, prio);
            } else {
                self.lower_chain(m);
            }
        }
    }

    /// Raises the owner of `m`, and transitively the owners of whatever it
    /// is blocked on, to at least `prio`. One step per mutex in the chain.
    pub(crate) fn boost_chain(&mut self, mut m: MutexKey, prio: Priority) {
        for _ in 0..=self.threads.len() {
            let Some(owner) = self.mutexes[m].owner else {
                return;
            };
            if self.threads[owner].prio >= prio {
                return;
            }
            match self.move_to_priority(owner, prio) {
                Some(next) => m = next,
                None => return,
            }
        }
        self.fatal("mutex ownership chain is cyclic");
    }

    /// Recomputes the owner of `m`, and transitively the owners further down
    /// the chain, after one of its waiters lost priority.
    fn lower_chain(&mut self, mut m: MutexKey) {
        for _ in 0..=self.threads.len() {
            let Some(owner) = self.mutexes[m].owner else {
                return;
            };
            let prio = self.inherited_priority(owner);
            if prio >= self.threads[owner].prio {
                return;
            }
            match self.move_to_priority(owner, prio) {
                Some(next) => m = next,
                None => return,
            }
        }
        self.fatal("mutex ownership chain is cyclic");
    }

    /// Changes the effective priority of `t` in place. Returns the mutex it
    /// is blocked on, whose owner may need adjusting in turn.
    fn move_to_priority(&mut self, t: ThreadId, prio: Priority) -> Option<MutexKey> {
        let state = self.threads[t].state;
        match state {
            State::Ready => {
                self.ready.remove(&mut self.threads, t);
                self.threads[t].prio = prio;
                self.ready.push_back(&mut self.threads, t);
                None
            }
            State::WaitMutex(m) => {
                let queue = &mut self.mutexes[m].queue;
                queue.remove(&mut self.threads, t);
                self.threads[t].prio = prio;
                queue.insert_by_priority(&mut self.threads, t);
                Some(m)
            }
            _ => {
                self.threads[t].prio = prio;
                None
            }
        }
    }

    /// A dropped mutex that is still owned stops boosting its owner.
    pub(crate) fn dispose_mutex(&mut self, m: MutexKey) {
        let Some(cb) = self.mutexes.remove(m) else {
            return;
        };
        if let Some(owner) = cb.owner {
            if let Some(tcb) = self.threads.get_mut(owner) {
                tcb.held.retain(|&h| h != m);
                log::warn!("mutex {m:?} dropped while held by {owner}");
                let prio = self.inherited_priority(owner);
                self.reprioritize(owner, prio);
            }
        }
    }
}
