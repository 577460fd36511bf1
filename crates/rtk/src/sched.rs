//! Ready list and context switching.
//!
//! ## Scheduling policy
//!
//! 1. The running thread is always the highest-priority runnable thread.
//! 2. Among equal effective priorities, threads run in the order they
//!    became ready.
//! 3. A thread preempted by a higher-priority one goes back *ahead* of its
//!    peers; a thread that yields or is woken goes *behind* them.
//! 4. With a time quantum configured, a thread that used up its slice
//!    yields to its ready peers at the next preemption point and goes
//!    behind them with a fresh slice.
//!
//! The running thread is not a member of the ready list.

use std::sync::Arc;

use rtk_core::{Interval, Msg, Priority};

use crate::config::IdlePolicy;
use crate::kernel::SysGuard;
use crate::list::ThreadQueue;
use crate::state::KernelState;
use crate::thread::{State, ThreadId, Threads};
use crate::trace::TraceEvent;

const BITMAP_WORDS: usize = Priority::LEVELS / 64;

/// Bitmap of non-empty levels plus one FIFO per level.
///
/// Uses `leading_zeros` for constant-time highest-level lookup.
pub(crate) struct ReadyList {
    bitmap: [u64; BITMAP_WORDS],
    levels: [ThreadQueue; Priority::LEVELS],
    len: usize,
}

impl ReadyList {
    pub(crate) fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
            levels: [ThreadQueue::EMPTY; Priority::LEVELS],
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Appends `t` behind the threads of its effective priority.
    pub(crate) fn push_back(&mut self, threads: &mut Threads, t: ThreadId) {
        let level = threads[t].prio.raw();
        self.levels[level as usize].push_back(threads, t);
        self.mark(level);
        self.len += 1;
    }

    /// Inserts `t` ahead of the threads of its effective priority.
    pub(crate) fn push_front(&mut self, threads: &mut Threads, t: ThreadId) {
        let level = threads[t].prio.raw();
        self.levels[level as usize].push_front(threads, t);
        self.mark(level);
        self.len += 1;
    }

    /// Unlinks `t`. Must be called before its effective priority changes.
    pub(crate) fn remove(&mut self, threads: &mut Threads, t: ThreadId) {
        let level = threads[t].prio.raw();
        let queue = &mut self.levels[level as usize];
        queue.remove(threads, t);
        if queue.is_empty() {
            self.unmark(level);
        }
        self.len -= 1;
    }

    pub(crate) fn highest(&self) -> Option<Priority> {
        self.bitmap
            .iter()
            .enumerate()
            .rev()
            .find(|(_, word)| **word != 0)
            .map(|(i, word)| Priority::new((i * 64 + 63 - word.leading_zeros() as usize) as u8))
    }

    pub(crate) fn pop_highest(&mut self, threads: &mut Threads) -> Option<ThreadId> {
        let level = self.highest()?.raw();
        let queue = &mut self.levels[level as usize];
        let t = queue.pop_front(threads)?;
        if queue.is_empty() {
            self.unmark(level);
        }
        self.len -= 1;
        Some(t)
    }

    /// Ready threads in scheduling order.
    pub(crate) fn iter<'a>(&'a self, threads: &'a Threads) -> impl Iterator<Item = ThreadId> + 'a {
        (0..Priority::LEVELS)
            .rev()
            .filter(move |&level| self.is_marked(level as u8))
            .flat_map(move |level| self.levels[level].iter(threads))
    }

    /// Checks bitmap, links and levels against each other.
    pub(crate) fn check(&self, threads: &Threads) -> Result<(), String> {
        let mut total = 0;
        for (level, queue) in self.levels.iter().enumerate() {
            if self.is_marked(level as u8) == queue.is_empty() {
                return Err(format!("ready bitmap disagrees with level {level}"));
            }
            if !queue.is_consistent(threads) {
                return Err(format!("ready level {level} has broken links"));
            }
            for t in queue.iter(threads) {
                let tcb = &threads[t];
                if tcb.prio.raw() as usize != level {
                    return Err(format!("thread {t} at level {level} has {}", tcb.prio));
                }
                if tcb.state != State::Ready {
                    return Err(format!("thread {t} in ready list is {:?}", tcb.state));
                }
            }
            total += queue.len();
        }
        if total != self.len {
            return Err(format!("ready list counts {} but holds {total}", self.len));
        }
        Ok(())
    }

    fn is_marked(&self, level: u8) -> bool {
        self.bitmap[level as usize / 64] & (1u64 << (level % 64)) != 0
    }

    fn mark(&mut self, level: u8) {
        self.bitmap[level as usize / 64] |= 1u64 << (level % 64);
    }

    fn unmark(&mut self, level: u8) {
        self.bitmap[level as usize / 64] &= !(1u64 << (level % 64));
    }
}

impl KernelState {
    /// Makes `t` ready behind its priority peers. I-class, no reschedule.
    pub(crate) fn ready_i(&mut self, t: ThreadId) {
        debug_assert!(
            !matches!(self.threads[t].state, State::Ready | State::Final),
            "readying thread {t} in state {:?}",
            self.threads[t].state
        );
        self.threads[t].state = State::Ready;
        self.ready.push_back(&mut self.threads, t);
    }

    /// Makes `t` ready ahead of its priority peers.
    pub(crate) fn ready_ahead_i(&mut self, t: ThreadId) {
        self.threads[t].state = State::Ready;
        self.ready.push_front(&mut self.threads, t);
    }

    /// Readies `t` with wake-up message `msg`.
    pub(crate) fn wake_i(&mut self, t: ThreadId, msg: Msg) {
        self.threads[t].wake = msg;
        self.ready_i(t);
    }

    /// True if a ready thread should take the CPU from the current one.
    pub(crate) fn preemption_due(&self) -> bool {
        match (self.current, self.ready.highest()) {
            (Some(c), Some(top)) if self.slice_used_up(c) => top >= self.threads[c].prio,
            (Some(c), Some(top)) => top > self.threads[c].prio,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    fn slice_used_up(&self, t: ThreadId) -> bool {
        self.quantum > 0 && self.threads[t].slice == 0
    }

    /// Requeues the preempted current thread `me`: behind its peers with a
    /// fresh slice if its slice is used up, ahead of them otherwise.
    pub(crate) fn preempt_i(&mut self, me: ThreadId) {
        if self.slice_used_up(me) {
            self.threads[me].slice = self.quantum;
            self.ready_i(me);
        } else {
            self.ready_ahead_i(me);
        }
    }

    /// Hands the CPU to the head of the ready list, or idles. The previous
    /// current thread must already be queued, asleep or finished.
    pub(crate) fn dispatch_next(&mut self) {
        let from = self.current.take();
        let to = self.ready.pop_highest(&mut self.threads);
        let time = self.timers.now();
        self.tracer.record(TraceEvent::Switch { time, from, to });
        match to {
            Some(next) => {
                self.threads[next].state = State::Current;
                self.current = Some(next);
                self.threads[next].baton.notify_one();
            }
            None => self.enter_idle(),
        }
    }

    /// Epilogue of an interrupt taken on a foreign host thread. An idle
    /// kernel dispatches at once; a running thread notices the preemption at
    /// its next kernel call.
    pub(crate) fn interrupt_epilogue(&mut self) {
        if self.current.is_none() && self.ready.highest().is_some() {
            self.dispatch_next();
        }
    }

    fn enter_idle(&mut self) {
        if let Some(callback) = self.idle_callback {
            callback();
        }
        if self.idle == IdlePolicy::Halt {
            self.halt("no thread ready to run".into());
        }
    }
}

impl SysGuard<'_> {
    /// Yields to a strictly higher-priority ready thread, if any.
    pub(crate) fn reschedule(&mut self) {
        if self.st.preemption_due() {
            let me = self.me;
            self.st.preempt_i(me);
            self.switch_away();
        }
    }

    /// Moves the caller behind its priority peers if any of them is ready.
    pub(crate) fn yield_now(&mut self) {
        let me = self.me;
        let st = &mut *self.st;
        let peer_ready = st
            .ready
            .highest()
            .is_some_and(|top| top >= st.threads[me].prio);
        if peer_ready {
            st.threads[me].slice = st.quantum;
            st.ready_i(me);
            self.switch_away();
        }
    }

    /// Puts the caller to sleep in `state` until another party readies it,
    /// and returns the wake-up message.
    pub(crate) fn go_sleep(&mut self, state: State) -> Msg {
        let me = self.me;
        let st = &mut *self.st;
        st.threads[me].state = state;
        st.threads[me].slice = st.quantum;
        self.switch_away();
        self.st.threads[me].wake
    }

    /// Like [`go_sleep`](Self::go_sleep) but also arms the caller's private
    /// timer. On expiry the caller is dequeued from whatever it waits on and
    /// woken with the timeout code. The timeout must not be immediate.
    pub(crate) fn go_sleep_timeout(&mut self, state: State, timeout: Interval) -> Msg {
        if timeout.is_infinite() {
            return self.go_sleep(state);
        }
        debug_assert!(!timeout.is_immediate(), "immediate timeout reached go_sleep");
        let me = self.me;
        let timer = self.st.threads[me].timer;
        self.st.timers.arm(timer, timeout.raw());
        let msg = self.go_sleep(state);
        self.st.timers.disarm(timer);
        msg
    }

    fn switch_away(&mut self) {
        self.st.dispatch_next();
        self.wait_turn();
    }

    /// Parks until this thread is current again. Panics if the kernel halts
    /// in the meantime.
    pub(crate) fn wait_turn(&mut self) {
        if let Err(reason) = self.resume() {
            panic!("kernel halted: {reason}");
        }
    }

    /// Parks until this thread is current, then honours any preemption that
    /// became due while it was waking up.
    pub(crate) fn resume(&mut self) -> Result<(), String> {
        loop {
            self.park()?;
            if !self.st.preemption_due() {
                return Ok(());
            }
            let me = self.me;
            self.st.preempt_i(me);
            self.st.dispatch_next();
        }
    }

    fn park(&mut self) -> Result<(), String> {
        let me = self.me;
        let baton = match self.st.threads.get(me) {
            Some(tcb) => Arc::clone(&tcb.baton),
            None => return Err(format!("thread {me} discarded")),
        };
        loop {
            if let Some(reason) = &self.st.halted {
                return Err(reason.clone());
            }
            if !self.st.threads.contains(me) {
                return Err(format!("thread {me} discarded"));
            }
            if self.st.current == Some(me) {
                return Ok(());
            }
            baton.wait(&mut self.st);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use proptest::prelude::*;

    fn state_with(prios: &[u8]) -> (KernelState, Vec<ThreadId>) {
        let config = KernelConfig::builder().max_threads(prios.len() + 1).build();
        let mut st = KernelState::new(0, &config, None);
        let ids = prios
            .iter()
            .map(|&p| {
                let t = st.create_thread(format!("t{p}"), Priority::new(p)).unwrap();
                st.ready_i(t);
                t
            })
            .collect();
        (st, ids)
    }

    #[test]
    fn empty_list_has_no_highest() {
        let ready = ReadyList::new();
        assert_eq!(ready.highest(), None);
        assert_eq!(ready.len(), 0);
    }

    #[test]
    fn preempted_thread_goes_ahead_of_peers() {
        let (mut st, ids) = state_with(&[50, 50]);
        let t = st.ready.pop_highest(&mut st.threads).unwrap();
        assert_eq!(t, ids[0]);
        st.ready_ahead_i(t);
        assert_eq!(st.ready.iter(&st.threads).collect::<Vec<_>>(), vec![ids[0], ids[1]]);
        st.ready.check(&st.threads).unwrap();
    }

    #[test]
    fn removal_clears_empty_levels() {
        let (mut st, ids) = state_with(&[200, 10]);
        st.ready.remove(&mut st.threads, ids[0]);
        assert_eq!(st.ready.highest(), Some(Priority::new(10)));
        st.threads[ids[0]].state = State::Starting;
        st.ready.check(&st.threads).unwrap();
    }

    proptest! {
        #[test]
        fn pop_order_is_priority_then_fifo(prios in proptest::collection::vec(1u8..=255, 1..40)) {
            let (mut st, ids) = state_with(&prios);
            prop_assert!(st.ready.check(&st.threads).is_ok());

            let mut expected: Vec<usize> = (0..prios.len()).collect();
            expected.sort_by(|&a, &b| prios[b].cmp(&prios[a]).then(a.cmp(&b)));
            let expected: Vec<ThreadId> = expected.into_iter().map(|i| ids[i]).collect();

            prop_assert_eq!(st.ready.iter(&st.threads).collect::<Vec<_>>(), expected.clone());
            let mut popped = Vec::new();
            while let Some(t) = st.ready.pop_highest(&mut st.threads) {
                popped.push(t);
            }
            prop_assert_eq!(popped, expected);
            prop_assert_eq!(st.ready.highest(), None);
        }
    }
}
