//! Virtual timers.
//!
//! Pending timers form a delta queue: each armed node stores the number of
//! ticks between its predecessor's deadline and its own, so a tick only
//! touches the head. Every thread owns one node for its timed waits; the
//! rest belong to [`VirtualTimer`] handles.

use std::fmt;
use std::sync::Arc;

use rtk_core::{Interval, SysTime};

use crate::arena::{arena_key, Arena};
use crate::kernel::{Handle, Kernel, Sys};
use crate::state::KernelState;
use crate::thread::{State, ThreadId};

arena_key! {
    pub(crate) struct TimerKey;
}

/// Timer callback. Runs in interrupt context with the critical section held.
pub type TimerCallback = Box<dyn FnMut(&mut Sys<'_>) + Send + 'static>;

pub(crate) enum Expiry {
    /// Timeout of the owning thread's timed wait.
    Wakeup(ThreadId),
    /// `None` while the callback is running or before the first `set`.
    Callback(Option<TimerCallback>),
}

pub(crate) struct TimerNode {
    prev: Option<TimerKey>,
    next: Option<TimerKey>,
    delta: u32,
    armed: bool,
    /// Period for continuous timers, 0 for one-shots.
    reload: u32,
    expiry: Expiry,
}

pub(crate) struct TimerList {
    nodes: Arena<TimerKey, TimerNode>,
    head: Option<TimerKey>,
    tail: Option<TimerKey>,
    now: SysTime,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Arena::new(),
            head: None,
            tail: None,
            now: SysTime::ZERO,
        }
    }

    pub(crate) fn now(&self) -> SysTime {
        self.now
    }

    pub(crate) fn alloc(&mut self, expiry: Expiry) -> TimerKey {
        let node = TimerNode {
            prev: None,
            next: None,
            delta: 0,
            armed: false,
            reload: 0,
            expiry,
        };
        match self.nodes.insert(node) {
            Some(key) => key,
            None => unreachable!("timer arena has no limit"),
        }
    }

    pub(crate) fn free(&mut self, key: TimerKey) -> Option<TimerNode> {
        self.disarm(key);
        self.nodes.remove(key)
    }

    pub(crate) fn is_armed(&self, key: TimerKey) -> bool {
        self.nodes.get(key).is_some_and(|n| n.armed)
    }

    /// Arms `key` to expire `delay` ticks from now, behind any timer with the
    /// same deadline. Re-arming an armed timer moves it.
    pub(crate) fn arm(&mut self, key: TimerKey, delay: u32) {
        debug_assert!(delay > 0, "zero-delay timers fire inline");
        self.disarm(key);
        let mut remaining = delay;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            let d = self.nodes[c].delta;
            if d > remaining {
                break;
            }
            remaining -= d;
            cursor = self.nodes[c].next;
        }
        let prev = match cursor {
            Some(c) => {
                self.nodes[c].delta -= remaining;
                self.nodes[c].prev
            }
            None => self.tail,
        };
        let node = &mut self.nodes[key];
        node.prev = prev;
        node.next = cursor;
        node.delta = remaining;
        node.armed = true;
        match prev {
            Some(p) => self.nodes[p].next = Some(key),
            None => self.head = Some(key),
        }
        match cursor {
            Some(c) => self.nodes[c].prev = Some(key),
            None => self.tail = Some(key),
        }
    }

    /// Unlinks `key`, handing its delta to the successor. Returns whether it
    /// was armed.
    pub(crate) fn disarm(&mut self, key: TimerKey) -> bool {
        let Some(node) = self.nodes.get_mut(key) else {
            return false;
        };
        if !node.armed {
            return false;
        }
        let (prev, next, delta) = (node.prev, node.next, node.delta);
        node.armed = false;
        node.prev = None;
        node.next = None;
        node.delta = 0;
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => {
                self.nodes[n].prev = prev;
                self.nodes[n].delta += delta;
            }
            None => self.tail = prev,
        }
        true
    }

    /// Ticks left until `key` expires.
    pub(crate) fn remaining(&self, key: TimerKey) -> Option<Interval> {
        if !self.is_armed(key) {
            return None;
        }
        let mut sum = 0u32;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            sum = sum.saturating_add(self.nodes[c].delta);
            if c == key {
                return Some(Interval::ticks(sum));
            }
            cursor = self.nodes[c].next;
        }
        None
    }

    /// Advances system time by one tick.
    fn advance(&mut self) {
        self.now.increment();
        if let Some(h) = self.head {
            let node = &mut self.nodes[h];
            node.delta = node.delta.saturating_sub(1);
        }
    }

    fn expired_head(&self) -> Option<TimerKey> {
        self.head.filter(|&h| self.nodes[h].delta == 0)
    }

    /// Armed timers in expiry order with their absolute delays.
    pub(crate) fn pending(&self) -> Vec<(TimerKey, u32)> {
        let mut out = Vec::new();
        let mut sum = 0u32;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if out.len() > self.nodes.len() {
                break;
            }
            sum = sum.saturating_add(self.nodes[c].delta);
            out.push((c, sum));
            cursor = self.nodes[c].next;
        }
        out
    }

    /// Checks links, the armed flags and the deltas.
    pub(crate) fn check(&self) -> Result<(), String> {
        let mut prev = None;
        let mut cursor = self.head;
        let mut seen = 0;
        while let Some(c) = cursor {
            let Some(node) = self.nodes.get(c) else {
                return Err(format!("timer queue links a freed timer {c:?}"));
            };
            if !node.armed || node.prev != prev {
                return Err(format!("timer queue broken at {c:?}"));
            }
            seen += 1;
            if seen > self.nodes.len() {
                return Err("timer queue is cyclic".into());
            }
            prev = Some(c);
            cursor = node.next;
        }
        if self.tail != prev {
            return Err("timer queue tail mismatch".into());
        }
        let armed = self.nodes.iter().filter(|(_, n)| n.armed).count();
        if armed != seen {
            return Err(format!("{armed} timers armed but {seen} queued"));
        }
        Ok(())
    }
}

enum Fired {
    Wakeup(ThreadId),
    Callback(TimerCallback),
    Nothing,
}

impl KernelState {
    /// Tick handler: advances time and fires every expired timer.
    pub(crate) fn tick_i(&mut self) {
        if let Some(c) = self.current {
            let tcb = &mut self.threads[c];
            tcb.slice = tcb.slice.saturating_sub(1);
        }
        self.timers.advance();
        while let Some(key) = self.timers.expired_head() {
            self.timers.disarm(key);
            self.fire(key);
        }
    }

    fn fire(&mut self, key: TimerKey) {
        let Some(node) = self.timers.nodes.get_mut(key) else {
            return;
        };
        let reload = node.reload;
        let fired = match &mut node.expiry {
            Expiry::Wakeup(t) => Fired::Wakeup(*t),
            Expiry::Callback(cb) => cb.take().map_or(Fired::Nothing, Fired::Callback),
        };
        match fired {
            Fired::Wakeup(t) => {
                log::trace!("timeout of thread {t}");
                self.timeout_wakeup_i(t);
            }
            Fired::Callback(mut cb) => {
                log::trace!("timer {key:?} fired at {}", self.timers.now());
                if reload > 0 {
                    self.timers.arm(key, reload);
                }
                cb(&mut Sys::new(self));
                self.restore_callback(key, cb);
            }
            Fired::Nothing => {}
        }
    }

    /// Puts `cb` back unless the callback re-set its own timer with a new one
    /// or the timer was freed meanwhile.
    fn restore_callback(&mut self, key: TimerKey, cb: TimerCallback) {
        if let Some(node) = self.timers.nodes.get_mut(key) {
            if let Expiry::Callback(slot @ None) = &mut node.expiry {
                *slot = Some(cb);
            }
        }
    }

    /// Arms a callback timer. A zero delay runs the callback right away in
    /// the caller's context; an infinite delay stores it without arming.
    pub(crate) fn timer_set_i(&mut self, key: TimerKey, delay: Interval, reload: u32, cb: TimerCallback) {
        self.timers.disarm(key);
        let node = &mut self.timers.nodes[key];
        node.reload = reload;
        if delay.is_immediate() {
            node.expiry = Expiry::Callback(None);
            if reload > 0 {
                self.timers.arm(key, reload);
            }
            let mut cb = cb;
            cb(&mut Sys::new(self));
            self.restore_callback(key, cb);
            return;
        }
        node.expiry = Expiry::Callback(Some(cb));
        if !delay.is_infinite() {
            self.timers.arm(key, delay.raw());
        }
    }

    /// Ends a timed wait of `t` with the timeout code, unlinking it from
    /// whatever it waits on.
    pub(crate) fn timeout_wakeup_i(&mut self, t: ThreadId) {
        let state = self.threads[t].state;
        match state {
            State::WaitSem(s) => {
                let sem = &mut self.sems[s];
                sem.queue.remove(&mut self.threads, t);
                sem.count += 1;
            }
            State::WaitCond(c) => self.condvars[c].queue.remove(&mut self.threads, t),
            State::WaitQueue(q) => self.queues[q].remove(&mut self.threads, t),
            State::Suspended(r) => {
                if let Some(slot) = self.refs.get_mut(r) {
                    *slot = None;
                }
            }
            State::Sleeping | State::WaitAnyEvent | State::WaitAllEvents => {}
            _ => return,
        }
        self.wake_i(t, rtk_core::MSG_TIMEOUT);
    }
}

impl Kernel {
    /// Tick handler, callable from a tick source on any host thread or from
    /// a kernel thread.
    pub fn tick(&self) {
        self.isr(|cs| cs.tick());
    }
}

/// A one-shot or periodic software timer.
///
/// Cloning shares the timer; it is disarmed and freed when the last clone
/// is dropped.
#[derive(Clone)]
pub struct VirtualTimer {
    handle: Arc<Handle<TimerKey>>,
}

impl fmt::Debug for VirtualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VirtualTimer").field(&self.handle.key()).finish()
    }
}

impl VirtualTimer {
    pub fn new(kernel: &Kernel) -> Self {
        let key = kernel.lock_state().timers.alloc(Expiry::Callback(None));
        Self {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    /// Arms a one-shot timer firing `callback` after `delay`. Re-arming an
    /// armed timer replaces its deadline and callback.
    pub fn set<F>(&self, delay: Interval, callback: F)
    where
        F: FnMut(&mut Sys<'_>) + Send + 'static,
    {
        self.handle.kernel().lock(|cs| self.set_i(cs, delay, callback));
    }

    /// I-class [`set`](Self::set).
    pub fn set_i<F>(&self, cs: &mut Sys<'_>, delay: Interval, callback: F)
    where
        F: FnMut(&mut Sys<'_>) + Send + 'static,
    {
        cs.state_for(self.handle.uid())
            .timer_set_i(self.handle.key(), delay, 0, Box::new(callback));
    }

    /// Arms a timer firing `callback` every `period` ticks.
    pub fn set_continuous<F>(&self, period: Interval, callback: F)
    where
        F: FnMut(&mut Sys<'_>) + Send + 'static,
    {
        self.handle
            .kernel()
            .lock(|cs| self.set_continuous_i(cs, period, callback));
    }

    /// I-class [`set_continuous`](Self::set_continuous). The period must be
    /// finite and non-zero.
    pub fn set_continuous_i<F>(&self, cs: &mut Sys<'_>, period: Interval, callback: F)
    where
        F: FnMut(&mut Sys<'_>) + Send + 'static,
    {
        let st = cs.state_for(self.handle.uid());
        if period.is_immediate() || period.is_infinite() {
            st.fatal(format!("invalid timer period {period}"));
        }
        st.timer_set_i(self.handle.key(), period, period.raw(), Box::new(callback));
    }

    /// Disarms the timer. Harmless on a timer that already fired or was
    /// never set.
    pub fn reset(&self) {
        self.handle.kernel().lock(|cs| self.reset_i(cs));
    }

    /// I-class [`reset`](Self::reset).
    pub fn reset_i(&self, cs: &mut Sys<'_>) {
        let st = cs.state_for(self.handle.uid());
        let key = self.handle.key();
        st.timers.disarm(key);
        if let Some(node) = st.timers.nodes.get_mut(key) {
            node.reload = 0;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle
            .kernel()
            .lock_state()
            .timers
            .is_armed(self.handle.key())
    }

    /// Ticks until expiry, `None` if disarmed.
    pub fn remaining(&self) -> Option<Interval> {
        self.handle
            .kernel()
            .lock_state()
            .timers
            .remaining(self.handle.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_with(delays: &[u32]) -> (TimerList, Vec<TimerKey>) {
        let mut list = TimerList::new();
        let keys = delays
            .iter()
            .map(|&d| {
                let k = list.alloc(Expiry::Callback(None));
                list.arm(k, d);
                k
            })
            .collect();
        (list, keys)
    }

    #[test]
    fn deltas_sum_to_deadlines() {
        let (list, keys) = list_with(&[30, 10, 20, 10]);
        assert_eq!(
            list.pending(),
            vec![(keys[1], 10), (keys[3], 10), (keys[2], 20), (keys[0], 30)]
        );
        list.check().unwrap();
    }

    #[test]
    fn disarm_hands_delta_to_successor() {
        let (mut list, keys) = list_with(&[5, 8]);
        assert!(list.disarm(keys[0]));
        assert!(!list.disarm(keys[0]));
        assert_eq!(list.remaining(keys[1]), Some(Interval::ticks(8)));
        list.check().unwrap();
    }

    #[test]
    fn advance_exposes_expired_head() {
        let (mut list, keys) = list_with(&[2]);
        list.advance();
        assert_eq!(list.expired_head(), None);
        list.advance();
        assert_eq!(list.expired_head(), Some(keys[0]));
        assert_eq!(list.now(), SysTime::new(2));
    }

    #[test]
    fn free_unlinks_armed_timer() {
        let (mut list, keys) = list_with(&[3, 6]);
        assert!(list.free(keys[0]).is_some());
        assert_eq!(list.pending(), vec![(keys[1], 6)]);
        list.check().unwrap();
    }
}
