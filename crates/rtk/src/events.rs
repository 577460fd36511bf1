//! Event sources, listeners and per-thread event masks.
//!
//! Every thread has a word of pending events. Sources post into it through
//! listeners, and other parties can signal a thread directly. A listener
//! links one source to one thread; it never keeps the thread alive.

use std::fmt;
use std::sync::Arc;

use rtk_core::{EventFlags, EventMask, Interval, MSG_OK};

use crate::arena::arena_key;
use crate::kernel::{Handle, Kernel, Sys};
use crate::state::KernelState;
use crate::thread::{State, Thread, ThreadId};

arena_key! {
    pub(crate) struct SourceKey;
}

arena_key! {
    pub(crate) struct ListenerKey;
}

pub(crate) struct SourceCb {
    pub(crate) listeners: Vec<ListenerKey>,
}

pub(crate) struct ListenerCb {
    /// `None` once the source is gone.
    pub(crate) source: Option<SourceKey>,
    pub(crate) thread: ThreadId,
    /// Events posted to the thread on broadcast.
    pub(crate) events: EventMask,
    /// Flags accumulated since the last `get_and_clear_flags`.
    pub(crate) flags: EventFlags,
    /// Flags that trigger the post.
    pub(crate) wflags: EventFlags,
}

/// Source of events, broadcast to every registered listener.
#[derive(Clone)]
pub struct EventSource {
    handle: Arc<Handle<SourceKey>>,
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventSource").field(&self.handle.key()).finish()
    }
}

/// Registration of a thread on an [`EventSource`]. Unregisters on drop.
pub struct EventListener {
    handle: Arc<Handle<ListenerKey>>,
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventListener").field(&self.handle.key()).finish()
    }
}

impl EventSource {
    pub fn new(kernel: &Kernel) -> Self {
        let cb = SourceCb {
            listeners: Vec::new(),
        };
        let key = match kernel.lock_state().sources.insert(cb) {
            Some(key) => key,
            None => unreachable!("event source arena has no limit"),
        };
        Self {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    /// Registers the calling thread to receive `events` on every broadcast.
    pub fn register(&self, events: EventMask) -> EventListener {
        let me = self.handle.kernel().lock_s().me;
        self.register_thread(me, events, EventFlags::ALL)
    }

    /// Registers `thread` to receive `events` whenever a broadcast carries
    /// one of `wflags` (or no flags at all).
    pub fn register_thread(&self, thread: ThreadId, events: EventMask, wflags: EventFlags) -> EventListener {
        let kernel = self.handle.kernel();
        let mut st = kernel.lock_state();
        let source = self.handle.key();
        if !st.threads.contains(thread) || !st.sources.contains(source) {
            st.fatal(format!("cannot register {thread} on {source:?}"));
        }
        let cb = ListenerCb {
            source: Some(source),
            thread,
            events,
            flags: EventFlags::EMPTY,
            wflags,
        };
        let key = match st.listeners.insert(cb) {
            Some(key) => key,
            None => unreachable!("listener arena has no limit"),
        };
        st.sources[source].listeners.push(key);
        drop(st);
        EventListener {
            handle: Handle::new(kernel.clone(), key),
        }
    }

    /// Posts to every listener.
    pub fn broadcast(&self) {
        self.broadcast_flags(EventFlags::EMPTY);
    }

    /// Adds `flags` to every listener and posts to those whose filter
    /// matches.
    pub fn broadcast_flags(&self, flags: EventFlags) {
        self.handle
            .kernel()
            .lock(|cs| self.broadcast_flags_i(cs, flags));
    }

    /// I-class [`broadcast_flags`](Self::broadcast_flags).
    pub fn broadcast_flags_i(&self, cs: &mut Sys<'_>, flags: EventFlags) {
        let st = cs.state_for(self.handle.uid());
        let source = self.handle.key();
        let listeners = st.sources[source].listeners.clone();
        for l in listeners {
            let listener = &mut st.listeners[l];
            listener.flags |= flags;
            if flags.is_empty() || listener.flags.intersects(listener.wflags) {
                let (thread, events) = (listener.thread, listener.events);
                st.signal_events_i(thread, events);
            }
        }
    }

    /// I-class [`broadcast`](Self::broadcast).
    pub fn broadcast_i(&self, cs: &mut Sys<'_>) {
        self.broadcast_flags_i(cs, EventFlags::EMPTY);
    }
}

impl EventListener {
    /// Returns and clears the flags collected since the last call.
    pub fn get_and_clear_flags(&self) -> EventFlags {
        let mut st = self.handle.kernel().lock_state();
        let listener = &mut st.listeners[self.handle.key()];
        std::mem::replace(&mut listener.flags, EventFlags::EMPTY)
    }

    pub fn events(&self) -> EventMask {
        self.handle.kernel().lock_state().listeners[self.handle.key()].events
    }
}

impl Kernel {
    /// Posts `events` to `thread`.
    pub fn signal_events(&self, thread: &Thread, events: EventMask) {
        self.lock(|cs| cs.signal_events_i(thread, events));
    }

    /// Adds `events` to the caller's pending events and returns the result.
    pub fn add_events(&self, events: EventMask) -> EventMask {
        let mut guard = self.lock_s();
        let me = guard.me;
        let tcb = &mut guard.st.threads[me];
        tcb.events |= events;
        tcb.events
    }

    /// Clears `events` from the caller's pending events and returns the
    /// ones that were pending before.
    pub fn get_and_clear_events(&self, events: EventMask) -> EventMask {
        let mut guard = self.lock_s();
        let me = guard.me;
        let tcb = &mut guard.st.threads[me];
        let pending = tcb.events & events;
        tcb.events &= !events;
        pending
    }

    /// Waits for one event of `mask` and returns it, lowest first.
    pub fn wait_one(&self, mask: EventMask) -> EventMask {
        self.wait_one_timeout(mask, Interval::INFINITE)
    }

    /// Waits for any events of `mask` and returns all of them.
    pub fn wait_any(&self, mask: EventMask) -> EventMask {
        self.wait_any_timeout(mask, Interval::INFINITE)
    }

    /// Waits until every event of `mask` is pending and returns them.
    pub fn wait_all(&self, mask: EventMask) -> EventMask {
        self.wait_all_timeout(mask, Interval::INFINITE)
    }

    /// [`wait_one`](Self::wait_one) with a timeout; empty on timeout.
    pub fn wait_one_timeout(&self, mask: EventMask, timeout: Interval) -> EventMask {
        self.wait_events(mask, timeout, WaitMode::One)
    }

    pub fn wait_any_timeout(&self, mask: EventMask, timeout: Interval) -> EventMask {
        self.wait_events(mask, timeout, WaitMode::Any)
    }

    pub fn wait_all_timeout(&self, mask: EventMask, timeout: Interval) -> EventMask {
        self.wait_events(mask, timeout, WaitMode::All)
    }

    fn wait_events(&self, mask: EventMask, timeout: Interval, mode: WaitMode) -> EventMask {
        let mut guard = self.lock_s();
        let me = guard.me;
        let satisfied = |pending: EventMask| match mode {
            WaitMode::All => pending.contains(mask),
            WaitMode::One | WaitMode::Any => pending.intersects(mask),
        };
        if !satisfied(guard.st.threads[me].events) {
            if timeout.is_immediate() {
                return EventMask::EMPTY;
            }
            guard.st.threads[me].wait_mask = mask;
            let state = match mode {
                WaitMode::All => State::WaitAllEvents,
                WaitMode::One | WaitMode::Any => State::WaitAnyEvent,
            };
            if guard.go_sleep_timeout(state, timeout) != MSG_OK {
                return EventMask::EMPTY;
            }
        }
        let tcb = &mut guard.st.threads[me];
        let taken = match mode {
            WaitMode::One => (tcb.events & mask).lowest(),
            WaitMode::Any | WaitMode::All => tcb.events & mask,
        };
        tcb.events &= !taken;
        taken
    }
}

#[derive(Clone, Copy)]
enum WaitMode {
    One,
    Any,
    All,
}

impl Sys<'_> {
    /// I-class [`Kernel::signal_events`].
    pub fn signal_events_i(&mut self, thread: &Thread, events: EventMask) {
        self.state_for(thread.uid()).signal_events_i(thread.id(), events);
    }
}

impl KernelState {
    pub(crate) fn signal_events_i(&mut self, t: ThreadId, events: EventMask) {
        let Some(tcb) = self.threads.get_mut(t) else {
            return;
        };
        tcb.events |= events;
        let wake = match tcb.state {
            State::WaitAnyEvent => tcb.events.intersects(tcb.wait_mask),
            State::WaitAllEvents => tcb.events.contains(tcb.wait_mask),
            _ => false,
        };
        if wake {
            self.wake_i(t, MSG_OK);
        }
    }

    /// Detaches every listener still registered on `s`.
    pub(crate) fn dispose_source(&mut self, s: SourceKey) {
        if let Some(source) = self.sources.remove(s) {
            for l in source.listeners {
                if let Some(listener) = self.listeners.get_mut(l) {
                    listener.source = None;
                }
            }
        }
    }

    pub(crate) fn dispose_listener(&mut self, l: ListenerKey) {
        let Some(listener) = self.listeners.remove(l) else {
            return;
        };
        if let Some(source) = listener.source.and_then(|s| self.sources.get_mut(s)) {
            source.listeners.retain(|&k| k != l);
        }
    }
}
