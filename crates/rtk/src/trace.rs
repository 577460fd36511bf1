//! Context-switch trace.
//!
//! The kernel keeps the most recent scheduling events in a fixed ring buffer
//! and can forward each one to a user hook as it happens. Hooks run inside
//! the critical section and must not call back into the kernel.

use std::sync::Arc;

use heapless::HistoryBuffer;
use rtk_core::SysTime;

use crate::thread::ThreadId;

/// Number of events retained in the trace buffer.
pub const TRACE_DEPTH: usize = 64;

/// One recorded scheduling event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// The CPU passed from `from` to `to`. `None` stands for idle.
    Switch {
        time: SysTime,
        from: Option<ThreadId>,
        to: Option<ThreadId>,
    },
    /// The kernel halted.
    Halt { time: SysTime },
}

impl TraceEvent {
    pub fn time(&self) -> SysTime {
        match *self {
            TraceEvent::Switch { time, .. } | TraceEvent::Halt { time } => time,
        }
    }
}

pub type TraceHook = Arc<dyn Fn(&TraceEvent) + Send + Sync>;

pub(crate) struct Tracer {
    enabled: bool,
    buffer: HistoryBuffer<TraceEvent, TRACE_DEPTH>,
    hook: Option<TraceHook>,
}

impl Tracer {
    pub(crate) fn new(enabled: bool, hook: Option<TraceHook>) -> Self {
        Self {
            enabled,
            buffer: HistoryBuffer::new(),
            hook,
        }
    }

    pub(crate) fn record(&mut self, event: TraceEvent) {
        log::trace!("{event:?}");
        if self.enabled {
            self.buffer.write(event);
        }
        if let Some(hook) = &self.hook {
            hook(&event);
        }
    }

    /// Buffered events, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<TraceEvent> {
        self.buffer.oldest_ordered().copied().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
    }
}
