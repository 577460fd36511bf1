//! The kernel context object.
//!
//! One `KernelState` holds every list the kernel maintains: the TCB arena,
//! the ready list, the virtual-timer queue and the control blocks of every
//! primitive. Primitive modules extend it with their own `impl` blocks.

use crate::arena::Arena;
use crate::condvar::{CondCb, CondKey};
use crate::config::{IdlePolicy, KernelConfig};
use crate::events::{ListenerCb, ListenerKey, SourceCb, SourceKey};
use crate::list::ThreadQueue;
use crate::mutex::{MutexCb, MutexKey};
use crate::reference::{QueueKey, RefKey};
use crate::sched::ReadyList;
use crate::sem::{SemCb, SemKey};
use crate::thread::{ThreadId, Threads};
use crate::trace::{TraceEvent, TraceHook, Tracer};
use crate::vt::{TimerKey, TimerList};

pub(crate) struct KernelState {
    pub(crate) uid: u64,
    pub(crate) threads: Threads,
    pub(crate) ready: ReadyList,
    pub(crate) current: Option<ThreadId>,
    pub(crate) timers: TimerList,
    pub(crate) sems: Arena<SemKey, SemCb>,
    pub(crate) mutexes: Arena<MutexKey, MutexCb>,
    pub(crate) condvars: Arena<CondKey, CondCb>,
    pub(crate) sources: Arena<SourceKey, SourceCb>,
    pub(crate) listeners: Arena<ListenerKey, ListenerCb>,
    pub(crate) queues: Arena<QueueKey, ThreadQueue>,
    pub(crate) refs: Arena<RefKey, Option<ThreadId>>,
    pub(crate) halted: Option<String>,
    pub(crate) idle: IdlePolicy,
    pub(crate) idle_callback: Option<fn()>,
    /// Round-robin slice length, 0 when disabled.
    pub(crate) quantum: u32,
    pub(crate) tracer: Tracer,
}

impl KernelState {
    pub(crate) fn new(uid: u64, config: &KernelConfig, hook: Option<TraceHook>) -> Self {
        Self {
            uid,
            threads: Arena::with_limit(config.max_threads),
            ready: ReadyList::new(),
            current: None,
            timers: TimerList::new(),
            sems: Arena::new(),
            mutexes: Arena::new(),
            condvars: Arena::new(),
            sources: Arena::new(),
            listeners: Arena::new(),
            queues: Arena::new(),
            refs: Arena::new(),
            halted: None,
            idle: config.idle,
            idle_callback: config.idle_callback,
            quantum: config.time_quantum,
            tracer: Tracer::new(config.trace, hook),
        }
    }

    /// Marks the kernel halted and wakes every parked thread so it can
    /// notice. The first reason wins.
    pub(crate) fn halt(&mut self, reason: String) {
        if self.halted.is_some() {
            return;
        }
        log::error!("kernel halted: {reason}");
        let time = self.timers.now();
        self.tracer.record(TraceEvent::Halt { time });
        self.halted = Some(reason);
        for (_, tcb) in self.threads.iter() {
            tcb.baton.notify_one();
        }
    }

    /// Halts the kernel and panics in the caller.
    pub(crate) fn fatal(&mut self, reason: impl Into<String>) -> ! {
        let reason = reason.into();
        self.halt(reason.clone());
        panic!("{reason}");
    }

    pub(crate) fn dispose(&mut self, disposal: Disposal) {
        match disposal {
            Disposal::Thread(t) => self.release_thread(t),
            Disposal::Semaphore(k) => self.dispose_semaphore(k),
            Disposal::Mutex(k) => self.dispose_mutex(k),
            Disposal::CondVar(k) => self.dispose_condvar(k),
            Disposal::Source(k) => self.dispose_source(k),
            Disposal::Listener(k) => self.dispose_listener(k),
            Disposal::Timer(k) => {
                self.timers.free(k);
            }
            Disposal::Reference(k) => {
                self.refs.remove(k);
            }
            Disposal::Queue(k) => self.dispose_threads_queue(k),
        }
    }
}

/// An object whose last handle was dropped.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Disposal {
    Thread(ThreadId),
    Semaphore(SemKey),
    Mutex(MutexKey),
    CondVar(CondKey),
    Source(SourceKey),
    Listener(ListenerKey),
    Timer(TimerKey),
    Reference(RefKey),
    Queue(QueueKey),
}

macro_rules! disposal_from {
    ($($key:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$key> for Disposal {
                fn from(key: $key) -> Self {
                    Disposal::$variant(key)
                }
            }
        )*
    };
}

disposal_from! {
    ThreadId => Thread,
    SemKey => Semaphore,
    MutexKey => Mutex,
    CondKey => CondVar,
    SourceKey => Source,
    ListenerKey => Listener,
    TimerKey => Timer,
    RefKey => Reference,
    QueueKey => Queue,
}
