//! Kernel handle, critical sections and interrupt entry.
//!
//! All kernel state sits in one [`KernelState`] behind a single
//! `parking_lot::Mutex`, which plays the part of the global interrupt mask.
//! Each kernel thread is a host thread that only runs user code while it is
//! the kernel's `current` thread; the others are parked on a private baton
//! condvar tied to that same mutex.
//!
//! Two calling conventions exist:
//!
//! - **S-class** calls (everything that may block) are methods on the object
//!   handles and on [`Kernel`]. They are only legal from the running kernel
//!   thread; anything else is fatal.
//! - **I-class** calls take a [`Sys`] token, which is only handed out inside
//!   [`Kernel::isr`], [`Kernel::lock`] and timer callbacks. They never block.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rtk_core::SysTime;

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::state::{Disposal, KernelState};
use crate::thread::ThreadId;
use crate::trace::{TraceEvent, TraceHook};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Kernel thread identity of the calling host thread, if any.
    static BINDING: Cell<Option<(u64, ThreadId)>> = const { Cell::new(None) };
}

pub(crate) fn bind_host_thread(uid: u64, id: ThreadId) {
    BINDING.with(|b| b.set(Some((uid, id))));
}

pub(crate) fn unbind_host_thread() {
    BINDING.with(|b| b.set(None));
}

pub(crate) struct Shared {
    uid: u64,
    config: KernelConfig,
    state: Mutex<KernelState>,
    graveyard: spin::Mutex<Vec<Disposal>>,
}

/// Handle to one kernel instance. Cheap to clone.
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<Shared>,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.shared.config.name)
            .field("uid", &self.shared.uid)
            .finish()
    }
}

/// Builder for a [`Kernel`].
pub struct KernelBuilder {
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            trace: None,
        }
    }

    /// Installs a hook that sees every scheduling event.
    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Creates the kernel and turns the calling host thread into its main
    /// thread.
    pub fn build(self) -> Result<Kernel, KernelError> {
        let config = self.config;
        if config.max_threads == 0 {
            return Err(KernelError::InvalidConfig("max_threads must be at least 1"));
        }
        if config.tick_hz == 0 {
            return Err(KernelError::InvalidConfig("tick_hz must be non-zero"));
        }
        if config.stack_size == 0 {
            return Err(KernelError::InvalidConfig("stack_size must be non-zero"));
        }
        if !config.main_priority.is_valid() {
            return Err(KernelError::InvalidPriority(config.main_priority));
        }

        let uid = NEXT_UID.fetch_add(1, Ordering::Relaxed);
        let mut state = KernelState::new(uid, &config, self.trace);
        let main = state.start_main_thread(config.main_priority);
        bind_host_thread(uid, main);
        log::debug!(
            "{}: kernel up, main thread {main} at {}",
            config.name,
            config.main_priority
        );

        Ok(Kernel {
            shared: Arc::new(Shared {
                uid,
                config,
                state: Mutex::new(state),
                graveyard: spin::Mutex::new(Vec::new()),
            }),
        })
    }
}

impl Kernel {
    /// Kernel builder with the default configuration.
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    pub(crate) fn uid(&self) -> u64 {
        self.shared.uid
    }

    /// The kernel thread the calling host thread runs as, if any.
    pub(crate) fn bound_thread(&self) -> Option<ThreadId> {
        match BINDING.with(Cell::get) {
            Some((uid, id)) if uid == self.shared.uid => Some(id),
            _ => None,
        }
    }

    /// Enters the critical section from any context.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, KernelState> {
        let mut st = self.shared.state.lock();
        self.collect(&mut st);
        st
    }

    /// Enters the critical section for an S-class call. Halts the kernel if
    /// the caller is not the running kernel thread, and acts as a preemption
    /// point for interrupts that arrived from other host threads.
    pub(crate) fn lock_s(&self) -> SysGuard<'_> {
        let bound = self.bound_thread();
        let mut st = self.lock_state();
        if let Some(reason) = st.halted.clone() {
            drop(st);
            panic!("kernel halted: {reason}");
        }
        let me = match bound {
            Some(me) if st.current == Some(me) => me,
            _ => st.fatal("S-class call outside the running kernel thread"),
        };
        let mut guard = SysGuard { st, me };
        guard.reschedule();
        guard
    }

    /// Queues an object for disposal. Collection happens now if the
    /// critical section is free, otherwise on the next entry.
    pub(crate) fn dispose(&self, disposal: Disposal) {
        self.shared.graveyard.lock().push(disposal);
        if let Some(mut st) = self.shared.state.try_lock() {
            self.collect(&mut st);
        }
    }

    fn collect(&self, st: &mut KernelState) {
        loop {
            let batch = std::mem::take(&mut *self.shared.graveyard.lock());
            if batch.is_empty() {
                break;
            }
            for disposal in batch {
                st.dispose(disposal);
            }
        }
    }

    /// Runs `f` in interrupt context.
    ///
    /// Called from the running kernel thread this behaves like [`lock`]:
    /// the epilogue switches to a higher-priority thread made ready by `f`.
    /// Called from any other host thread it models an asynchronous
    /// interrupt: an idle kernel dispatches at once, a busy one switches at
    /// the running thread's next kernel call.
    ///
    /// [`lock`]: Kernel::lock
    pub fn isr<R>(&self, f: impl FnOnce(&mut Sys<'_>) -> R) -> R {
        if self.bound_thread().is_some() {
            return self.lock(f);
        }
        let mut st = self.lock_state();
        if let Some(reason) = st.halted.clone() {
            drop(st);
            panic!("kernel halted: {reason}");
        }
        let result = f(&mut Sys::new(&mut st));
        st.interrupt_epilogue();
        result
    }

    /// Runs `f` inside the critical section from thread context, then
    /// reschedules. S-class.
    pub fn lock<R>(&self, f: impl FnOnce(&mut Sys<'_>) -> R) -> R {
        let mut guard = self.lock_s();
        let result = f(&mut guard.sys());
        guard.reschedule();
        result
    }

    /// Stops the kernel. Every parked kernel thread wakes up and panics, and
    /// every later kernel call panics.
    pub fn halt(&self, reason: impl Into<String>) {
        self.lock_state().halt(reason.into());
    }

    pub fn is_halted(&self) -> bool {
        self.lock_state().halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.lock_state().halted.clone()
    }

    /// Current system time.
    pub fn now(&self) -> SysTime {
        self.lock_state().timers.now()
    }

    /// Verifies the kernel's structural invariants.
    pub fn integrity_check(&self) -> Result<(), KernelError> {
        let st = self.lock_state();
        if let Some(reason) = &st.halted {
            return Err(KernelError::Halted(reason.clone()));
        }
        st.integrity_check().map_err(KernelError::Integrity)
    }

    /// Recent scheduling events, oldest first.
    pub fn trace_snapshot(&self) -> Vec<TraceEvent> {
        self.lock_state().tracer.snapshot()
    }

    pub fn clear_trace(&self) {
        self.lock_state().tracer.clear();
    }
}

/// Critical section held by the running kernel thread.
pub(crate) struct SysGuard<'a> {
    pub(crate) st: MutexGuard<'a, KernelState>,
    pub(crate) me: ThreadId,
}

impl SysGuard<'_> {
    pub(crate) fn sys(&mut self) -> Sys<'_> {
        Sys::new(&mut self.st)
    }
}

/// Capability token for I-class operations.
///
/// Holding a `Sys` proves the critical section is entered. It is handed to
/// the closures given to [`Kernel::isr`] and [`Kernel::lock`] and to
/// virtual-timer callbacks, and every I-class method takes it by mutable
/// reference.
pub struct Sys<'a> {
    st: &'a mut KernelState,
}

impl<'a> Sys<'a> {
    pub(crate) fn new(st: &'a mut KernelState) -> Self {
        Self { st }
    }

    /// The kernel state, after checking that the object identified by `uid`
    /// belongs to this kernel.
    pub(crate) fn state_for(&mut self, uid: u64) -> &mut KernelState {
        if self.st.uid != uid {
            self.st.fatal("object used with a foreign kernel");
        }
        &mut *self.st
    }

    /// Current system time.
    pub fn now(&self) -> SysTime {
        self.st.timers.now()
    }

    /// The thread that was running when the critical section was entered,
    /// or `None` if the kernel was idle.
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.st.current
    }

    /// Advances system time by one tick and fires every expired timer.
    pub fn tick(&mut self) {
        self.st.tick_i();
    }
}

/// Shared handle to a kernel object. Disposes the object when the last
/// clone goes away.
pub(crate) struct Handle<K: Copy + Into<Disposal>> {
    kernel: Kernel,
    key: K,
}

impl<K: Copy + Into<Disposal>> Handle<K> {
    pub(crate) fn new(kernel: Kernel, key: K) -> Arc<Self> {
        Arc::new(Self { kernel, key })
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub(crate) fn key(&self) -> K {
        self.key
    }

    pub(crate) fn uid(&self) -> u64 {
        self.kernel.uid()
    }
}

impl<K: Copy + Into<Disposal>> Drop for Handle<K> {
    fn drop(&mut self) {
        self.kernel.dispose(self.key.into());
    }
}
