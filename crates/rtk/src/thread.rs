//! Thread control blocks, thread handles and the host-thread wrapper.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Condvar;
use rtk_core::{EventMask, Interval, Msg, Priority, SysTime, MSG_OK, MSG_RESET};

use crate::arena::{arena_key, Arena};
use crate::condvar::CondKey;
use crate::error::KernelError;
use crate::kernel::{bind_host_thread, unbind_host_thread, Handle, Kernel, SysGuard};
use crate::list::{Link, ThreadQueue};
use crate::mutex::MutexKey;
use crate::reference::{QueueKey, RefKey};
use crate::sem::SemKey;
use crate::state::KernelState;
use crate::vt::{Expiry, TimerKey};

arena_key! {
    /// Identity of a kernel thread. Stays unique for the kernel's lifetime
    /// even after the thread's storage is reused.
    pub struct ThreadId;
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}:{}", self.index, self.generation)
    }
}

pub(crate) type Threads = Arena<ThreadId, Tcb>;

/// Scheduler-level state, including the object a thread is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Current,
    Ready,
    /// Created but not yet started.
    Starting,
    Suspended(RefKey),
    Sleeping,
    WaitSem(SemKey),
    WaitMutex(MutexKey),
    WaitCond(CondKey),
    WaitQueue(QueueKey),
    WaitAnyEvent,
    WaitAllEvents,
    /// Queued on the target's message queue.
    SendQueued(ThreadId),
    /// Message taken by the target, reply outstanding.
    SendPending(ThreadId),
    WaitMessage,
    WaitExit(ThreadId),
    Final,
}

/// Observable thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Suspended,
    Waiting(WaitReason),
    Sleeping,
    Final,
}

/// What a waiting thread is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Semaphore,
    Mutex,
    CondVar,
    Queue,
    AnyEvent,
    AllEvents,
    Send,
    Reply,
    Message,
    Exit,
}

impl State {
    pub(crate) fn observable(self) -> ThreadState {
        match self {
            State::Current => ThreadState::Running,
            State::Ready => ThreadState::Ready,
            State::Starting | State::Suspended(_) => ThreadState::Suspended,
            State::Sleeping => ThreadState::Sleeping,
            State::WaitSem(_) => ThreadState::Waiting(WaitReason::Semaphore),
            State::WaitMutex(_) => ThreadState::Waiting(WaitReason::Mutex),
            State::WaitCond(_) => ThreadState::Waiting(WaitReason::CondVar),
            State::WaitQueue(_) => ThreadState::Waiting(WaitReason::Queue),
            State::WaitAnyEvent => ThreadState::Waiting(WaitReason::AnyEvent),
            State::WaitAllEvents => ThreadState::Waiting(WaitReason::AllEvents),
            State::SendQueued(_) => ThreadState::Waiting(WaitReason::Send),
            State::SendPending(_) => ThreadState::Waiting(WaitReason::Reply),
            State::WaitMessage => ThreadState::Waiting(WaitReason::Message),
            State::WaitExit(_) => ThreadState::Waiting(WaitReason::Exit),
            State::Final => ThreadState::Final,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadState::Ready => write!(f, "ready"),
            ThreadState::Running => write!(f, "running"),
            ThreadState::Suspended => write!(f, "suspended"),
            ThreadState::Waiting(reason) => write!(f, "waiting ({reason:?})"),
            ThreadState::Sleeping => write!(f, "sleeping"),
            ThreadState::Final => write!(f, "final"),
        }
    }
}

/// Thread control block.
pub(crate) struct Tcb {
    pub(crate) name: String,
    /// Effective priority.
    pub(crate) prio: Priority,
    /// Nominal priority.
    pub(crate) real_prio: Priority,
    pub(crate) state: State,
    /// Ticks left in the round-robin slice.
    pub(crate) slice: u32,
    pub(crate) link: Link,
    /// Message delivered by whoever readied this thread.
    pub(crate) wake: Msg,
    pub(crate) baton: Arc<Condvar>,
    /// Private timer used by every timed wait.
    pub(crate) timer: TimerKey,
    /// Outstanding [`Thread`] handles.
    pub(crate) refs: u32,
    pub(crate) terminate: bool,
    pub(crate) exit_code: Msg,
    pub(crate) joiners: ThreadQueue,
    pub(crate) senders: ThreadQueue,
    /// Message carried while in `SendQueued`/`SendPending`.
    pub(crate) sent: Msg,
    /// Mutexes held, in acquisition order.
    pub(crate) held: Vec<MutexKey>,
    /// Pending events.
    pub(crate) events: EventMask,
    pub(crate) wait_mask: EventMask,
}

/// Parameters of a new thread.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    pub name: String,
    pub priority: Priority,
    pub stack_size: Option<usize>,
}

impl ThreadConfig {
    pub fn new(name: impl Into<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            priority,
            stack_size: None,
        }
    }

    /// Host stack size, overriding the kernel default.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// Registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub priority: Priority,
    pub nominal_priority: Priority,
    pub state: ThreadState,
}

/// Counted reference to a kernel thread.
///
/// The thread's storage is reclaimed once it has terminated and every
/// `Thread` referring to it has been dropped or joined.
#[derive(Clone)]
pub struct Thread {
    handle: Arc<Handle<ThreadId>>,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thread").field(&self.id()).finish()
    }
}

impl Thread {
    pub fn id(&self) -> ThreadId {
        self.handle.key()
    }

    fn kernel(&self) -> &Kernel {
        self.handle.kernel()
    }

    pub(crate) fn uid(&self) -> u64 {
        self.handle.uid()
    }

    /// Starts a thread created with [`Kernel::spawn_suspended`].
    pub fn start(&self) {
        let t = self.id();
        let mut guard = self.kernel().lock_s();
        let st = &mut *guard.st;
        if st.threads[t].state != State::Starting {
            st.fatal(format!("thread {t} started twice"));
        }
        st.wake_i(t, MSG_OK);
        guard.reschedule();
    }

    /// Waits for the thread to terminate and returns its exit code.
    pub fn join(self) -> Msg {
        let t = self.id();
        let mut guard = self.kernel().lock_s();
        let me = guard.me;
        if t == me {
            guard.st.fatal(format!("thread {t} joined itself"));
        }
        if guard.st.threads[t].state != State::Final {
            let st = &mut *guard.st;
            let mut joiners = st.threads[t].joiners;
            joiners.push_back(&mut st.threads, me);
            st.threads[t].joiners = joiners;
            guard.go_sleep(State::WaitExit(t));
        }
        guard.st.threads[t].exit_code
    }

    /// Asks the thread to exit. The thread has to poll
    /// [`Kernel::should_terminate`] and return on its own.
    pub fn request_terminate(&self) {
        let t = self.id();
        self.kernel().lock_state().threads[t].terminate = true;
    }

    /// Changes the thread's nominal priority and returns its previous
    /// effective priority.
    pub fn set_priority(&self, priority: Priority) -> Priority {
        self.kernel().set_priority_of(self.id(), priority)
    }

    pub fn priority(&self) -> Priority {
        self.kernel().lock_state().threads[self.id()].prio
    }

    pub fn nominal_priority(&self) -> Priority {
        self.kernel().lock_state().threads[self.id()].real_prio
    }

    pub fn state(&self) -> ThreadState {
        self.kernel().lock_state().threads[self.id()].state.observable()
    }

    pub fn name(&self) -> String {
        self.kernel().lock_state().threads[self.id()].name.clone()
    }
}

impl KernelState {
    /// Allocates a TCB in the `Starting` state with one reference.
    pub(crate) fn create_thread(&mut self, name: String, prio: Priority) -> Option<ThreadId> {
        let timers = &mut self.timers;
        let slice = self.quantum;
        self.threads.insert_with(|id| Tcb {
            name,
            prio,
            real_prio: prio,
            state: State::Starting,
            slice,
            link: Link::default(),
            wake: MSG_OK,
            baton: Arc::new(Condvar::new()),
            timer: timers.alloc(Expiry::Wakeup(id)),
            refs: 1,
            terminate: false,
            exit_code: MSG_OK,
            joiners: ThreadQueue::EMPTY,
            senders: ThreadQueue::EMPTY,
            sent: MSG_OK,
            held: Vec::new(),
            events: EventMask::EMPTY,
            wait_mask: EventMask::EMPTY,
        })
    }

    /// Registers the building host thread as the running main thread.
    pub(crate) fn start_main_thread(&mut self, prio: Priority) -> ThreadId {
        let Some(main) = self.create_thread("main".into(), prio) else {
            self.fatal("no storage for the main thread");
        };
        let tcb = &mut self.threads[main];
        tcb.refs = 0;
        tcb.state = State::Current;
        self.current = Some(main);
        main
    }

    /// Drops one [`Thread`] reference.
    pub(crate) fn release_thread(&mut self, t: ThreadId) {
        let Some(tcb) = self.threads.get_mut(t) else {
            log::warn!("release of unknown thread {t}");
            return;
        };
        tcb.refs = tcb.refs.saturating_sub(1);
        if tcb.refs > 0 {
            return;
        }
        // A thread that never started has its host thread parked; it exits
        // once the TCB is gone.
        match tcb.state {
            State::Final => self.free_thread(t),
            State::Starting => {
                self.release_waiters(t);
                self.free_thread(t);
            }
            _ => {}
        }
    }

    pub(crate) fn free_thread(&mut self, t: ThreadId) {
        if let Some(tcb) = self.threads.remove(t) {
            self.timers.free(tcb.timer);
            tcb.baton.notify_one();
            log::debug!("thread {t} ({}) reclaimed", tcb.name);
        }
    }

    /// Terminates `me` with `code`: wakes joiners, releases senders and
    /// leaves the TCB in `Final` until its last reference goes.
    pub(crate) fn exit_thread(&mut self, me: ThreadId, code: Msg) {
        if !self.threads[me].held.is_empty() {
            self.fatal(format!("thread {me} exited while holding mutexes"));
        }
        let tcb = &mut self.threads[me];
        tcb.state = State::Final;
        tcb.exit_code = code;
        self.release_waiters(me);
        log::debug!("thread {me} exited with {code}");
        if self.threads[me].refs == 0 {
            self.free_thread(me);
        }
    }

    /// Wakes everything waiting on `t`: joiners with `MSG_OK`, queued and
    /// pending senders with `MSG_RESET`.
    fn release_waiters(&mut self, t: ThreadId) {
        let tcb = &mut self.threads[t];
        let mut joiners = std::mem::take(&mut tcb.joiners);
        let mut senders = std::mem::take(&mut tcb.senders);
        while let Some(j) = joiners.pop_front(&mut self.threads) {
            self.wake_i(j, MSG_OK);
        }
        while let Some(s) = senders.pop_front(&mut self.threads) {
            self.wake_i(s, MSG_RESET);
        }
        let pending: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(_, tcb)| tcb.state == State::SendPending(t))
            .map(|(id, _)| id)
            .collect();
        for s in pending {
            self.wake_i(s, MSG_RESET);
        }
    }

    /// Sets the nominal priority of `t` and returns its previous effective
    /// priority.
    pub(crate) fn set_priority(&mut self, t: ThreadId, prio: Priority) -> Priority {
        let old = self.threads[t].prio;
        self.threads[t].real_prio = prio;
        let effective = self.inherited_priority(t);
        self.reprioritize(t, effective);
        old
    }

    fn info(&self, id: ThreadId, tcb: &Tcb) -> ThreadInfo {
        ThreadInfo {
            id,
            name: tcb.name.clone(),
            priority: tcb.prio,
            nominal_priority: tcb.real_prio,
            state: tcb.state.observable(),
        }
    }
}

impl Kernel {
    /// Creates a thread and starts it. The new thread preempts the caller if
    /// its priority is higher.
    pub fn spawn<F>(&self, config: ThreadConfig, body: F) -> Result<Thread, KernelError>
    where
        F: FnOnce(&Kernel) -> Msg + Send + 'static,
    {
        let thread = self.spawn_suspended(config, body)?;
        thread.start();
        Ok(thread)
    }

    /// Creates a thread that does not run until [`Thread::start`].
    pub fn spawn_suspended<F>(&self, config: ThreadConfig, body: F) -> Result<Thread, KernelError>
    where
        F: FnOnce(&Kernel) -> Msg + Send + 'static,
    {
        if !config.priority.is_valid() {
            return Err(KernelError::InvalidPriority(config.priority));
        }
        let stack_size = config.stack_size.unwrap_or(self.config().stack_size);
        let mut guard = self.lock_s();
        let Some(id) = guard.st.create_thread(config.name.clone(), config.priority) else {
            guard.st.fatal("thread storage exhausted");
        };

        let kernel = self.clone();
        let spawned = std::thread::Builder::new()
            .name(config.name.clone())
            .stack_size(stack_size)
            .spawn(move || thread_main(kernel, id, body));
        if let Err(err) = spawned {
            guard.st.free_thread(id);
            return Err(KernelError::Spawn(err));
        }
        drop(guard);

        log::debug!(
            "{}: spawned thread {id} ({}) at {}",
            self.config().name,
            config.name,
            config.priority
        );
        Ok(Thread {
            handle: Handle::new(self.clone(), id),
        })
    }

    /// Looks a thread up by name and returns a new reference to it.
    pub fn find_thread(&self, name: &str) -> Option<Thread> {
        let mut st = self.lock_state();
        let id = st
            .threads
            .iter()
            .find(|(_, tcb)| tcb.name == name && tcb.state != State::Final)
            .map(|(id, _)| id)?;
        st.threads[id].refs += 1;
        drop(st);
        Some(Thread {
            handle: Handle::new(self.clone(), id),
        })
    }

    /// The running kernel thread, or `None` when idle.
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.lock_state().current
    }

    /// Effective priority of the calling thread.
    pub fn priority(&self) -> Priority {
        let guard = self.lock_s();
        guard.st.threads[guard.me].prio
    }

    /// Nominal priority of the calling thread.
    pub fn nominal_priority(&self) -> Priority {
        let guard = self.lock_s();
        guard.st.threads[guard.me].real_prio
    }

    /// Changes the calling thread's nominal priority and returns its
    /// previous effective priority. An inherited boost stays in force.
    pub fn set_priority(&self, priority: Priority) -> Priority {
        let me = self.lock_s().me;
        self.set_priority_of(me, priority)
    }

    fn set_priority_of(&self, t: ThreadId, priority: Priority) -> Priority {
        let mut guard = self.lock_s();
        if !priority.is_valid() {
            guard.st.fatal(format!("{priority} cannot be assigned to a thread"));
        }
        let old = guard.st.set_priority(t, priority);
        guard.reschedule();
        old
    }

    /// Suspends the calling thread for `interval` ticks.
    pub fn sleep(&self, interval: Interval) {
        if interval.is_immediate() {
            return;
        }
        self.lock_s().go_sleep_timeout(State::Sleeping, interval);
    }

    /// Suspends the calling thread until `deadline`. Returns at once if the
    /// deadline is not in the future.
    pub fn sleep_until(&self, deadline: SysTime) {
        let mut guard = self.lock_s();
        if let Some(interval) = guard.st.timers.now().until(deadline) {
            guard.go_sleep_timeout(State::Sleeping, interval);
        }
    }

    /// Sleeps until `next` if the current time lies in `[prev, next)`, and
    /// returns `next`. Keeps periodic loops free of drift.
    pub fn sleep_until_windowed(&self, prev: SysTime, next: SysTime) -> SysTime {
        let mut guard = self.lock_s();
        let now = guard.st.timers.now();
        if now.is_within(prev, next) {
            let interval = next.elapsed_since(now);
            guard.go_sleep_timeout(State::Sleeping, interval);
        }
        next
    }

    /// Passes the CPU to the next ready thread of the same priority, if any.
    pub fn yield_now(&self) {
        self.lock_s().yield_now();
    }

    /// Whether termination of the calling thread has been requested.
    pub fn should_terminate(&self) -> bool {
        let guard = self.lock_s();
        guard.st.threads[guard.me].terminate
    }

    /// Registry snapshot.
    pub fn threads(&self) -> Vec<ThreadInfo> {
        let st = self.lock_state();
        st.threads.iter().map(|(id, tcb)| st.info(id, tcb)).collect()
    }

    pub fn thread_info(&self, id: ThreadId) -> Option<ThreadInfo> {
        let st = self.lock_state();
        st.threads.get(id).map(|tcb| st.info(id, tcb))
    }

    fn exit_s(&self, code: Msg) {
        let mut guard = self.lock_s();
        let me = guard.me;
        guard.st.exit_thread(me, code);
        guard.st.dispatch_next();
    }
}

fn thread_main<F>(kernel: Kernel, id: ThreadId, body: F)
where
    F: FnOnce(&Kernel) -> Msg,
{
    bind_host_thread(kernel.uid(), id);
    // Park until first dispatched.
    let entered = SysGuard {
        st: kernel.lock_state(),
        me: id,
    }
    .resume();
    if entered.is_ok() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let code = body(&kernel);
            kernel.exit_s(code);
        }));
        if let Err(payload) = outcome {
            if !kernel.is_halted() {
                kernel.halt(format!("thread {id} panicked: {}", panic_message(&*payload)));
            }
        }
    }
    unbind_host_thread();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_states_map_to_reasons() {
        assert_eq!(
            State::WaitMessage.observable(),
            ThreadState::Waiting(WaitReason::Message)
        );
        assert_eq!(State::Starting.observable(), ThreadState::Suspended);
        assert_eq!(State::Current.observable(), ThreadState::Running);
    }

    #[test]
    fn thread_config_overrides_stack() {
        let config = ThreadConfig::new("worker", Priority::LOW).with_stack_size(4096);
        assert_eq!(config.stack_size, Some(4096));
        assert_eq!(config.name, "worker");
    }
}
