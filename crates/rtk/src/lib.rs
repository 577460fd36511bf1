//! # rtk - Preemptive Priority Kernel
//!
//! A fixed-priority preemptive kernel hosted on operating-system threads.
//! Every kernel thread is backed by a host thread, but only the thread the
//! scheduler has picked ever runs; the others stay parked inside the kernel.
//! That gives the scheduling behaviour of a single-core microcontroller
//! kernel with deterministic, testable outcomes.
//!
//! ## Architecture
//!
//! **Kernel state**: one [`Kernel`] instance owns every list: threads, the
//! ready list, the virtual-timer delta queue and the control blocks of all
//! primitives. Independent kernels can coexist in one process.
//!
//! **Calling conventions**: blocking (S-class) calls are methods on
//! [`Kernel`] and on the object handles. Non-blocking (I-class) calls end in
//! `_i` and take a [`Sys`] token, which only exists inside a critical
//! section: [`Kernel::isr`], [`Kernel::lock`] or a timer callback.
//!
//! **Errors**: blocking calls return a [`Status`] (or a raw [`Msg`]);
//! setup calls return [`KernelError`]; misuse halts the kernel.
//!
//! ## Module Overview
//!
//! - [`kernel`] - kernel handle, critical sections and interrupt entry
//! - [`config`] - kernel configuration and builder
//! - [`thread`] - thread creation, lifecycle, priorities and sleeps
//! - [`vt`] - virtual timers and the tick handler
//! - [`mutex`], [`sem`], [`condvar`] - synchronization primitives
//! - [`events`] - event sources and per-thread event masks
//! - [`msg`] - synchronous messages
//! - [`reference`] - thread references and thread queues
//! - [`trace`] - context-switch trace buffer
//! - [`ticker`] - host tick source

mod arena;
pub mod condvar;
pub mod config;
pub mod error;
pub mod events;
mod integrity;
pub mod kernel;
mod list;
pub mod msg;
pub mod mutex;
pub mod reference;
mod sched;
pub mod sem;
mod state;
pub mod thread;
pub mod ticker;
pub mod trace;
pub mod vt;

pub use condvar::CondVar;
pub use config::{IdlePolicy, KernelConfig, KernelConfigBuilder, DEFAULT_STACK_SIZE};
pub use error::KernelError;
pub use events::{EventListener, EventSource};
pub use kernel::{Kernel, KernelBuilder, Sys};
pub use mutex::Mutex;
pub use reference::{ThreadReference, ThreadsQueue};
pub use sem::{BinarySemaphore, Semaphore};
pub use thread::{Thread, ThreadConfig, ThreadId, ThreadInfo, ThreadState, WaitReason};
pub use ticker::Ticker;
pub use trace::{TraceEvent, TraceHook, TRACE_DEPTH};
pub use vt::{TimerCallback, VirtualTimer};

pub use rtk_core::{
    priority, EventFlags, EventMask, Interval, Msg, Priority, Status, SysTime, MSG_OK, MSG_RESET,
    MSG_TIMEOUT,
};
