//! # rtk-lib
//!
//! Bounded communication objects layered on the public `rtk` API. Nothing
//! here touches kernel internals: every blocking path is a [`Semaphore`]
//! wait and every buffer update happens inside [`Kernel::lock`] or an
//! interrupt closure.
//!
//! ## Module Overview
//! - [`mailbox`]  – Fixed-capacity FIFO of messages with blocking post/fetch.
//! - [`io_queue`] – Byte queues between interrupt handlers and threads.
//!
//! [`Semaphore`]: rtk::Semaphore
//! [`Kernel::lock`]: rtk::Kernel::lock

pub mod io_queue;
pub mod mailbox;

pub use io_queue::{InputQueue, Notify, OutputQueue};
pub use mailbox::{Mailbox, Rejected};
