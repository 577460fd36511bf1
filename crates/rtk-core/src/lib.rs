#![no_std]
#![forbid(unsafe_code)]

//! # rtk-core
//!
//! Vocabulary types shared by the rtk kernel and its collaborators. Nothing
//! here touches kernel state; the types are plain values that can be used in
//! interrupt handlers, timer callbacks and thread bodies alike.
//!
//! - [`priority`] – thread priorities and the well-known levels.
//! - [`time`]     – system time stamps and tick intervals.
//! - [`status`]   – the kernel's result codes and wake-up messages.
//! - [`events`]   – event masks and source flags.

pub mod events;
pub mod priority;
pub mod status;
pub mod time;

pub use events::{EventFlags, EventMask};
pub use priority::Priority;
pub use status::{Msg, Status, MSG_OK, MSG_RESET, MSG_TIMEOUT};
pub use time::{Interval, SysTime};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
