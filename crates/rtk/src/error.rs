//! Errors reported while setting the kernel up.
//!
//! Run-time outcomes of blocking calls are [`Status`](rtk_core::Status)
//! codes, and programming errors halt the kernel. What remains are the
//! failures a caller can act on: bad configuration, a host thread that could
//! not be spawned, and integrity-check reports.

use rtk_core::Priority;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("{0} cannot be assigned to a thread")]
    InvalidPriority(Priority),
    #[error("failed to spawn host thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("kernel halted: {0}")]
    Halted(String),
    #[error("integrity check failed: {0}")]
    Integrity(String),
}
