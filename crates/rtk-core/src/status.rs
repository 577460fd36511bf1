//! Kernel result codes.
//!
//! Every blocking call resolves into one of four outcomes. They are plain
//! values rather than errors because the same paths run in interrupt context,
//! where there is nobody to unwind to.

use core::fmt;

/// Wake-up message delivered to a thread, or the payload of a synchronous
/// message exchange.
pub type Msg = isize;

/// Normal wake-up.
pub const MSG_OK: Msg = 0;
/// Wake-up caused by a timeout.
pub const MSG_TIMEOUT: Msg = -1;
/// Wake-up caused by a reset of the object the thread waited on.
pub const MSG_RESET: Msg = -2;

/// Outcome of a wait, lock or `try_*` operation.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The operation completed.
    Ok,
    /// A timeout-capable wait ran out of time.
    Timeout,
    /// The object was reset while the caller waited on it.
    Reset,
    /// A non-blocking variant would have had to wait.
    WouldBlock,
}

impl Status {
    /// Maps a wake-up message onto a status. Any value other than the
    /// reserved timeout and reset codes counts as success.
    pub const fn from_msg(msg: Msg) -> Self {
        match msg {
            MSG_TIMEOUT => Status::Timeout,
            MSG_RESET => Status::Reset,
            _ => Status::Ok,
        }
    }

    /// The wake-up message equivalent of this status.
    pub const fn to_msg(self) -> Msg {
        match self {
            Status::Ok => MSG_OK,
            Status::Timeout | Status::WouldBlock => MSG_TIMEOUT,
            Status::Reset => MSG_RESET,
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }

    pub const fn is_timeout(self) -> bool {
        matches!(self, Status::Timeout)
    }

    pub const fn is_reset(self) -> bool {
        matches!(self, Status::Reset)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Timeout => write!(f, "timed out"),
            Status::Reset => write!(f, "object reset"),
            Status::WouldBlock => write!(f, "operation would block"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Status::Ok => defmt::write!(fmt, "Ok"),
            Status::Timeout => defmt::write!(fmt, "Timeout"),
            Status::Reset => defmt::write!(fmt, "Reset"),
            Status::WouldBlock => defmt::write!(fmt, "WouldBlock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_map_to_status() {
        assert_eq!(Status::from_msg(MSG_OK), Status::Ok);
        assert_eq!(Status::from_msg(42), Status::Ok);
        assert_eq!(Status::from_msg(MSG_TIMEOUT), Status::Timeout);
        assert_eq!(Status::from_msg(MSG_RESET), Status::Reset);
        assert_eq!(Status::Reset.to_msg(), MSG_RESET);
        assert!(Status::Timeout.is_timeout());
    }
}
