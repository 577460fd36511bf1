//! Thread priorities.

use core::fmt;

/// Scheduling priority of a thread. Larger values are more urgent.
///
/// Level 0 is reserved for the idle state and never given to a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Idle level, below every thread.
    pub const IDLE: Priority = Priority(0);

    /// Lowest priority usable by a thread.
    pub const LOW: Priority = Priority(1);

    /// Default priority of the main thread.
    pub const NORMAL: Priority = Priority(128);

    /// Highest priority.
    pub const HIGH: Priority = Priority(255);

    /// Number of distinct levels.
    pub const LEVELS: usize = 256;

    pub const fn new(priority: u8) -> Self {
        Priority(priority)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Returns true if a thread may run at this level.
    pub const fn is_valid(self) -> bool {
        self.0 > Self::IDLE.0
    }

    /// Moves `levels` steps towards [`Priority::HIGH`], clamping at the top.
    pub const fn raised(self, levels: u8) -> Self {
        Priority(self.0.saturating_add(levels))
    }

    /// Moves `levels` steps towards [`Priority::LOW`], clamping at the bottom.
    pub const fn lowered(self, levels: u8) -> Self {
        let p = self.0.saturating_sub(levels);
        if p < Self::LOW.0 {
            Self::LOW
        } else {
            Priority(p)
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Creates a [`Priority`] from a literal.
#[macro_export]
macro_rules! priority {
    ($value:literal) => {
        $crate::Priority::new($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_levels_are_ordered() {
        assert!(Priority::IDLE < Priority::LOW);
        assert!(Priority::LOW < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::HIGH);
        assert!(!Priority::IDLE.is_valid());
        assert!(Priority::LOW.is_valid());
    }

    #[test]
    fn raising_and_lowering_clamp() {
        assert_eq!(Priority::HIGH.raised(3), Priority::HIGH);
        assert_eq!(Priority::new(2).lowered(5), Priority::LOW);
        assert_eq!(Priority::NORMAL.raised(2), Priority::new(130));
        assert_eq!(priority!(7), Priority::new(7));
    }
}
