//! Event masks and event-source flags.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

macro_rules! bitset {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            pub const EMPTY: $name = $name(0);
            pub const ALL: $name = $name(u32::MAX);

            pub const fn from_bits(bits: u32) -> Self {
                $name(bits)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// True if every bit of `other` is also set in `self`.
            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if `self` and `other` share at least one bit.
            pub const fn intersects(self, other: $name) -> bool {
                self.0 & other.0 != 0
            }

            /// The least significant set bit, or an empty set.
            pub const fn lowest(self) -> $name {
                $name(self.0 & self.0.wrapping_neg())
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }

        impl BitAndAssign for $name {
            fn bitand_assign(&mut self, rhs: $name) {
                self.0 &= rhs.0;
            }
        }

        impl Not for $name {
            type Output = $name;
            fn not(self) -> $name {
                $name(!self.0)
            }
        }

        impl fmt::Binary for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Binary::fmt(&self.0, f)
            }
        }

        #[cfg(feature = "defmt")]
        impl defmt::Format for $name {
            fn format(&self, fmt: defmt::Formatter) {
                defmt::write!(fmt, "{}({=u32:b})", stringify!($name), self.0);
            }
        }
    };
}

bitset! {
    /// Per-thread pending events. Each bit is one logical event as seen by the
    /// waiting thread.
    EventMask
}

bitset! {
    /// Flags carried by an event source broadcast, accumulated per listener.
    EventFlags
}

impl EventMask {
    /// Mask with only event `id` set.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not below 32.
    pub const fn event(id: u32) -> Self {
        assert!(id < 32, "event id out of range");
        EventMask(1 << id)
    }
}
