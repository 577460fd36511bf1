//! System time and tick intervals.
//!
//! The kernel counts time in ticks of a fixed-rate tick source. [`SysTime`]
//! is an absolute, wrapping tick stamp; [`Interval`] is a relative number of
//! ticks with two reserved values, [`Interval::IMMEDIATE`] and
//! [`Interval::INFINITE`], used as timeouts.

use core::fmt;

/// Absolute system time in ticks. Wraps around on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SysTime(u32);

impl SysTime {
    pub const ZERO: SysTime = SysTime(0);

    pub const fn new(ticks: u32) -> Self {
        SysTime(ticks)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Advances by one tick.
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Returns the time stamp `interval` ticks later.
    pub const fn add(self, interval: Interval) -> SysTime {
        SysTime(self.0.wrapping_add(interval.0))
    }

    /// Ticks elapsed since `earlier`, modulo the counter width.
    pub const fn elapsed_since(self, earlier: SysTime) -> Interval {
        Interval(self.0.wrapping_sub(earlier.0))
    }

    /// Returns true if `self` lies in the half-open window `[start, end)`.
    ///
    /// The window may straddle the wrap point. An empty window (`start ==
    /// end`) contains nothing.
    pub const fn is_within(self, start: SysTime, end: SysTime) -> bool {
        self.0.wrapping_sub(start.0) < end.0.wrapping_sub(start.0)
    }

    /// Ticks from `self` until `deadline`, or `None` if the deadline is not
    /// in the future. "Future" means less than half the counter range ahead.
    pub const fn until(self, deadline: SysTime) -> Option<Interval> {
        let delta = deadline.0.wrapping_sub(self.0) as i32;
        if delta > 0 {
            Some(Interval(delta as u32))
        } else {
            None
        }
    }
}

impl fmt::Display for SysTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SysTime {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "@{}", self.0);
    }
}

/// Relative time in ticks, also used as a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Interval(u32);

impl Interval {
    /// Do not wait at all.
    pub const IMMEDIATE: Interval = Interval(0);

    /// Wait forever.
    pub const INFINITE: Interval = Interval(u32::MAX);

    /// Largest finite interval.
    pub const MAX: Interval = Interval(u32::MAX - 1);

    pub const fn ticks(ticks: u32) -> Self {
        Interval(ticks)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_immediate(self) -> bool {
        self.0 == 0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == u32::MAX
    }

    /// Converts milliseconds to ticks at `hz`, rounding up.
    pub const fn from_millis(ms: u32, hz: u32) -> Self {
        Self::scaled(ms as u64, hz as u64, 1_000)
    }

    /// Converts microseconds to ticks at `hz`, rounding up.
    pub const fn from_micros(us: u32, hz: u32) -> Self {
        Self::scaled(us as u64, hz as u64, 1_000_000)
    }

    /// Converts seconds to ticks at `hz`.
    pub const fn from_secs(secs: u32, hz: u32) -> Self {
        Self::scaled(secs as u64, hz as u64, 1)
    }

    /// Converts to milliseconds at `hz`, rounding up.
    pub const fn as_millis(self, hz: u32) -> u64 {
        (self.0 as u64 * 1_000 + hz as u64 - 1) / hz as u64
    }

    const fn scaled(value: u64, hz: u64, per_sec: u64) -> Self {
        let ticks = (value * hz + per_sec - 1) / per_sec;
        if ticks > Self::MAX.0 as u64 {
            Self::MAX
        } else {
            Interval(ticks as u32)
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::IMMEDIATE => write!(f, "immediate"),
            Self::INFINITE => write!(f, "infinite"),
            Interval(t) => write!(f, "{t}ticks"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Interval {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}ticks", self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_up() {
        assert_eq!(Interval::from_millis(10, 1000), Interval::ticks(10));
        assert_eq!(Interval::from_millis(1, 100), Interval::ticks(1));
        assert_eq!(Interval::from_millis(15, 100), Interval::ticks(2));
        assert_eq!(Interval::from_secs(2, 100), Interval::ticks(200));
        assert_eq!(Interval::from_millis(u32::MAX, 1_000_000), Interval::MAX);
        assert_eq!(Interval::ticks(3).as_millis(1000), 3);
    }

    #[test]
    fn window_wraps() {
        let start = SysTime::new(u32::MAX - 2);
        let end = start.add(Interval::ticks(5));
        assert!(SysTime::new(u32::MAX).is_within(start, end));
        assert!(SysTime::new(1).is_within(start, end));
        assert!(!end.is_within(start, end));
        assert!(!start.is_within(start, start));
    }

    #[test]
    fn until_only_counts_the_future() {
        let now = SysTime::new(100);
        assert_eq!(now.until(SysTime::new(105)), Some(Interval::ticks(5)));
        assert_eq!(now.until(now), None);
        assert_eq!(now.until(SysTime::new(90)), None);
        let near_wrap = SysTime::new(u32::MAX);
        assert_eq!(near_wrap.until(SysTime::new(1)), Some(Interval::ticks(2)));
    }

    #[test]
    fn elapsed_wraps() {
        let t0 = SysTime::new(u32::MAX);
        let mut t1 = t0;
        t1.increment();
        t1.increment();
        assert_eq!(t1.elapsed_since(t0), Interval::ticks(2));
    }
}
