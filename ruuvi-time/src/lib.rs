//! Time-related traits & structs.
//!
//! The tracker runs off a free running millisecond counter that wraps at 2^32. Everything here
//! compares ticks through their wrapping difference, so instants stay ordered across the wrap
//! as long as they are within half the counter range (about 24 days) of each other.

#![no_std]
#![deny(missing_docs)]

mod ticks;
pub mod timer_queue;

pub use fugit::{self, ExtU32};
pub use ticks::Ticks;
pub use timer_queue::{TimerEntry, TimerKey, TimerQueue};

/// A point in time of the millisecond counter.
pub type Instant = fugit::TimerInstantU32<1000>;

/// A span of milliseconds.
pub type Duration = fugit::TimerDurationU32<1000>;

/// This indicates that there was a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TimeoutError;

/// # A monotonic millisecond clock.
///
/// Implemented by the board (SysTick or RTC counter) and by the host mocks. The counter is
/// expected to wrap at 2^32; callers never compare raw values, see [`is_at_least`].
pub trait Clock {
    /// Get the current time.
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// True if `instant` is the same as `other` or later, wraparound-safe.
#[inline]
pub fn is_at_least(instant: Instant, other: Instant) -> bool {
    instant.ticks().is_at_least(other.ticks())
}

/// The instant `duration` after `instant`, wrapping at the counter boundary.
#[inline]
pub fn after(instant: Instant, duration: Duration) -> Instant {
    Instant::from_ticks(instant.ticks().wrapping_add(duration.ticks()))
}

/// Time left from `now` until `deadline`, zero once the deadline has passed.
#[inline]
pub fn remaining(now: Instant, deadline: Instant) -> Duration {
    if is_at_least(now, deadline) {
        Duration::from_ticks(0)
    } else {
        Duration::from_ticks(deadline.ticks().wrapping_sub(now.ticks()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_wraps_around() {
        let near_end = Instant::from_ticks(u32::MAX - 10);
        let later = after(near_end, 5000.millis());
        assert_eq!(later.ticks(), 4989);
        assert!(is_at_least(later, near_end));
        assert!(!is_at_least(near_end, later));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let now = Instant::from_ticks(100);
        assert_eq!(remaining(now, Instant::from_ticks(40)).ticks(), 0);
        assert_eq!(remaining(now, Instant::from_ticks(150)).ticks(), 50);
        let wrapped = Instant::from_ticks(20);
        let before_wrap = Instant::from_ticks(u32::MAX - 9);
        assert_eq!(remaining(before_wrap, wrapped).ticks(), 30);
    }
}
