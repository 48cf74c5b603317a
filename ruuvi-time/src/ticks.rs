use core::cmp::Ordering;

/// Raw counter values of the millisecond clock.
///
/// The counter wraps, so two values are ordered by their signed wrapping difference: `a` is
/// later than `b` when `a - b` lands in the lower half of the range. That holds while the two
/// are less than half the range apart.
pub trait Ticks: Copy + Eq {
    /// Order `self` against `other` across the wrap.
    fn compare(self, other: Self) -> Ordering;

    /// `self` is `other` or later.
    fn is_at_least(self, other: Self) -> bool {
        self.compare(other).is_ge()
    }
}

impl Ticks for u32 {
    fn compare(self, other: Self) -> Ordering {
        let delta = self.wrapping_sub(other) as i32;
        delta.cmp(&0)
    }
}
