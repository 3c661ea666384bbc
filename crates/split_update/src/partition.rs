//! Range planning: cuts `[min, max]` of the split column into width-aligned
//! closed intervals, one per transaction unit.

use rand::seq::SliceRandom;
use rand::Rng;

/// Closed interval of split-column values covered by one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyRange {
    pub start: i64,
    pub end: i64,
}

impl KeyRange {
    /// Number of distinct values inside the range.
    pub fn span(&self) -> u128 {
        (i128::from(self.end) - i128::from(self.start) + 1) as u128
    }
}

/// Largest plan a single session may hold.
pub const MAX_PLANNED_RANGES: u128 = 1_000_000;

/// Number of ranges [`plan_ranges`] would return, without allocating them.
pub fn planned_range_count(min: i64, max: i64, width: i64) -> u128 {
    if width <= 0 || max < min {
        return 0;
    }
    let width = i128::from(width);
    let first = i128::from(min).div_euclid(width);
    let last = i128::from(max).div_euclid(width);
    (last - first + 1) as u128
}

/// Plans the aligned intervals `[i*width, (i+1)*width - 1]` that intersect
/// `[min, max]`, clipped to those bounds, in ascending order.
///
/// Returns an empty plan when `width <= 0` or `max < min`; otherwise at
/// least one range. Computed in `i128` so the `i64` extremes do not overflow.
pub fn plan_ranges(min: i64, max: i64, width: i64) -> Vec<KeyRange> {
    if width <= 0 || max < min {
        return Vec::new();
    }
    let width = i128::from(width);
    let lo = i128::from(min);
    let hi = i128::from(max);
    let first = lo.div_euclid(width);
    let last = hi.div_euclid(width);

    let mut ranges = Vec::with_capacity((last - first + 1).min(1 << 20) as usize);
    for i in first..=last {
        let start = (i * width).max(lo);
        let end = ((i + 1) * width - 1).min(hi);
        // Intervals are generated only for buckets that contain lo..=hi values.
        ranges.push(KeyRange {
            start: start as i64,
            end: end as i64,
        });
    }
    ranges
}

/// Permutes `items` uniformly at random (Fisher-Yates).
pub fn shuffle_in_place<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    items.shuffle(rng);
}
