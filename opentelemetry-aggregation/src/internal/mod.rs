mod aggregator;
mod circular_buckets;
mod exponential_bucketer;
mod exponential_histogram;
mod histogram;
mod last_value;
mod metric_point;
mod precomputed_sum;
mod sum;
mod value_map;

use core::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub(crate) use aggregator::Aggregator;
pub use circular_buckets::CircularBuckets;
pub use exponential_bucketer::{
    index_range, lower_boundary, map_to_index, EXPO_MAX_SCALE, EXPO_MIN_SCALE,
};
pub(crate) use exponential_histogram::{ExpoHistogramConfig, ExpoHistogramTracker};
pub(crate) use histogram::{HistogramConfig, HistogramTracker};
pub(crate) use last_value::LastValueTracker;
pub(crate) use precomputed_sum::{PrecomputedSumConfig, PrecomputedSumTracker};
pub(crate) use sum::SumTracker;
pub(crate) use value_map::{Aggregate, ValueMap, ValueMapConfig};

/// A numeric type measurements can be aggregated as.
///
/// Implemented for `i64`, `u64` and `f64`.
pub trait Number:
    Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
    + private::AtomicallyUpdate
{
    /// The smallest representable value.
    fn min() -> Self;
    /// The largest representable value.
    fn max() -> Self;
    /// The value as a float, which may lose precision for large integers.
    fn into_float(self) -> f64;
}

pub(crate) mod private {
    /// Atomic storage backing a [Number](super::Number).
    pub trait AtomicTracker<T>: Sync + Send + 'static {
        fn store(&self, value: T);
        fn add(&self, value: T);
        fn get_value(&self) -> T;
    }

    /// Marks a type that can have an atomic tracker generated for it
    pub trait AtomicallyUpdate: Sized {
        type AtomicTracker: AtomicTracker<Self>;
        fn new_atomic_tracker(init: Self) -> Self::AtomicTracker;
    }
}

use private::{AtomicTracker, AtomicallyUpdate};

impl Number for i64 {
    fn min() -> Self {
        i64::MIN
    }

    fn max() -> Self {
        i64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }
}

impl Number for u64 {
    fn min() -> Self {
        u64::MIN
    }

    fn max() -> Self {
        u64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }
}

impl Number for f64 {
    fn min() -> Self {
        f64::MIN
    }

    fn max() -> Self {
        f64::MAX
    }

    fn into_float(self) -> f64 {
        self
    }
}

impl AtomicTracker<u64> for AtomicU64 {
    fn store(&self, value: u64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: u64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }

}

impl AtomicallyUpdate for u64 {
    type AtomicTracker = AtomicU64;

    fn new_atomic_tracker(init: u64) -> Self::AtomicTracker {
        AtomicU64::new(init)
    }
}

impl AtomicTracker<i64> for AtomicI64 {
    fn store(&self, value: i64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: i64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> i64 {
        self.load(Ordering::Relaxed)
    }

}

impl AtomicallyUpdate for i64 {
    type AtomicTracker = AtomicI64;

    fn new_atomic_tracker(init: i64) -> Self::AtomicTracker {
        AtomicI64::new(init)
    }
}

/// An `f64` stored as its bit pattern, updated with a compare-and-swap loop.
pub struct F64AtomicTracker {
    inner: AtomicU64,
}

impl F64AtomicTracker {
    fn new(init: f64) -> Self {
        F64AtomicTracker {
            inner: AtomicU64::new(init.to_bits()),
        }
    }
}

impl AtomicTracker<f64> for F64AtomicTracker {
    fn store(&self, value: f64) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, value: f64) {
        let mut current = self.inner.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(current) + value).to_bits();
            match self.inner.compare_exchange_weak(
                current,
                new,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn get_value(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Relaxed))
    }
}

impl AtomicallyUpdate for f64 {
    type AtomicTracker = F64AtomicTracker;

    fn new_atomic_tracker(init: f64) -> Self::AtomicTracker {
        F64AtomicTracker::new(init)
    }
}
