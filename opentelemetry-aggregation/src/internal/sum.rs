use crate::data::PointValue;
use crate::error::MetricResult;
use crate::Temporality;

use super::aggregator::Aggregator;
use super::private::AtomicTracker;
use super::Number;

/// Running total of all measurements.
pub(crate) struct SumTracker<T: Number> {
    value: T::AtomicTracker,
}

impl<T: Number> Aggregator<T> for SumTracker<T> {
    type Config = ();
    /// The total reported by the previous delta collection.
    type Baseline = T;

    fn create(_config: &(), _readers: &[Temporality]) -> MetricResult<Self> {
        Ok(SumTracker {
            value: T::new_atomic_tracker(T::default()),
        })
    }

    fn update(&self, _config: &(), measurement: T) {
        self.value.add(measurement)
    }

    fn collect(
        &self,
        _config: &(),
        _reader: usize,
        temporality: Temporality,
        baseline: &mut T,
    ) -> MetricResult<PointValue<T>> {
        let total = self.value.get_value();
        let value = match temporality {
            Temporality::Delta => {
                let delta = total - *baseline;
                *baseline = total;
                delta
            }
            _ => total,
        };
        Ok(PointValue::Sum(value))
    }

    fn reset(&self, _config: &()) {
        self.value.store(T::default())
    }
}
