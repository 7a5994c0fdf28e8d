use crate::data::PointValue;
use crate::error::MetricResult;
use crate::Temporality;

use super::aggregator::Aggregator;
use super::private::AtomicTracker;
use super::Number;

/// Keeps the most recent measurement.
///
/// Delta and cumulative readers see the same value; whether a delta reader
/// reports it at all depends on the point having been updated since.
pub(crate) struct LastValueTracker<T: Number> {
    value: T::AtomicTracker,
}

impl<T: Number> Aggregator<T> for LastValueTracker<T> {
    type Config = ();
    type Baseline = ();

    fn create(_config: &(), _readers: &[Temporality]) -> MetricResult<Self> {
        Ok(LastValueTracker {
            value: T::new_atomic_tracker(T::default()),
        })
    }

    fn update(&self, _config: &(), measurement: T) {
        self.value.store(measurement)
    }

    fn collect(
        &self,
        _config: &(),
        _reader: usize,
        _temporality: Temporality,
        _baseline: &mut (),
    ) -> MetricResult<PointValue<T>> {
        Ok(PointValue::LastValue(self.value.get_value()))
    }

    fn reset(&self, _config: &()) {
        self.value.store(T::default())
    }
}
