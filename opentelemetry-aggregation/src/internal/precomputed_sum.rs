use crate::data::PointValue;
use crate::error::MetricResult;
use crate::Temporality;

use super::aggregator::Aggregator;
use super::private::AtomicTracker;
use super::Number;

pub(crate) struct PrecomputedSumConfig {
    /// The observed totals never decrease unless the observer restarted.
    pub(crate) monotonic: bool,
}

/// Keeps the latest total reported by an observable counter.
///
/// Measurements are running totals, so cumulative readers see the last one
/// and delta readers its difference from what they exported previously.
pub(crate) struct PrecomputedSumTracker<T: Number> {
    value: T::AtomicTracker,
}

impl<T: Number> Aggregator<T> for PrecomputedSumTracker<T> {
    type Config = PrecomputedSumConfig;
    /// The total observed at the previous delta collection.
    type Baseline = T;

    fn create(_config: &PrecomputedSumConfig, _readers: &[Temporality]) -> MetricResult<Self> {
        Ok(PrecomputedSumTracker {
            value: T::new_atomic_tracker(T::default()),
        })
    }

    fn update(&self, _config: &PrecomputedSumConfig, measurement: T) {
        self.value.store(measurement)
    }

    fn collect(
        &self,
        config: &PrecomputedSumConfig,
        _reader: usize,
        temporality: Temporality,
        baseline: &mut T,
    ) -> MetricResult<PointValue<T>> {
        let total = self.value.get_value();
        let value = match temporality {
            Temporality::Delta => {
                // a monotonic or unsigned total that went down was restarted
                let restarted =
                    total < *baseline && (config.monotonic || T::min() == T::default());
                let delta = if restarted { total } else { total - *baseline };
                *baseline = total;
                delta
            }
            _ => total,
        };
        Ok(PointValue::Sum(value))
    }

    fn reset(&self, _config: &PrecomputedSumConfig) {
        self.value.store(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONOTONIC: PrecomputedSumConfig = PrecomputedSumConfig { monotonic: true };
    const UP_DOWN: PrecomputedSumConfig = PrecomputedSumConfig { monotonic: false };

    #[test]
    fn cumulative_reports_latest_observation() {
        let sum = PrecomputedSumTracker::<u64>::create(&MONOTONIC, &[Temporality::Cumulative])
            .unwrap();
        let mut baseline = 0;

        sum.update(&MONOTONIC, 10);
        let first = sum.collect(&MONOTONIC, 0, Temporality::Cumulative, &mut baseline);
        sum.update(&MONOTONIC, 15);
        let second = sum.collect(&MONOTONIC, 0, Temporality::Cumulative, &mut baseline);

        assert_eq!(first.unwrap(), PointValue::Sum(10));
        assert_eq!(second.unwrap(), PointValue::Sum(15));
    }

    #[test]
    fn delta_subtracts_previous_observation() {
        let sum =
            PrecomputedSumTracker::<i64>::create(&UP_DOWN, &[Temporality::Delta; 2]).unwrap();
        let mut first_reader = 0;
        let mut second_reader = 0;

        sum.update(&UP_DOWN, 10);
        let a = sum.collect(&UP_DOWN, 0, Temporality::Delta, &mut first_reader);
        sum.update(&UP_DOWN, 12);
        sum.update(&UP_DOWN, 7);
        let b = sum.collect(&UP_DOWN, 0, Temporality::Delta, &mut first_reader);
        let c = sum.collect(&UP_DOWN, 1, Temporality::Delta, &mut second_reader);

        assert_eq!(a.unwrap(), PointValue::Sum(10));
        assert_eq!(b.unwrap(), PointValue::Sum(-3));
        assert_eq!(c.unwrap(), PointValue::Sum(7));
    }

    #[test]
    fn monotonic_total_going_down_starts_over() {
        let sum = PrecomputedSumTracker::<u64>::create(&MONOTONIC, &[Temporality::Delta]).unwrap();
        let mut baseline = 0;

        sum.update(&MONOTONIC, 100);
        sum.collect(&MONOTONIC, 0, Temporality::Delta, &mut baseline)
            .unwrap();
        sum.update(&MONOTONIC, 4);
        let value = sum.collect(&MONOTONIC, 0, Temporality::Delta, &mut baseline);

        assert_eq!(value.unwrap(), PointValue::Sum(4));
        assert_eq!(baseline, 4);
    }
}
