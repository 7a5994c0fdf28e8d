use std::sync::Mutex;

use crate::data::{HistogramValue, PointValue};
use crate::error::MetricResult;
use crate::Temporality;

use super::aggregator::Aggregator;
use super::Number;

/// Bucket boundaries shared by every point of an explicit bucket histogram.
pub(crate) struct HistogramConfig {
    /// Sorted, NaN free upper bounds.
    pub(crate) bounds: Vec<f64>,
    pub(crate) record_min_max: bool,
}

impl HistogramConfig {
    /// The bucket `value` falls into: `(bounds[i - 1], bounds[i]]`.
    pub(crate) fn bucket_index(&self, value: f64) -> usize {
        self.bounds.partition_point(|&bound| bound < value)
    }
}

/// Smallest and largest value seen over some interval.
#[derive(Clone, Copy)]
pub(crate) struct MinMax<T> {
    pub(crate) min: T,
    pub(crate) max: T,
}

impl<T: Number> MinMax<T> {
    pub(crate) fn empty() -> Self {
        MinMax {
            min: T::max(),
            max: T::min(),
        }
    }

    pub(crate) fn record(&mut self, value: T) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }
}

struct Buckets<T> {
    counts: Vec<u64>,
    count: u64,
    total: T,
    /// Since creation.
    lifetime: MinMax<T>,
    /// Since each reader's previous delta collection.
    intervals: Vec<MinMax<T>>,
}

impl<T: Number> Buckets<T> {
    /// returns buckets with `n` bins.
    fn new(n: usize, readers: usize) -> Buckets<T> {
        Buckets {
            counts: vec![0; n],
            count: 0,
            total: T::default(),
            lifetime: MinMax::empty(),
            intervals: vec![MinMax::empty(); readers],
        }
    }

    fn bin(&mut self, idx: usize, value: T) {
        self.counts[idx] += 1;
        self.count += 1;
        self.total += value;
        self.lifetime.record(value);
        self.intervals.iter_mut().for_each(|i| i.record(value));
    }
}

/// What a delta reader reported last time.
#[derive(Default)]
pub(crate) struct HistogramBaseline<T> {
    counts: Vec<u64>,
    count: u64,
    total: T,
}

/// Explicit bucket histogram behind a short mutex.
pub(crate) struct HistogramTracker<T> {
    buckets: Mutex<Buckets<T>>,
}

impl<T: Number> Aggregator<T> for HistogramTracker<T> {
    type Config = HistogramConfig;
    type Baseline = HistogramBaseline<T>;

    fn create(config: &HistogramConfig, readers: &[Temporality]) -> MetricResult<Self> {
        Ok(HistogramTracker {
            buckets: Mutex::new(Buckets::new(config.bounds.len() + 1, readers.len())),
        })
    }

    fn update(&self, config: &HistogramConfig, measurement: T) {
        let index = config.bucket_index(measurement.into_float());
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        buckets.bin(index, measurement);
    }

    fn collect(
        &self,
        config: &HistogramConfig,
        reader: usize,
        temporality: Temporality,
        baseline: &mut HistogramBaseline<T>,
    ) -> MetricResult<PointValue<T>> {
        let mut buckets = self.buckets.lock()?;

        let (bucket_counts, count, sum, range) = match temporality {
            Temporality::Delta => {
                let bucket_counts = buckets
                    .counts
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c - baseline.counts.get(i).copied().unwrap_or_default())
                    .collect();
                let count = buckets.count - baseline.count;
                let sum = buckets.total - baseline.total;
                let range = std::mem::replace(&mut buckets.intervals[reader], MinMax::empty());

                baseline.counts.clone_from(&buckets.counts);
                baseline.count = buckets.count;
                baseline.total = buckets.total;
                (bucket_counts, count, sum, range)
            }
            _ => (
                buckets.counts.clone(),
                buckets.count,
                buckets.total,
                buckets.lifetime,
            ),
        };

        let (min, max) = if config.record_min_max && count > 0 {
            (Some(range.min), Some(range.max))
        } else {
            (None, None)
        };

        Ok(PointValue::Histogram(HistogramValue {
            bounds: config.bounds.clone(),
            bucket_counts,
            count,
            sum,
            min,
            max,
        }))
    }

    fn reset(&self, config: &HistogramConfig) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
        let readers = buckets.intervals.len();
        *buckets = Buckets::new(config.bounds.len() + 1, readers);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn config(bounds: Vec<f64>) -> HistogramConfig {
        HistogramConfig {
            bounds,
            record_min_max: true,
        }
    }

    fn histogram_value(value: MetricResult<PointValue<f64>>) -> HistogramValue<f64> {
        match value.unwrap() {
            PointValue::Histogram(h) => h,
            other => panic!("expected histogram, got {other:?}"),
        }
    }

    #[rstest]
    #[case(-1.0, 0)]
    #[case(0.0, 0)]
    #[case(0.5, 1)]
    #[case(5.0, 1)]
    #[case(5.1, 2)]
    #[case(10.0, 2)]
    #[case(10.5, 3)]
    #[case(1e9, 3)]
    fn upper_bounds_are_inclusive(#[case] value: f64, #[case] expected: usize) {
        assert_eq!(config(vec![0.0, 5.0, 10.0]).bucket_index(value), expected);
    }

    #[test]
    fn cumulative_histogram() {
        let config = config(vec![0.0, 5.0, 10.0]);
        let h = HistogramTracker::<f64>::create(&config, &[Temporality::Cumulative]).unwrap();
        for v in [2.0, 4.0, 1.0, 16.0, 4.0] {
            h.update(&config, v);
        }

        let value = histogram_value(h.collect(
            &config,
            0,
            Temporality::Cumulative,
            &mut HistogramBaseline::default(),
        ));

        assert_eq!(value.bounds, vec![0.0, 5.0, 10.0]);
        assert_eq!(value.bucket_counts, vec![0, 4, 0, 1]);
        assert_eq!(value.count, 5);
        assert_eq!(value.sum, 27.0);
        assert_eq!(value.min, Some(1.0));
        assert_eq!(value.max, Some(16.0));
    }

    #[test]
    fn delta_histogram_tracks_min_max_per_reader() {
        let config = config(vec![10.0]);
        let h = HistogramTracker::<f64>::create(&config, &[Temporality::Delta; 2]).unwrap();
        let mut first = HistogramBaseline::default();
        let mut second = HistogramBaseline::default();

        h.update(&config, 1.0);
        h.update(&config, 20.0);
        let a = histogram_value(h.collect(&config, 0, Temporality::Delta, &mut first));
        h.update(&config, 5.0);
        let b = histogram_value(h.collect(&config, 0, Temporality::Delta, &mut first));
        let c = histogram_value(h.collect(&config, 1, Temporality::Delta, &mut second));

        assert_eq!((a.bucket_counts, a.count, a.sum), (vec![1, 1], 2, 21.0));
        assert_eq!((a.min, a.max), (Some(1.0), Some(20.0)));
        assert_eq!((b.bucket_counts, b.count, b.sum), (vec![1, 0], 1, 5.0));
        assert_eq!((b.min, b.max), (Some(5.0), Some(5.0)));
        assert_eq!((c.bucket_counts, c.count, c.sum), (vec![2, 1], 3, 26.0));
        assert_eq!((c.min, c.max), (Some(1.0), Some(20.0)));
    }

    #[test]
    fn empty_delta_has_no_min_max() {
        let config = config(vec![]);
        let h = HistogramTracker::<i64>::create(&config, &[Temporality::Delta]).unwrap();
        let mut baseline = HistogramBaseline::default();
        h.update(&config, 3);
        h.collect(&config, 0, Temporality::Delta, &mut baseline)
            .unwrap();

        match h.collect(&config, 0, Temporality::Delta, &mut baseline) {
            Ok(PointValue::Histogram(value)) => {
                assert_eq!(value.count, 0);
                assert_eq!(value.bucket_counts, vec![0]);
                assert_eq!((value.min, value.max), (None, None));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn min_max_can_be_disabled() {
        let config = HistogramConfig {
            bounds: vec![1.0],
            record_min_max: false,
        };
        let h = HistogramTracker::<u64>::create(&config, &[Temporality::Cumulative]).unwrap();
        h.update(&config, 3);

        match h.collect(
            &config,
            0,
            Temporality::Cumulative,
            &mut HistogramBaseline::default(),
        ) {
            Ok(PointValue::Histogram(value)) => {
                assert_eq!(value.bucket_counts, vec![0, 1]);
                assert_eq!((value.min, value.max), (None, None));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reset_restores_empty_state() {
        let config = config(vec![1.0]);
        let h = HistogramTracker::<f64>::create(&config, &[Temporality::Cumulative]).unwrap();
        h.update(&config, 3.0);
        h.reset(&config);

        let value = histogram_value(h.collect(
            &config,
            0,
            Temporality::Cumulative,
            &mut HistogramBaseline::default(),
        ));
        assert_eq!(value.count, 0);
        assert_eq!(value.bucket_counts, vec![0, 0]);
    }
}
