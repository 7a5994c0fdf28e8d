use std::sync::Mutex;

use opentelemetry::otel_warn;

use crate::data::{ExponentialBucket, ExponentialHistogramValue, PointValue};
use crate::error::{MetricError, MetricResult};
use crate::Temporality;

use super::aggregator::Aggregator;
use super::circular_buckets::CircularBuckets;
use super::exponential_bucketer::{map_to_index, EXPO_MIN_SCALE};
use super::histogram::MinMax;
use super::Number;

/// Limits shared by every point of an exponential histogram.
pub(crate) struct ExpoHistogramConfig {
    /// Maximum number of buckets on each side of zero.
    pub(crate) max_size: usize,
    /// The scale every histogram starts at.
    pub(crate) max_scale: i8,
    pub(crate) record_min_max: bool,
}

/// A single exponential histogram.
struct ExpoHistogramDataPoint<T> {
    count: u64,
    sum: T,
    min_max: MinMax<T>,

    scale: i8,

    pos_buckets: CircularBuckets,
    neg_buckets: CircularBuckets,
    zero_count: u64,
}

impl<T: Number> ExpoHistogramDataPoint<T> {
    fn new(config: &ExpoHistogramConfig) -> MetricResult<Self> {
        Ok(ExpoHistogramDataPoint {
            count: 0,
            sum: T::default(),
            min_max: MinMax::empty(),
            scale: config.max_scale,
            pos_buckets: CircularBuckets::new(config.max_size)?,
            neg_buckets: CircularBuckets::new(config.max_size)?,
            zero_count: 0,
        })
    }

    /// Adds a new measurement to the histogram.
    ///
    /// It will rescale the buckets if needed.
    fn record(&mut self, v: T) {
        let abs_v = v.into_float().abs();

        if abs_v == 0.0 {
            self.zero_count += 1;
        } else {
            let index = map_to_index(abs_v, self.scale);
            let v_is_negative = v < T::default();
            let buckets = if v_is_negative {
                &mut self.neg_buckets
            } else {
                &mut self.pos_buckets
            };

            let scale_delta = buckets.try_increment(index, 1);
            if scale_delta > 0 {
                if i32::from(self.scale) - (scale_delta as i32) < i32::from(EXPO_MIN_SCALE) {
                    // Only reachable with a single bucket per side, two are
                    // needed to cover every f64 at the minimum scale.
                    otel_warn!(
                        name: "AggregatorStore.ExponentialHistogramScaleUnderflow",
                        scale = i64::from(self.scale),
                        required_downscale = u64::from(scale_delta),
                    );
                    return;
                }

                self.scale -= scale_delta as i8;
                self.pos_buckets.scale_down(scale_delta);
                self.neg_buckets.scale_down(scale_delta);

                let buckets = if v_is_negative {
                    &mut self.neg_buckets
                } else {
                    &mut self.pos_buckets
                };
                buckets.try_increment(index >> scale_delta, 1);
            }
        }

        self.count += 1;
        self.sum += v;
        self.min_max.record(v);
    }

    fn value(&self, config: &ExpoHistogramConfig) -> ExponentialHistogramValue<T> {
        let has_min_max = config.record_min_max && self.count > 0;
        ExponentialHistogramValue {
            count: self.count,
            sum: self.sum,
            min: has_min_max.then_some(self.min_max.min),
            max: has_min_max.then_some(self.min_max.max),
            scale: self.scale,
            zero_count: self.zero_count,
            positive_bucket: exponential_bucket(&self.pos_buckets),
            negative_bucket: exponential_bucket(&self.neg_buckets),
            zero_threshold: 0.0,
        }
    }

    /// Empties the histogram and restores the maximum scale.
    fn reset(&mut self, config: &ExpoHistogramConfig) {
        self.count = 0;
        self.sum = T::default();
        self.min_max = MinMax::empty();
        self.scale = config.max_scale;
        self.pos_buckets.reset();
        self.neg_buckets.reset();
        self.zero_count = 0;
    }
}

struct Histograms<T> {
    /// Everything recorded since the point was activated, present when a
    /// reader is cumulative.
    lifetime: Option<ExpoHistogramDataPoint<T>>,
    /// What was recorded since each delta reader's previous collection,
    /// indexed by reader.
    intervals: Vec<Option<ExpoHistogramDataPoint<T>>>,
}

impl<T> Histograms<T> {
    fn iter_mut(&mut self) -> impl Iterator<Item = &mut ExpoHistogramDataPoint<T>> {
        self.lifetime
            .iter_mut()
            .chain(self.intervals.iter_mut().flatten())
    }
}

/// Base-2 exponential histogram behind a short mutex.
///
/// Every delta reader has its own histogram, emptied and returned to the
/// maximum scale each time the reader collects it.
pub(crate) struct ExpoHistogramTracker<T> {
    histograms: Mutex<Histograms<T>>,
}

impl<T: Number> Aggregator<T> for ExpoHistogramTracker<T> {
    type Config = ExpoHistogramConfig;
    type Baseline = ();

    fn create(config: &ExpoHistogramConfig, readers: &[Temporality]) -> MetricResult<Self> {
        let lifetime = readers
            .iter()
            .any(|t| *t != Temporality::Delta)
            .then(|| ExpoHistogramDataPoint::new(config))
            .transpose()?;
        let intervals = readers
            .iter()
            .map(|t| {
                (*t == Temporality::Delta)
                    .then(|| ExpoHistogramDataPoint::new(config))
                    .transpose()
            })
            .collect::<MetricResult<Vec<_>>>()?;

        Ok(ExpoHistogramTracker {
            histograms: Mutex::new(Histograms {
                lifetime,
                intervals,
            }),
        })
    }

    fn update(&self, _config: &ExpoHistogramConfig, measurement: T) {
        if let Ok(mut histograms) = self.histograms.lock() {
            histograms.iter_mut().for_each(|dp| dp.record(measurement));
        }
    }

    fn collect(
        &self,
        config: &ExpoHistogramConfig,
        reader: usize,
        temporality: Temporality,
        _baseline: &mut (),
    ) -> MetricResult<PointValue<T>> {
        let mut histograms = self.histograms.lock()?;
        let dp = match temporality {
            Temporality::Delta => histograms.intervals.get_mut(reader).and_then(Option::as_mut),
            _ => histograms.lifetime.as_mut(),
        }
        .ok_or_else(|| {
            MetricError::Other(format!(
                "no {temporality:?} exponential histogram for reader {reader}"
            ))
        })?;

        let value = dp.value(config);
        if temporality == Temporality::Delta {
            dp.reset(config);
        }

        Ok(PointValue::ExponentialHistogram(value))
    }

    fn reset(&self, config: &ExpoHistogramConfig) {
        let mut histograms = self.histograms.lock().unwrap_or_else(|err| err.into_inner());
        histograms.iter_mut().for_each(|dp| dp.reset(config));
    }
}

fn exponential_bucket(buckets: &CircularBuckets) -> ExponentialBucket {
    let (offset, counts) = buckets.copy();
    ExponentialBucket { offset, counts }
}
