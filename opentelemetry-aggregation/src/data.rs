//! Types for delivery of collected metric points.

use std::time::SystemTime;

use opentelemetry::KeyValue;

/// A single collected point of one time series.
///
/// Points are owned snapshots; later measurements never change them.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint<T> {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: Vec<KeyValue>,
    /// The time the reported interval starts at.
    pub start_time: SystemTime,
    /// The time when the point was collected.
    pub time: SystemTime,
    /// The aggregated value.
    pub value: PointValue<T>,
    /// The sampled [Exemplar]s collected during the interval.
    pub exemplars: Vec<Exemplar<T>>,
}

impl<T: Copy> DataPoint<T> {
    /// The value of a sum aggregation.
    pub fn sum(&self) -> Option<T> {
        match self.value {
            PointValue::Sum(v) => Some(v),
            _ => None,
        }
    }

    /// The value of a last value aggregation.
    pub fn last_value(&self) -> Option<T> {
        match self.value {
            PointValue::LastValue(v) => Some(v),
            _ => None,
        }
    }

    /// The value of an explicit bucket histogram aggregation.
    pub fn histogram(&self) -> Option<&HistogramValue<T>> {
        match &self.value {
            PointValue::Histogram(h) => Some(h),
            _ => None,
        }
    }

    /// The value of a base-2 exponential histogram aggregation.
    pub fn exponential_histogram(&self) -> Option<&ExponentialHistogramValue<T>> {
        match &self.value {
            PointValue::ExponentialHistogram(h) => Some(h),
            _ => None,
        }
    }
}

/// The aggregated value of a [DataPoint], one variant per aggregation kind.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue<T> {
    /// The sum of measurements, or its change over the interval.
    Sum(T),
    /// The last measurement recorded.
    LastValue(T),
    /// An explicit bucket histogram.
    Histogram(HistogramValue<T>),
    /// A base-2 exponential bucket histogram.
    ExponentialHistogram(ExponentialHistogramValue<T>),
}

/// A single histogram data point in a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramValue<T> {
    /// The upper bounds of the buckets of the histogram.
    ///
    /// Because the last boundary is +infinity this one is implied.
    pub bounds: Vec<f64>,
    /// The count of each of the buckets.
    pub bucket_counts: Vec<u64>,
    /// The number of updates this histogram has been calculated with.
    pub count: u64,
    /// The sum of the values recorded.
    pub sum: T,
    /// The minimum value recorded.
    pub min: Option<T>,
    /// The maximum value recorded.
    pub max: Option<T>,
}

/// A single exponential histogram data point in a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialHistogramValue<T> {
    /// The number of updates this histogram has been calculated with.
    pub count: u64,
    /// The minimum value recorded.
    pub min: Option<T>,
    /// The maximum value recorded.
    pub max: Option<T>,
    /// The sum of the values recorded.
    pub sum: T,

    /// Describes the resolution of the histogram.
    ///
    /// Boundaries are located at powers of the base, where:
    ///
    ///   base = 2 ^ (2 ^ -scale)
    pub scale: i8,

    /// The number of values whose absolute value is less than or equal to
    /// `zero_threshold`.
    pub zero_count: u64,

    /// The range of positive value bucket counts.
    pub positive_bucket: ExponentialBucket,
    /// The range of negative value bucket counts.
    pub negative_bucket: ExponentialBucket,

    /// The width of the zero region, always `0.0`.
    pub zero_threshold: f64,
}

/// A set of bucket counts, encoded in a contiguous array of counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExponentialBucket {
    /// The bucket index of the first entry in the `counts` vec.
    pub offset: i32,

    /// A vec where `counts[i]` carries the count of the bucket at index `offset + i`.
    ///
    /// `counts[i]` is the count of values greater than base^(offset+i) and less than
    /// or equal to base^(offset+i+1).
    pub counts: Vec<u64>,
}

/// A measurement sampled from a time series providing a typical example.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar<T> {
    /// The attributes recorded with the measurement but filtered out of the
    /// time series' aggregated data.
    pub filtered_attributes: Vec<KeyValue>,
    /// The time when the measurement was recorded.
    pub time: SystemTime,
    /// The measured value.
    pub value: T,
    /// The ID of the span that was active during the measurement.
    ///
    /// If no span was active or the span was not sampled this will be empty.
    pub span_id: [u8; 8],
    /// The ID of the trace the active span belonged to during the measurement.
    ///
    /// If no span was active or the span was not sampled this will be empty.
    pub trace_id: [u8; 16],
}
