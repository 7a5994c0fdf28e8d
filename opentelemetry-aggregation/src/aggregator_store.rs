use std::collections::HashSet;
use std::env;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use opentelemetry::{otel_debug, otel_warn, Key, KeyValue};

use crate::aggregation::Aggregation;
use crate::data::DataPoint;
use crate::error::{MetricError, MetricResult};
use crate::exemplar::{ExemplarFilter, ReservoirKind};
use crate::internal::{
    Aggregate, ExpoHistogramConfig, ExpoHistogramTracker, HistogramConfig, HistogramTracker,
    LastValueTracker, Number, PrecomputedSumConfig, PrecomputedSumTracker, SumTracker, ValueMap,
    ValueMapConfig,
};
use crate::{InstrumentKind, Temporality};

/// Total number of points of a store, including the no-attribute and
/// overflow points.
const OTEL_METRICS_CARDINALITY_LIMIT: &str = "OTEL_METRICS_CARDINALITY_LIMIT";
/// Default cardinality limit.
const OTEL_METRICS_CARDINALITY_LIMIT_DEFAULT: usize = 2000;
/// Which measurements are sampled as exemplars, one of `always_off`,
/// `always_on` or `trace_based`.
const OTEL_METRICS_EXEMPLAR_FILTER: &str = "OTEL_METRICS_EXEMPLAR_FILTER";

/// The smallest usable capacity: both reserved points plus one series.
const MIN_CARDINALITY_LIMIT: usize = 3;
/// Exemplar cells of an exponential histogram point.
const EXPO_HISTOGRAM_RESERVOIR_SIZE: usize = 20;

/// Identifies one reader of an [AggregatorStore].
///
/// Ids are handed out in the order readers were added to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(usize);

impl ReaderId {
    /// Position of the reader in registration order.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Counters describing the state of an [AggregatorStore].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Points currently holding a time series, reserved points included.
    pub active_points: usize,
    /// Measurements aggregated into the overflow point.
    pub overflow_measurements: u64,
    /// Measurements rejected as invalid.
    pub dropped_measurements: u64,
    /// Points returned to the free list after going idle.
    pub reclaimed_points: u64,
}

/// A fixed-capacity aggregation of measurements of one instrument, keyed by
/// attribute set, collected by one or more readers.
///
/// The first point aggregates measurements without attributes. Once the
/// capacity is used up, new attribute sets aggregate into a single overflow
/// point tagged `otel.metric.overflow=true`.
pub struct AggregatorStore<T> {
    aggregate: Box<dyn Aggregate<T>>,
    readers: Vec<Temporality>,
    capacity: usize,
}

impl<T: Number> AggregatorStore<T> {
    /// Starts configuring a store for an instrument of `kind`.
    pub fn builder(kind: InstrumentKind, aggregation: Aggregation) -> AggregatorStoreBuilder<T> {
        AggregatorStoreBuilder::new(kind, aggregation)
    }

    /// Records a measurement.
    ///
    /// Invalid measurements (NaN, infinite, or negative for a monotonic sum)
    /// are dropped and counted in [StoreStats::dropped_measurements].
    pub fn update(&self, measurement: T, attributes: &[KeyValue]) {
        self.aggregate.measure(measurement, attributes)
    }

    /// Collects the store for `reader`, returning the number of points
    /// produced.
    ///
    /// The points are then available from [AggregatorStore::metric_points]
    /// until the reader's next snapshot.
    pub fn snapshot(&self, reader: ReaderId) -> MetricResult<usize> {
        self.aggregate.snapshot(reader.0)
    }

    /// The points of `reader`'s latest snapshot.
    pub fn metric_points(&self, reader: ReaderId) -> MetricResult<Vec<DataPoint<T>>> {
        self.aggregate.metric_points(reader.0)
    }

    /// The ids of every reader, in registration order.
    pub fn reader_ids(&self) -> Vec<ReaderId> {
        (0..self.readers.len()).map(ReaderId).collect()
    }

    /// The temporality `reader` reports with, after resolving its preference
    /// for this store's instrument kind.
    pub fn temporality(&self, reader: ReaderId) -> Option<Temporality> {
        self.readers.get(reader.0).copied()
    }

    /// Total number of points, including the no-attribute and overflow points.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current counters of the store.
    pub fn stats(&self) -> StoreStats {
        self.aggregate.stats()
    }
}

impl<T> fmt::Debug for AggregatorStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorStore")
            .field("readers", &self.readers)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Builder for [AggregatorStore].
#[derive(Debug)]
pub struct AggregatorStoreBuilder<T> {
    kind: InstrumentKind,
    aggregation: Aggregation,
    readers: Vec<Temporality>,
    cardinality_limit: usize,
    exemplar_filter: ExemplarFilter,
    allowed_keys: Option<HashSet<Key>>,
    _number: PhantomData<T>,
}

impl<T: Number> AggregatorStoreBuilder<T> {
    /// Creates a builder initialized with the default limits.
    ///
    /// The defaults are overridden by environment variables if set:
    /// * `OTEL_METRICS_CARDINALITY_LIMIT`
    /// * `OTEL_METRICS_EXEMPLAR_FILTER`
    fn new(kind: InstrumentKind, aggregation: Aggregation) -> Self {
        AggregatorStoreBuilder {
            kind,
            aggregation,
            readers: Vec::new(),
            cardinality_limit: OTEL_METRICS_CARDINALITY_LIMIT_DEFAULT,
            exemplar_filter: ExemplarFilter::default(),
            allowed_keys: None,
            _number: PhantomData,
        }
        .init_from_env_vars()
    }

    /// Adds a reader collecting with the given temporality preference.
    ///
    /// The preference is resolved per instrument kind, see
    /// [InstrumentKind::temporality_preference].
    pub fn with_reader(mut self, temporality: Temporality) -> Self {
        self.readers
            .push(self.kind.temporality_preference(temporality));
        self
    }

    /// Sets the total number of points of the store, including the
    /// no-attribute and overflow points. The default is 2000 and the minimum
    /// is 3.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = limit;
        self
    }

    /// Sets which measurements are sampled as exemplars.
    pub fn with_exemplar_filter(mut self, filter: ExemplarFilter) -> Self {
        self.exemplar_filter = filter;
        self
    }

    /// Keeps only the given keys in the attribute sets identifying time
    /// series. Other attributes are kept on exemplars.
    pub fn with_allowed_attribute_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.allowed_keys = Some(keys.into_iter().collect());
        self
    }

    /// Validates the configuration and allocates every point of the store.
    pub fn build(self) -> MetricResult<AggregatorStore<T>> {
        self.aggregation.validate()?;
        if self.readers.is_empty() {
            return Err(MetricError::Config(
                "aggregator store: at least one reader is required".into(),
            ));
        }
        if self.cardinality_limit < MIN_CARDINALITY_LIMIT {
            return Err(MetricError::Config(format!(
                "aggregator store: cardinality limit ({}) is less than {}",
                self.cardinality_limit, MIN_CARDINALITY_LIMIT,
            )));
        }

        let reservoir = match &self.aggregation {
            Aggregation::Sum | Aggregation::LastValue => ReservoirKind::FixedSize(1),
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                ReservoirKind::AlignedHistogram(boundaries.clone())
            }
            Aggregation::Base2ExponentialHistogram { max_size, .. } => {
                ReservoirKind::FixedSize(EXPO_HISTOGRAM_RESERVOIR_SIZE.min(*max_size as usize))
            }
        };
        let monotonic = self.aggregation == Aggregation::Sum && self.kind.is_monotonic();
        let config = ValueMapConfig {
            capacity: self.cardinality_limit,
            temporalities: self.readers.clone(),
            monotonic,
            exemplar_filter: self.exemplar_filter,
            reservoir,
            allowed_keys: self.allowed_keys,
        };

        let aggregate: Box<dyn Aggregate<T>> = match &self.aggregation {
            Aggregation::Sum if self.kind.is_precomputed() => {
                Box::new(ValueMap::<T, PrecomputedSumTracker<T>>::new(
                    config,
                    PrecomputedSumConfig { monotonic },
                )?)
            }
            Aggregation::Sum => Box::new(ValueMap::<T, SumTracker<T>>::new(config, ())?),
            Aggregation::LastValue => {
                Box::new(ValueMap::<T, LastValueTracker<T>>::new(config, ())?)
            }
            Aggregation::ExplicitBucketHistogram {
                boundaries,
                record_min_max,
            } => Box::new(ValueMap::<T, HistogramTracker<T>>::new(
                config,
                HistogramConfig {
                    bounds: boundaries.clone(),
                    record_min_max: *record_min_max,
                },
            )?),
            Aggregation::Base2ExponentialHistogram {
                max_size,
                max_scale,
                record_min_max,
            } => Box::new(ValueMap::<T, ExpoHistogramTracker<T>>::new(
                config,
                ExpoHistogramConfig {
                    max_size: *max_size as usize,
                    max_scale: *max_scale,
                    record_min_max: *record_min_max,
                },
            )?),
        };

        otel_debug!(
            name: "AggregatorStore.StoreCreated",
            aggregation = format!("{}", self.aggregation),
            cardinality_limit = self.cardinality_limit,
            readers = self.readers.len(),
        );

        Ok(AggregatorStore {
            aggregate,
            readers: self.readers,
            capacity: self.cardinality_limit,
        })
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Ok(limit) = env::var(OTEL_METRICS_CARDINALITY_LIMIT) {
            match usize::from_str(limit.trim()) {
                Ok(limit) if limit >= MIN_CARDINALITY_LIMIT => self.cardinality_limit = limit,
                _ => {
                    otel_warn!(
                        name: "AggregatorStore.InvalidCardinalityLimit",
                        message = "Ignoring invalid OTEL_METRICS_CARDINALITY_LIMIT",
                        value = format!("{limit}"),
                    );
                }
            }
        }

        if let Ok(filter) = env::var(OTEL_METRICS_EXEMPLAR_FILTER) {
            match ExemplarFilter::from_str(&filter) {
                Ok(filter) => self.exemplar_filter = filter,
                Err(_) => {
                    otel_warn!(
                        name: "AggregatorStore.InvalidExemplarFilter",
                        message = "Ignoring invalid OTEL_METRICS_EXEMPLAR_FILTER",
                        value = format!("{filter}"),
                    );
                }
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_VARS: [&str; 2] = [OTEL_METRICS_CARDINALITY_LIMIT, OTEL_METRICS_EXEMPLAR_FILTER];

    fn counter() -> AggregatorStoreBuilder<u64> {
        AggregatorStore::<u64>::builder(InstrumentKind::Counter, Aggregation::Sum)
    }

    #[test]
    fn default_limits() {
        let builder = temp_env::with_vars_unset(ENV_VARS, counter);

        assert_eq!(builder.cardinality_limit, OTEL_METRICS_CARDINALITY_LIMIT_DEFAULT);
        assert_eq!(builder.exemplar_filter, ExemplarFilter::AlwaysOff);
    }

    #[test]
    fn limits_configurable_by_env_vars() {
        let env_vars = vec![
            (OTEL_METRICS_CARDINALITY_LIMIT, Some("100")),
            (OTEL_METRICS_EXEMPLAR_FILTER, Some("always_on")),
        ];

        let builder = temp_env::with_vars(env_vars, counter);

        assert_eq!(builder.cardinality_limit, 100);
        assert_eq!(builder.exemplar_filter, ExemplarFilter::AlwaysOn);
    }

    #[test]
    fn invalid_env_vars_are_ignored() {
        let env_vars = vec![
            (OTEL_METRICS_CARDINALITY_LIMIT, Some("2")),
            (OTEL_METRICS_EXEMPLAR_FILTER, Some("sometimes")),
        ];

        let builder = temp_env::with_vars(env_vars, counter);

        assert_eq!(builder.cardinality_limit, OTEL_METRICS_CARDINALITY_LIMIT_DEFAULT);
        assert_eq!(builder.exemplar_filter, ExemplarFilter::AlwaysOff);
    }

    #[test]
    fn builder_overrides_env_vars() {
        let env_vars = vec![(OTEL_METRICS_CARDINALITY_LIMIT, Some("100"))];

        let store = temp_env::with_vars(env_vars, || {
            counter()
                .with_reader(Temporality::Delta)
                .with_cardinality_limit(10)
                .build()
                .unwrap()
        });

        assert_eq!(store.capacity(), 10);
    }

    #[test]
    fn build_rejects_invalid_config() {
        assert!(matches!(
            counter().build(),
            Err(MetricError::Config(_))
        ));
        assert!(matches!(
            counter()
                .with_reader(Temporality::Cumulative)
                .with_cardinality_limit(2)
                .build(),
            Err(MetricError::Config(_))
        ));
        assert!(matches!(
            AggregatorStore::<f64>::builder(
                InstrumentKind::Histogram,
                Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![10.0, 1.0],
                    record_min_max: true,
                },
            )
            .with_reader(Temporality::Cumulative)
            .build(),
            Err(MetricError::Config(_))
        ));
    }

    #[test]
    fn reader_temporality_is_resolved_per_kind() {
        let store = AggregatorStore::<i64>::builder(InstrumentKind::UpDownCounter, Aggregation::Sum)
            .with_reader(Temporality::Delta)
            .with_reader(Temporality::LowMemory)
            .build()
            .unwrap();

        let readers = store.reader_ids();
        assert_eq!(readers.len(), 2);
        assert_eq!(store.temporality(readers[0]), Some(Temporality::Cumulative));
        assert_eq!(store.temporality(readers[1]), Some(Temporality::Cumulative));
    }

    #[test]
    fn up_down_counter_accepts_negative_values() {
        let store = AggregatorStore::<i64>::builder(InstrumentKind::UpDownCounter, Aggregation::Sum)
            .with_reader(Temporality::Cumulative)
            .build()
            .unwrap();
        let reader = store.reader_ids()[0];

        store.update(5, &[]);
        store.update(-8, &[]);
        store.snapshot(reader).unwrap();

        assert_eq!(store.metric_points(reader).unwrap()[0].sum(), Some(-3));
        assert_eq!(store.stats().dropped_measurements, 0);
    }

    #[test]
    fn counter_drops_negative_values() {
        let store = AggregatorStore::<i64>::builder(InstrumentKind::Counter, Aggregation::Sum)
            .with_reader(Temporality::Cumulative)
            .build()
            .unwrap();
        let reader = store.reader_ids()[0];

        store.update(5, &[]);
        store.update(-8, &[]);
        store.snapshot(reader).unwrap();

        assert_eq!(store.metric_points(reader).unwrap()[0].sum(), Some(5));
        assert_eq!(store.stats().dropped_measurements, 1);
    }

    #[test]
    fn histogram_exemplars_aligned_to_buckets() {
        let store = AggregatorStore::<f64>::builder(
            InstrumentKind::Histogram,
            Aggregation::ExplicitBucketHistogram {
                boundaries: vec![1.0, 10.0],
                record_min_max: true,
            },
        )
        .with_reader(Temporality::Delta)
        .with_exemplar_filter(ExemplarFilter::AlwaysOn)
        .build()
        .unwrap();
        let reader = store.reader_ids()[0];

        for value in [0.5, 5.0, 6.0, 50.0] {
            store.update(value, &[]);
        }
        store.snapshot(reader).unwrap();

        let points = store.metric_points(reader).unwrap();
        let histogram = points[0].histogram().unwrap();
        assert_eq!(histogram.bucket_counts, vec![1, 2, 1]);
        assert_eq!(histogram.min, Some(0.5));
        assert_eq!(histogram.max, Some(50.0));
        let exemplars: Vec<f64> = points[0].exemplars.iter().map(|e| e.value).collect();
        assert_eq!(exemplars, vec![0.5, 6.0, 50.0]);
    }

    #[test]
    fn store_debug_omits_points() {
        let store = counter()
            .with_reader(Temporality::Delta)
            .with_cardinality_limit(3)
            .build()
            .unwrap();

        assert_eq!(
            format!("{store:?}"),
            "AggregatorStore { readers: [Delta], capacity: 3 }"
        );
    }
}
