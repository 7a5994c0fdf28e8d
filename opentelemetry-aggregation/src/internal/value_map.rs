use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use opentelemetry::{otel_debug, otel_warn, Key, KeyValue};

use crate::aggregator_store::StoreStats;
use crate::attribute_set::{
    hash_attributes, is_borrowed_lookup_eligible, AttributeSet, NoOpHasher,
};
use crate::data::DataPoint;
use crate::error::{MetricError, MetricResult};
use crate::exemplar::{ExemplarFilter, ReservoirKind};
use crate::Temporality;

use super::aggregator::Aggregator;
use super::metric_point::{MetricPoint, PointStatus};
use super::Number;

/// Point for measurements without attributes.
const NO_ATTRIBUTES_INDEX: usize = 0;
/// Point absorbing measurements for attribute sets beyond capacity.
const OVERFLOW_INDEX: usize = 1;
const FIRST_DATA_INDEX: usize = 2;

/// Attribute reported on the overflow point.
pub(crate) const OVERFLOW_ATTRIBUTE_KEY: &str = "otel.metric.overflow";

/// Store wide behavior independent of the aggregation kind.
pub(crate) struct ValueMapConfig {
    /// Total number of points, including the two reserved ones.
    pub(crate) capacity: usize,
    /// Resolved temporality of every reader, indexed by reader id.
    pub(crate) temporalities: Vec<Temporality>,
    /// Rejects negative measurements.
    pub(crate) monotonic: bool,
    pub(crate) exemplar_filter: ExemplarFilter,
    pub(crate) reservoir: ReservoirKind,
    /// Keys kept in the time series identity, all when `None`.
    pub(crate) allowed_keys: Option<HashSet<Key>>,
}

/// The type-erased store operations.
pub(crate) trait Aggregate<T>: Send + Sync {
    /// Records a measurement.
    fn measure(&self, measurement: T, attrs: &[KeyValue]);

    /// Runs one collection cycle for `reader`, returning the number of points.
    fn snapshot(&self, reader: usize) -> MetricResult<usize>;

    /// The points of `reader`'s latest collection cycle.
    fn metric_points(&self, reader: usize) -> MetricResult<Vec<DataPoint<T>>>;

    fn stats(&self) -> StoreStats;
}

struct LookupEntry {
    attributes: AttributeSet,
    index: usize,
    generation: u64,
}

/// Maps attribute sets to points. Guarded by one `RwLock`: shared for
/// lookups, exclusive for inserts and reclaims.
struct LookupTable {
    entries: HashMap<u64, Vec<LookupEntry>, NoOpHasher>,
    /// Reclaimed points ready for reuse.
    free: VecDeque<usize>,
    /// First point that was never handed out.
    next_unused: usize,
}

impl LookupTable {
    fn find(&self, hash: u64, matches: impl Fn(&AttributeSet) -> bool) -> Option<(usize, u64)> {
        self.entries
            .get(&hash)?
            .iter()
            .find(|entry| matches(&entry.attributes))
            .map(|entry| (entry.index, entry.generation))
    }

    fn insert(&mut self, attributes: AttributeSet, index: usize, generation: u64) {
        self.entries
            .entry(attributes.hash_value())
            .or_default()
            .push(LookupEntry {
                attributes,
                index,
                generation,
            });
    }

    fn remove(&mut self, hash: u64, index: usize, generation: u64) {
        if let Some(entries) = self.entries.get_mut(&hash) {
            entries.retain(|entry| entry.index != index || entry.generation != generation);
            if entries.is_empty() {
                self.entries.remove(&hash);
            }
        }
    }

    fn is_full(&self, capacity: usize) -> bool {
        self.free.is_empty() && self.next_unused >= capacity
    }
}

/// What one reader remembers about one point.
#[derive(Default)]
struct SlotBaseline<B> {
    generation: u64,
    /// Update sequence exported last.
    seq: u64,
    value: B,
}

struct ReaderState<T, B> {
    temporality: Temporality,
    baselines: Vec<SlotBaseline<B>>,
    last_collect: SystemTime,
    points: Vec<DataPoint<T>>,
}

enum FastLookup {
    Reserved(usize),
    Miss,
    Full,
}

/// A fixed-capacity table of metric points keyed by attribute set.
///
/// Updates find their point under a shared lock and then only touch that
/// point. Every reader collects independently with its own temporality;
/// when all readers are delta, points that stay idle for a full cycle are
/// reclaimed for new attribute sets.
pub(crate) struct ValueMap<T: Number, A: Aggregator<T>> {
    points: Box<[MetricPoint<T, A>]>,
    lookup: RwLock<LookupTable>,
    /// Points below this index may be active.
    high_water: AtomicUsize,
    config: A::Config,
    readers: Box<[Mutex<ReaderState<T, A::Baseline>>]>,
    reclaim_enabled: bool,
    monotonic: bool,
    exemplar_filter: ExemplarFilter,
    allowed_keys: Option<HashSet<Key>>,
    start_time: SystemTime,
    overflow_count: AtomicU64,
    dropped_count: AtomicU64,
    reclaimed_count: AtomicU64,
    overflow_warned: AtomicBool,
}

impl<T: Number, A: Aggregator<T>> ValueMap<T, A> {
    pub(crate) fn new(config: ValueMapConfig, aggregator_config: A::Config) -> MetricResult<Self> {
        if config.capacity <= FIRST_DATA_INDEX {
            return Err(MetricError::Config(format!(
                "capacity must be at least {}, got {}",
                FIRST_DATA_INDEX + 1,
                config.capacity
            )));
        }
        if config.temporalities.is_empty() {
            return Err(MetricError::Config("at least one reader is required".into()));
        }

        let reservoir =
            (config.exemplar_filter != ExemplarFilter::AlwaysOff).then_some(&config.reservoir);
        let points = (0..config.capacity)
            .map(|index| {
                let attributes = if index == OVERFLOW_INDEX {
                    AttributeSet::from(&[KeyValue::new(OVERFLOW_ATTRIBUTE_KEY, true)][..])
                } else {
                    AttributeSet::default()
                };
                MetricPoint::new(&aggregator_config, &config.temporalities, reservoir, attributes)
            })
            .collect::<MetricResult<Vec<_>>>()?
            .into_boxed_slice();

        let start_time = opentelemetry::time::now();
        let reader_states = config
            .temporalities
            .iter()
            .map(|temporality| {
                Mutex::new(ReaderState {
                    temporality: *temporality,
                    baselines: (0..config.capacity)
                        .map(|_| SlotBaseline::default())
                        .collect(),
                    last_collect: start_time,
                    points: Vec::new(),
                })
            })
            .collect();

        Ok(ValueMap {
            points,
            lookup: RwLock::new(LookupTable {
                entries: HashMap::default(),
                free: VecDeque::new(),
                next_unused: FIRST_DATA_INDEX,
            }),
            high_water: AtomicUsize::new(FIRST_DATA_INDEX),
            config: aggregator_config,
            readers: reader_states,
            reclaim_enabled: config
                .temporalities
                .iter()
                .all(|t| *t == Temporality::Delta),
            monotonic: config.monotonic,
            exemplar_filter: config.exemplar_filter,
            allowed_keys: config.allowed_keys,
            start_time,
            overflow_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            reclaimed_count: AtomicU64::new(0),
            overflow_warned: AtomicBool::new(false),
        })
    }

    fn validate(&self, measurement: T) -> Result<(), &'static str> {
        if !measurement.into_float().is_finite() {
            Err("non-finite value")
        } else if self.monotonic && measurement < T::default() {
            Err("negative value for a monotonic sum")
        } else {
            Ok(())
        }
    }

    fn drop_measurement(&self, reason: &'static str) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
        otel_debug!(name: "AggregatorStore.MeasurementDropped", reason = reason);
    }

    fn measure_filtered(&self, measurement: T, attrs: &[KeyValue], filtered: &[KeyValue]) {
        let Some(index) = self.reserve(attrs) else {
            self.drop_measurement("lookup table lock poisoned");
            return;
        };

        let point = &self.points[index];
        point.aggregator.update(&self.config, measurement);
        if let Some(span) = self.exemplar_filter.sample() {
            point.offer_exemplar(measurement, span, filtered);
        }
        point.complete_update();
    }

    /// Finds or assigns the point for `attrs` and takes a reservation on it.
    fn reserve(&self, attrs: &[KeyValue]) -> Option<usize> {
        if attrs.is_empty() {
            return self.reserve_reserved(NO_ATTRIBUTES_INDEX);
        }

        match self.lookup_fast(attrs) {
            FastLookup::Reserved(index) => Some(index),
            FastLookup::Full => self.reserve_overflow(),
            FastLookup::Miss => self.reserve_locked(attrs),
        }
    }

    fn lookup_fast(&self, attrs: &[KeyValue]) -> FastLookup {
        let Ok(table) = self.lookup.read() else {
            return FastLookup::Miss;
        };

        let found = if is_borrowed_lookup_eligible(attrs) {
            table.find(hash_attributes(attrs), |set| set.matches(attrs))
        } else {
            let sorted = AttributeSet::from(attrs);
            table.find(sorted.hash_value(), |set| *set == sorted)
        };
        let full = found.is_none() && table.is_full(self.points.len());
        drop(table);

        match found {
            Some((index, generation)) if self.points[index].try_reserve(generation) => {
                FastLookup::Reserved(index)
            }
            Some(_) => FastLookup::Miss,
            None if full => FastLookup::Full,
            None => FastLookup::Miss,
        }
    }

    fn reserve_locked(&self, attrs: &[KeyValue]) -> Option<usize> {
        let mut table = self.lookup.write().ok()?;
        let attributes = AttributeSet::from(attrs);
        let hash = attributes.hash_value();

        // Recheck again in case another thread already inserted
        if let Some((index, generation)) = table.find(hash, |set| *set == attributes) {
            if self.points[index].try_reserve(generation) {
                return Some(index);
            }
            // the point is locked for reclaim, its data was already exported
            table.remove(hash, index, generation);
        }

        let index = match table.free.pop_front() {
            Some(index) => index,
            None if table.next_unused < self.points.len() => {
                let index = table.next_unused;
                table.next_unused += 1;
                self.high_water.store(table.next_unused, Ordering::Release);
                index
            }
            None => {
                drop(table);
                return self.reserve_overflow();
            }
        };

        let point = &self.points[index];
        let generation = point.generation();
        point.activate(attributes.clone());
        if !point.try_reserve(generation) {
            return None;
        }
        table.insert(attributes, index, generation);
        Some(index)
    }

    fn reserve_overflow(&self) -> Option<usize> {
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
        if !self.overflow_warned.swap(true, Ordering::Relaxed) {
            otel_warn!(
                name: "AggregatorStore.CardinalityLimitReached",
                message = "Maximum data points reached, new attribute sets are aggregated into the overflow point",
                cardinality_limit = self.points.len(),
            );
        }
        self.reserve_reserved(OVERFLOW_INDEX)
    }

    fn reserve_reserved(&self, index: usize) -> Option<usize> {
        // reserved points are never reclaimed, so always generation 0
        self.points[index].try_reserve(0).then_some(index)
    }

    /// Returns an idle point to the free list.
    fn try_reclaim(&self, index: usize, seq: u64) -> bool {
        let point = &self.points[index];
        if !point.try_lock_for_reclaim(seq) {
            return false;
        }

        let mut table = match self.lookup.write() {
            Ok(table) => table,
            Err(_) => {
                point.unlock();
                return false;
            }
        };
        table.remove(point.attributes_hash(), index, point.generation());
        point.reclaim(&self.config);
        table.free.push_back(index);
        true
    }
}

impl<T: Number, A: Aggregator<T>> Aggregate<T> for ValueMap<T, A> {
    fn measure(&self, measurement: T, attrs: &[KeyValue]) {
        if let Err(reason) = self.validate(measurement) {
            self.drop_measurement(reason);
            return;
        }

        match &self.allowed_keys {
            None => self.measure_filtered(measurement, attrs, &[]),
            Some(keys) => {
                let (kept, filtered): (Vec<KeyValue>, Vec<KeyValue>) =
                    attrs.iter().cloned().partition(|kv| keys.contains(&kv.key));
                self.measure_filtered(measurement, &kept, &filtered)
            }
        }
    }

    fn snapshot(&self, reader: usize) -> MetricResult<usize> {
        let state = self
            .readers
            .get(reader)
            .ok_or_else(|| MetricError::Other(format!("unknown reader {reader}")))?;
        let mut guard = state.lock()?;
        let state = &mut *guard;

        let now = opentelemetry::time::now();
        let start_time = match state.temporality {
            Temporality::Delta => state.last_collect,
            _ => self.start_time,
        };
        state.points.clear();

        let mut reclaimed = 0usize;
        let high_water = self.high_water.load(Ordering::Acquire);
        for index in 0..high_water {
            let point = &self.points[index];
            if point.status() == PointStatus::Inactive {
                continue;
            }
            let generation = point.generation();
            // held while reading, so the point can't be reclaimed underneath
            if !point.try_reserve(generation) {
                continue;
            }

            point.begin_collect();
            let seq = point.update_seq();
            let baseline = &mut state.baselines[index];
            if baseline.generation != generation {
                *baseline = SlotBaseline {
                    generation,
                    ..Default::default()
                };
            }

            let changed = seq != baseline.seq;
            if seq > 0 && (changed || state.temporality == Temporality::Cumulative) {
                let value = match point.aggregator.collect(
                    &self.config,
                    reader,
                    state.temporality,
                    &mut baseline.value,
                ) {
                    Ok(value) => value,
                    Err(err) => {
                        point.release();
                        return Err(err);
                    }
                };
                let mut exemplars = Vec::new();
                point.collect_exemplars(reader, baseline.seq, &mut exemplars);
                state.points.push(DataPoint {
                    attributes: point.attributes(),
                    start_time,
                    time: now,
                    value,
                    exemplars,
                });
            }

            baseline.seq = seq;
            point.end_collect(reader, seq);
            point.release();

            if !changed
                && self.reclaim_enabled
                && index >= FIRST_DATA_INDEX
                && self.try_reclaim(index, seq)
            {
                reclaimed += 1;
            }
        }

        state.last_collect = now;
        if reclaimed > 0 {
            self.reclaimed_count
                .fetch_add(reclaimed as u64, Ordering::Relaxed);
            otel_debug!(name: "AggregatorStore.MetricPointReclaimed", count = reclaimed);
        }

        Ok(state.points.len())
    }

    fn metric_points(&self, reader: usize) -> MetricResult<Vec<DataPoint<T>>> {
        let state = self
            .readers
            .get(reader)
            .ok_or_else(|| MetricError::Other(format!("unknown reader {reader}")))?;
        Ok(state.lock()?.points.clone())
    }

    fn stats(&self) -> StoreStats {
        let high_water = self.high_water.load(Ordering::Acquire);
        StoreStats {
            active_points: self.points[..high_water]
                .iter()
                .filter(|point| point.status() != PointStatus::Inactive)
                .count(),
            overflow_measurements: self.overflow_count.load(Ordering::Relaxed),
            dropped_measurements: self.dropped_count.load(Ordering::Relaxed),
            reclaimed_points: self.reclaimed_count.load(Ordering::Relaxed),
        }
    }
}
