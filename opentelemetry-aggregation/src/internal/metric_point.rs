use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};

use opentelemetry::KeyValue;

use crate::attribute_set::AttributeSet;
use crate::data::Exemplar;
use crate::error::MetricResult;
use crate::exemplar::{ExemplarReservoir, ReservoirKind, SpanIds};
use crate::Temporality;

use super::aggregator::Aggregator;
use super::Number;

/// Where a point is in its update and collect cycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PointStatus {
    /// Unused, or reclaimed and waiting on the free list.
    Inactive = 0,
    /// Collected, and not updated since.
    NoPendingUpdate = 1,
    /// Updated since the last collection.
    PendingUpdate = 2,
    /// A collector is reading the point.
    CollectPending = 3,
}

impl From<u8> for PointStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => PointStatus::NoPendingUpdate,
            2 => PointStatus::PendingUpdate,
            3 => PointStatus::CollectPending,
            _ => PointStatus::Inactive,
        }
    }
}

/// Reference count value of a point locked for reclaim.
const RECLAIM_LOCKED: i32 = i32::MIN;

/// The aggregation state of one time series, plus the bookkeeping that keeps
/// concurrent updates, collections and reclaims apart.
pub(crate) struct MetricPoint<T: Number, A> {
    pub(crate) aggregator: A,
    status: AtomicU8,
    /// In-flight updates, or [RECLAIM_LOCKED] while being reclaimed.
    ref_count: AtomicI32,
    /// Bumped on every reclaim so stale lookups can be told apart.
    generation: AtomicU64,
    /// Completed updates in the current generation.
    update_seq: AtomicU64,
    /// Update sequence each reader has exported up to.
    acked: Box<[AtomicU64]>,
    attributes: RwLock<AttributeSet>,
    exemplars: Option<Mutex<ExemplarReservoir<T>>>,
}

impl<T: Number, A: Aggregator<T>> MetricPoint<T, A> {
    pub(crate) fn new(
        config: &A::Config,
        readers: &[Temporality],
        reservoir: Option<&ReservoirKind>,
        attributes: AttributeSet,
    ) -> MetricResult<Self> {
        Ok(MetricPoint {
            aggregator: A::create(config, readers)?,
            status: AtomicU8::new(PointStatus::Inactive as u8),
            ref_count: AtomicI32::new(0),
            generation: AtomicU64::new(0),
            update_seq: AtomicU64::new(0),
            acked: readers.iter().map(|_| AtomicU64::new(0)).collect(),
            attributes: RwLock::new(attributes),
            exemplars: reservoir
                .map(|kind| Mutex::new(ExemplarReservoir::new(kind.clone(), readers.len()))),
        })
    }

    pub(crate) fn status(&self) -> PointStatus {
        PointStatus::from(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn update_seq(&self) -> u64 {
        self.update_seq.load(Ordering::Acquire)
    }

    pub(crate) fn attributes(&self) -> Vec<KeyValue> {
        match self.attributes.read() {
            Ok(attributes) => attributes.as_slice().to_vec(),
            Err(err) => err.into_inner().as_slice().to_vec(),
        }
    }

    pub(crate) fn attributes_hash(&self) -> u64 {
        match self.attributes.read() {
            Ok(attributes) => attributes.hash_value(),
            Err(err) => err.into_inner().hash_value(),
        }
    }

    /// Hands a free point to a new time series.
    ///
    /// Only called under the store's lookup write lock.
    pub(crate) fn activate(&self, attributes: AttributeSet) {
        match self.attributes.write() {
            Ok(mut current) => *current = attributes,
            Err(err) => *err.into_inner() = attributes,
        }
        self.status
            .store(PointStatus::PendingUpdate as u8, Ordering::Release);
    }

    /// Registers an in-flight update if the point still belongs to
    /// `generation` and is not being reclaimed.
    pub(crate) fn try_reserve(&self, generation: u64) -> bool {
        let previous = self.ref_count.fetch_add(1, Ordering::AcqRel);
        if previous < 0 || self.generation.load(Ordering::Acquire) != generation {
            self.ref_count.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Releases a reservation taken to read the point.
    pub(crate) fn release(&self) {
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Publishes the update made under a reservation and releases it.
    pub(crate) fn complete_update(&self) {
        self.update_seq.fetch_add(1, Ordering::AcqRel);
        self.status
            .store(PointStatus::PendingUpdate as u8, Ordering::Release);
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Offers a measurement made under a reservation to the reservoir.
    pub(crate) fn offer_exemplar(&self, value: T, span: SpanIds, filtered: &[KeyValue]) {
        if let Some(reservoir) = &self.exemplars {
            if let Ok(mut reservoir) = reservoir.lock() {
                reservoir.offer(value, self.update_seq() + 1, span, filtered);
            }
        }
    }

    /// Marks the point as being collected if it was updated.
    pub(crate) fn begin_collect(&self) {
        let _ = self.status.compare_exchange(
            PointStatus::PendingUpdate as u8,
            PointStatus::CollectPending as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Marks the point collected unless an update raced with the collection.
    pub(crate) fn end_collect(&self, reader: usize, seq: u64) {
        self.acked[reader].store(seq, Ordering::Release);
        let _ = self.status.compare_exchange(
            PointStatus::CollectPending as u8,
            PointStatus::NoPendingUpdate as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn collect_exemplars(
        &self,
        reader: usize,
        since: u64,
        dest: &mut Vec<Exemplar<T>>,
    ) {
        if let Some(reservoir) = &self.exemplars {
            if let Ok(mut reservoir) = reservoir.lock() {
                reservoir.collect(reader, since, dest);
            }
        }
    }

    /// Locks an idle point for reclaim.
    ///
    /// Succeeds only if every reader exported update `seq`, no update is in
    /// flight and none completed after `seq`.
    pub(crate) fn try_lock_for_reclaim(&self, seq: u64) -> bool {
        if self.status() != PointStatus::NoPendingUpdate
            || self
                .acked
                .iter()
                .any(|acked| acked.load(Ordering::Acquire) != seq)
        {
            return false;
        }

        if self
            .ref_count
            .compare_exchange(0, RECLAIM_LOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if self.update_seq() != seq || self.status() != PointStatus::NoPendingUpdate {
            self.unlock();
            return false;
        }
        true
    }

    /// Releases a reclaim lock without reclaiming.
    pub(crate) fn unlock(&self) {
        // wrapping, so reservations that failed meanwhile still balance out
        self.ref_count.fetch_sub(RECLAIM_LOCKED, Ordering::AcqRel);
    }

    /// Resets a locked point, moves it to the next generation and unlocks it.
    ///
    /// Only called under the store's lookup write lock.
    pub(crate) fn reclaim(&self, config: &A::Config) {
        self.aggregator.reset(config);
        if let Some(reservoir) = &self.exemplars {
            let mut reservoir = reservoir.lock().unwrap_or_else(|err| err.into_inner());
            reservoir.reset();
        }
        match self.attributes.write() {
            Ok(mut attributes) => *attributes = AttributeSet::default(),
            Err(err) => *err.into_inner() = AttributeSet::default(),
        }
        self.update_seq.store(0, Ordering::Release);
        self.acked
            .iter()
            .for_each(|acked| acked.store(0, Ordering::Release));
        self.status
            .store(PointStatus::Inactive as u8, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::KeyValue;

    use super::super::SumTracker;
    use super::*;

    fn point(readers: usize) -> MetricPoint<u64, SumTracker<u64>> {
        let temporalities = vec![Temporality::Delta; readers];
        MetricPoint::new(&(), &temporalities, None, AttributeSet::default()).unwrap()
    }

    #[test]
    fn update_cycle() {
        let p = point(1);
        assert_eq!(p.status(), PointStatus::Inactive);

        p.activate(AttributeSet::from(&[KeyValue::new("k", "v")][..]));
        assert!(p.try_reserve(0));
        p.aggregator.update(&(), 3);
        p.complete_update();

        assert_eq!(p.status(), PointStatus::PendingUpdate);
        assert_eq!(p.update_seq(), 1);
        assert_eq!(p.attributes(), vec![KeyValue::new("k", "v")]);

        p.begin_collect();
        assert_eq!(p.status(), PointStatus::CollectPending);
        p.end_collect(0, 1);
        assert_eq!(p.status(), PointStatus::NoPendingUpdate);
    }

    #[test]
    fn update_during_collect_is_not_masked() {
        let p = point(1);
        p.activate(AttributeSet::default());
        assert!(p.try_reserve(0));
        p.complete_update();

        p.begin_collect();
        assert!(p.try_reserve(0));
        p.complete_update();
        p.end_collect(0, 1);

        assert_eq!(p.status(), PointStatus::PendingUpdate);
    }

    #[test]
    fn reclaim_requires_every_reader_to_ack() {
        let p = point(2);
        p.activate(AttributeSet::default());
        assert!(p.try_reserve(0));
        p.complete_update();
        p.begin_collect();
        p.end_collect(0, 1);

        assert!(!p.try_lock_for_reclaim(1));

        p.end_collect(1, 1);
        assert!(p.try_lock_for_reclaim(1));
        // locked points refuse reservations
        assert!(!p.try_reserve(0));
        p.unlock();
        assert!(p.try_reserve(0));
    }

    #[test]
    fn reclaim_refused_with_update_in_flight() {
        let p = point(1);
        p.activate(AttributeSet::default());
        assert!(p.try_reserve(0));
        p.complete_update();
        p.begin_collect();
        p.end_collect(0, 1);

        assert!(p.try_reserve(0));
        assert!(!p.try_lock_for_reclaim(1));
        p.complete_update();
        assert!(!p.try_lock_for_reclaim(1));
    }

    #[test]
    fn reclaim_moves_to_next_generation() {
        let p = point(1);
        p.activate(AttributeSet::from(&[KeyValue::new("k", 1)][..]));
        assert!(p.try_reserve(0));
        p.aggregator.update(&(), 10);
        p.complete_update();
        p.begin_collect();
        p.end_collect(0, 1);

        assert!(p.try_lock_for_reclaim(1));
        p.reclaim(&());

        assert_eq!(p.status(), PointStatus::Inactive);
        assert_eq!(p.generation(), 1);
        assert_eq!(p.update_seq(), 0);
        assert!(p.attributes().is_empty());
        assert!(!p.try_reserve(0), "stale generation must be rejected");
        assert!(p.try_reserve(1));

        let mut baseline = 0;
        let value = p
            .aggregator
            .collect(&(), 0, Temporality::Cumulative, &mut baseline)
            .unwrap();
        assert_eq!(value, crate::data::PointValue::Sum(0));
    }

    #[test]
    fn reader_reservation_blocks_reclaim() {
        let p = point(1);
        p.activate(AttributeSet::default());
        assert!(p.try_reserve(0));
        p.complete_update();
        p.begin_collect();
        p.end_collect(0, 1);

        assert!(p.try_reserve(0));
        assert!(!p.try_lock_for_reclaim(1));
        p.release();
        assert_eq!(p.update_seq(), 1);
        assert!(p.try_lock_for_reclaim(1));
    }

    #[test]
    fn failed_reservations_during_lock_balance_out() {
        let p = point(1);
        p.activate(AttributeSet::default());
        assert!(p.try_reserve(0));
        p.complete_update();
        p.begin_collect();
        p.end_collect(0, 1);
        assert!(p.try_lock_for_reclaim(1));

        for _ in 0..3 {
            assert!(!p.try_reserve(0));
        }
        p.reclaim(&());

        assert_eq!(p.ref_count.load(Ordering::Acquire), 0);
    }
}
