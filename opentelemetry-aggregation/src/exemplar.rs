//! Exemplar sampling.
//!
//! An [ExemplarFilter] decides which measurements are offered to a point's
//! reservoir. Sums and gauges keep a small fixed-size reservoir filled by
//! reservoir sampling, explicit bucket histograms keep the latest offered
//! measurement of every bucket.

use std::cell::RefCell;
use std::str::FromStr;

use opentelemetry::KeyValue;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::data::Exemplar;
use crate::error::MetricError;
use crate::Number;

/// Decides which measurements are offered as exemplars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExemplarFilter {
    /// No measurement is sampled.
    #[default]
    AlwaysOff,
    /// Every measurement is offered.
    AlwaysOn,
    /// Measurements recorded inside a sampled span are offered.
    TraceBased,
}

impl FromStr for ExemplarFilter {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always_off" => Ok(ExemplarFilter::AlwaysOff),
            "always_on" => Ok(ExemplarFilter::AlwaysOn),
            "trace_based" => Ok(ExemplarFilter::TraceBased),
            other => Err(MetricError::Config(format!(
                "unknown exemplar filter {other:?}"
            ))),
        }
    }
}

impl ExemplarFilter {
    /// Whether a measurement made now should be offered, and the ids of the
    /// span it was made in.
    pub(crate) fn sample(&self) -> Option<SpanIds> {
        match self {
            ExemplarFilter::AlwaysOff => None,
            ExemplarFilter::AlwaysOn => Some(current_span().unwrap_or_default()),
            ExemplarFilter::TraceBased => current_span(),
        }
    }
}

/// Trace and span id of the span active when a measurement was made.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SpanIds {
    trace_id: [u8; 16],
    span_id: [u8; 8],
}

/// The ids of the current span if it is sampled.
#[cfg(feature = "trace")]
fn current_span() -> Option<SpanIds> {
    use opentelemetry::trace::TraceContextExt;

    opentelemetry::Context::map_current(|cx| {
        if !cx.has_active_span() {
            return None;
        }
        let span = cx.span();
        let span_context = span.span_context();
        (span_context.is_valid() && span_context.is_sampled()).then(|| SpanIds {
            trace_id: span_context.trace_id().to_bytes(),
            span_id: span_context.span_id().to_bytes(),
        })
    })
}

#[cfg(not(feature = "trace"))]
fn current_span() -> Option<SpanIds> {
    None
}

thread_local! {
    static CURRENT_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

/// An exemplar together with the point update it was taken from.
#[derive(Debug, Clone)]
struct Cell<T> {
    exemplar: Exemplar<T>,
    update: u64,
}

/// How a point picks which offered measurements to keep.
#[derive(Debug, Clone)]
pub(crate) enum ReservoirKind {
    /// Uniform reservoir sampling with `size` cells.
    FixedSize(usize),
    /// One cell per histogram bucket, keeping the latest measurement.
    AlignedHistogram(Vec<f64>),
}

/// Per point exemplar storage.
///
/// A sampling interval ends once every reader collected it.
#[derive(Debug)]
pub(crate) struct ExemplarReservoir<T> {
    kind: ReservoirKind,
    cells: Vec<Option<Cell<T>>>,
    /// Measurements offered in the current interval.
    offered: u64,
    /// Readers that collected the current interval.
    collected: Vec<bool>,
}

impl<T: Number> ExemplarReservoir<T> {
    pub(crate) fn new(kind: ReservoirKind, readers: usize) -> Self {
        let size = match &kind {
            ReservoirKind::FixedSize(size) => (*size).max(1),
            ReservoirKind::AlignedHistogram(bounds) => bounds.len() + 1,
        };
        ExemplarReservoir {
            kind,
            cells: vec![None; size],
            offered: 0,
            collected: vec![false; readers.max(1)],
        }
    }

    /// Offers a measurement made by point update number `update`.
    pub(crate) fn offer(
        &mut self,
        value: T,
        update: u64,
        span: SpanIds,
        filtered_attributes: &[KeyValue],
    ) {
        self.offered += 1;
        let cell = match &self.kind {
            ReservoirKind::FixedSize(_) => {
                let seen = self.offered;
                if seen as usize <= self.cells.len() {
                    seen as usize - 1
                } else {
                    let pick = CURRENT_RNG.with(|rng| rng.borrow_mut().random_range(0..seen));
                    if pick as usize >= self.cells.len() {
                        return;
                    }
                    pick as usize
                }
            }
            ReservoirKind::AlignedHistogram(bounds) => {
                let value = value.into_float();
                bounds.partition_point(|&bound| bound < value)
            }
        };

        self.cells[cell] = Some(Cell {
            exemplar: Exemplar {
                filtered_attributes: filtered_attributes.to_vec(),
                time: opentelemetry::time::now(),
                value,
                span_id: span.span_id,
                trace_id: span.trace_id,
            },
            update,
        });
    }

    /// Appends exemplars taken after point update `since` for `reader`.
    ///
    /// The last reader to collect the current interval starts a new one.
    pub(crate) fn collect(&mut self, reader: usize, since: u64, dest: &mut Vec<Exemplar<T>>) {
        dest.extend(
            self.cells
                .iter()
                .flatten()
                .filter(|cell| cell.update > since)
                .map(|cell| cell.exemplar.clone()),
        );

        if let Some(collected) = self.collected.get_mut(reader) {
            *collected = true;
        }
        if self.collected.iter().all(|c| *c) {
            self.offered = 0;
            self.collected.iter_mut().for_each(|c| *c = false);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = None);
        self.offered = 0;
        self.collected.iter_mut().for_each(|c| *c = false);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("always_on", ExemplarFilter::AlwaysOn)]
    #[case("ALWAYS_OFF", ExemplarFilter::AlwaysOff)]
    #[case(" trace_based ", ExemplarFilter::TraceBased)]
    fn parse_filter(#[case] input: &str, #[case] expected: ExemplarFilter) {
        assert_eq!(input.parse::<ExemplarFilter>().unwrap(), expected);
    }

    #[test]
    fn parse_unknown_filter() {
        assert!(matches!(
            "sometimes".parse::<ExemplarFilter>(),
            Err(MetricError::Config(_))
        ));
    }

    #[test]
    fn filters_without_active_span() {
        assert_eq!(ExemplarFilter::AlwaysOff.sample(), None);
        assert_eq!(ExemplarFilter::AlwaysOn.sample(), Some(SpanIds::default()));
        assert_eq!(ExemplarFilter::TraceBased.sample(), None);
    }

    #[test]
    fn fixed_size_reservoir_keeps_first_offers() {
        let mut reservoir = ExemplarReservoir::<i64>::new(ReservoirKind::FixedSize(2), 1);
        let filtered = [KeyValue::new("user", "alice")];
        reservoir.offer(5, 1, SpanIds::default(), &filtered);
        reservoir.offer(7, 2, SpanIds::default(), &[]);

        let mut exemplars = Vec::new();
        reservoir.collect(0, 0, &mut exemplars);

        let values: Vec<i64> = exemplars.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![5, 7]);
        assert_eq!(exemplars[0].filtered_attributes, filtered.to_vec());
    }

    #[test]
    fn fixed_size_reservoir_samples_within_size() {
        let mut reservoir = ExemplarReservoir::<u64>::new(ReservoirKind::FixedSize(1), 1);
        for update in 1..=100 {
            reservoir.offer(update, update, SpanIds::default(), &[]);
        }

        let mut exemplars = Vec::new();
        reservoir.collect(0, 0, &mut exemplars);
        assert_eq!(exemplars.len(), 1);
        assert!((1..=100).contains(&exemplars[0].value));
    }

    #[test]
    fn collect_only_returns_newer_exemplars() {
        let mut reservoir = ExemplarReservoir::<f64>::new(ReservoirKind::FixedSize(1), 1);
        reservoir.offer(1.0, 1, SpanIds::default(), &[]);

        let mut first = Vec::new();
        reservoir.collect(0, 0, &mut first);
        let mut second = Vec::new();
        reservoir.collect(0, 1, &mut second);
        // a new interval always replaces the cell
        reservoir.offer(2.0, 2, SpanIds::default(), &[]);
        let mut third = Vec::new();
        reservoir.collect(0, 1, &mut third);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(third.iter().map(|e| e.value).collect::<Vec<_>>(), vec![2.0]);
    }

    #[test]
    fn aligned_reservoir_keeps_one_per_bucket() {
        let mut reservoir =
            ExemplarReservoir::<f64>::new(ReservoirKind::AlignedHistogram(vec![1.0, 10.0]), 1);
        for (update, value) in [0.5, 0.7, 5.0, 50.0, 60.0].into_iter().enumerate() {
            reservoir.offer(value, update as u64 + 1, SpanIds::default(), &[]);
        }

        let mut exemplars = Vec::new();
        reservoir.collect(0, 0, &mut exemplars);
        let values: Vec<f64> = exemplars.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![0.7, 5.0, 60.0]);

        reservoir.reset();
        let mut after_reset = Vec::new();
        reservoir.collect(0, 0, &mut after_reset);
        assert!(after_reset.is_empty());
    }

    #[test]
    fn sampling_interval_ends_when_every_reader_collected() {
        let mut reservoir = ExemplarReservoir::<u64>::new(ReservoirKind::FixedSize(1), 2);
        reservoir.offer(1, 1, SpanIds::default(), &[]);
        reservoir.offer(2, 2, SpanIds::default(), &[]);

        let mut fast = Vec::new();
        reservoir.collect(0, 0, &mut fast);
        assert_eq!(reservoir.offered, 2);
        reservoir.collect(0, 2, &mut fast);
        assert_eq!(reservoir.offered, 2);

        let mut slow = Vec::new();
        reservoir.collect(1, 0, &mut slow);
        assert_eq!(reservoir.offered, 0);
        assert_eq!(fast.len(), 1);
        assert_eq!(slow, fast);
    }
}
