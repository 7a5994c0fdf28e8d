//! # OpenTelemetry Metrics Aggregation
//!
//! The aggregation core of an OpenTelemetry metrics SDK. An
//! [AggregatorStore] holds a fixed number of metric points for one
//! instrument, keyed by attribute set, and aggregates measurements into them
//! concurrently from any number of threads. Readers collect the store with
//! their own [Temporality]: cumulative readers see running totals, delta
//! readers see what changed since their previous collection.
//!
//! Supported aggregations are sums, last values, explicit bucket histograms
//! and base-2 exponential histograms.
//!
//! ```
//! use opentelemetry::KeyValue;
//! use opentelemetry_aggregation::{Aggregation, AggregatorStore, InstrumentKind, Temporality};
//!
//! # fn main() -> opentelemetry_aggregation::error::MetricResult<()> {
//! let store = AggregatorStore::<u64>::builder(InstrumentKind::Counter, Aggregation::Sum)
//!     .with_reader(Temporality::Delta)
//!     .with_cardinality_limit(100)
//!     .build()?;
//! let reader = store.reader_ids()[0];
//!
//! store.update(1, &[KeyValue::new("method", "GET")]);
//! store.update(2, &[KeyValue::new("method", "GET")]);
//!
//! store.snapshot(reader)?;
//! let points = store.metric_points(reader)?;
//! assert_eq!(points[0].sum(), Some(3));
//! # Ok(())
//! # }
//! ```
//!
//! ## Cardinality
//!
//! A store never allocates after it is built. Measurements without
//! attributes use a dedicated point, and once every point is taken new
//! attribute sets are aggregated into a single overflow point carrying
//! `otel.metric.overflow=true`. When every reader is delta, points that go a
//! full collection cycle without updates are reclaimed for new attribute
//! sets.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]

mod aggregation;
mod aggregator_store;
mod attribute_set;
pub mod data;
pub mod error;
pub mod exemplar;
mod internal;
mod temporality;

pub use aggregation::{Aggregation, DEFAULT_HISTOGRAM_BOUNDARIES};
pub use aggregator_store::{AggregatorStore, AggregatorStoreBuilder, ReaderId, StoreStats};
pub use attribute_set::AttributeSet;
pub use internal::{
    index_range, lower_boundary, map_to_index, CircularBuckets, Number, EXPO_MAX_SCALE,
    EXPO_MIN_SCALE,
};
pub use temporality::{InstrumentKind, Temporality};
