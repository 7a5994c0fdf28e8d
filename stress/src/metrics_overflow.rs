/*
    Measures update throughput when user code produces unbounded time series.
    The store must stay within its cardinality limit, routing new series to
    the overflow point and reclaiming idle points on every delta collect.
*/

use lazy_static::lazy_static;
use opentelemetry::KeyValue;
use opentelemetry_aggregation::{Aggregation, AggregatorStore, InstrumentKind, Temporality};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::cell::RefCell;

mod throughput;

lazy_static! {
    static ref STORE: AggregatorStore<u64> =
        AggregatorStore::builder(InstrumentKind::Counter, Aggregation::Sum)
            .with_reader(Temporality::Delta)
            .with_cardinality_limit(2000)
            .build()
            .expect("valid store configuration");
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

fn main() {
    throughput::test_throughput(test_counter, collect);
}

fn test_counter() {
    let rand = CURRENT_RNG.with(|rng| rng.borrow_mut().random_range(0..100_000_000));
    STORE.update(1, &[KeyValue::new("A", rand)]);
}

fn collect() {
    for reader in STORE.reader_ids() {
        if let Err(err) = STORE.snapshot(reader) {
            eprintln!("collect failed: {err}");
        }
    }
    let stats = STORE.stats();
    println!(
        "Active points: {}, overflowed: {}, reclaimed: {}",
        stats.active_points, stats.overflow_measurements, stats.reclaimed_points
    );
}
