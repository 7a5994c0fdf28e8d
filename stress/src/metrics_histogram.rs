/*
    Measures update throughput of a base-2 exponential histogram with 1000
    time series, collected by a delta and a cumulative reader.
*/

use lazy_static::lazy_static;
use opentelemetry::KeyValue;
use opentelemetry_aggregation::{Aggregation, AggregatorStore, InstrumentKind, Temporality};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::cell::RefCell;

mod throughput;

lazy_static! {
    static ref STORE: AggregatorStore<f64> = AggregatorStore::builder(
        InstrumentKind::Histogram,
        Aggregation::base2_exponential_histogram()
    )
    .with_reader(Temporality::Delta)
    .with_reader(Temporality::Cumulative)
    .build()
    .expect("valid store configuration");
    static ref ATTRIBUTE_VALUES: [&'static str; 10] = [
        "value1", "value2", "value3", "value4", "value5", "value6", "value7", "value8", "value9",
        "value10"
    ];
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

fn main() {
    throughput::test_throughput(test_histogram, collect);
}

fn test_histogram() {
    let len = ATTRIBUTE_VALUES.len();
    let (value, first, second, third) = CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        (
            rng.random_range(0.0..10_000.0),
            rng.random_range(0..len),
            rng.random_range(0..len),
            rng.random_range(0..len),
        )
    });

    STORE.update(
        value,
        &[
            KeyValue::new("attribute1", ATTRIBUTE_VALUES[first]),
            KeyValue::new("attribute2", ATTRIBUTE_VALUES[second]),
            KeyValue::new("attribute3", ATTRIBUTE_VALUES[third]),
        ],
    );
}

fn collect() {
    for reader in STORE.reader_ids() {
        if let Err(err) = STORE.snapshot(reader) {
            eprintln!("collect failed: {err}");
        }
    }
}
