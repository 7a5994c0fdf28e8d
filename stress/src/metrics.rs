/*
    Measures update throughput of a delta Sum store for a Counter with 1000
    time series, while a reader collects every 500ms.
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
    throughput::test_throughput(test_counter, collect);
}

fn test_counter() {
    let len = ATTRIBUTE_VALUES.len();
    let (index_first_attribute, index_second_attribute, index_third_attribute) =
        CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            (
                rng.random_range(0..len),
                rng.random_range(0..len),
                rng.random_range(0..len),
            )
        });

    // each attribute has 10 possible values, so there are 1000 possible combinations (time-series)
    STORE.update(
        1,
        &[
            KeyValue::new("attribute1", ATTRIBUTE_VALUES[index_first_attribute]),
            KeyValue::new("attribute2", ATTRIBUTE_VALUES[index_second_attribute]),
            KeyValue::new("attribute3", ATTRIBUTE_VALUES[index_third_attribute]),
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
