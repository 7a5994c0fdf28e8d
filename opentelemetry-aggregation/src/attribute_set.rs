use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, Hash, Hasher};

use opentelemetry::{Key, KeyValue, Value};

/// Inputs longer than this skip the allocation-free lookup path and are
/// canonicalized into an [AttributeSet] first.
const MAX_BORROWED_LOOKUP_LEN: usize = 16;

/// A unique set of attributes identifying one time series.
///
/// Pairs are kept sorted by key with duplicate keys collapsed (the last
/// occurrence wins). The hash is order independent, so an unsorted slice of
/// distinct keys hashes to the same value as the set built from it.
#[derive(Clone, Default, Debug)]
pub struct AttributeSet {
    attributes: Vec<KeyValue>,
    hash: u64,
}

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        let mut sorted = values.to_vec();
        // stable, so later duplicates stay after earlier ones
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let mut attributes: Vec<KeyValue> = Vec::with_capacity(sorted.len());
        for kv in sorted {
            match attributes.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => attributes.push(kv),
            }
        }

        let hash = hash_attributes(&attributes);
        AttributeSet { attributes, hash }
    }
}

impl AttributeSet {
    /// Iterate over key value pairs in the set
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.attributes.iter().map(|kv| (&kv.key, &kv.value))
    }

    /// Number of distinct keys in the set.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the set has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The sorted attributes.
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.attributes
    }

    /// Consumes the set, returning the sorted attributes.
    pub fn into_vec(self) -> Vec<KeyValue> {
        self.attributes
    }

    pub(crate) fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Compares the set with a slice whose keys are known to be distinct.
    pub(crate) fn matches(&self, values: &[KeyValue]) -> bool {
        values.len() == self.attributes.len()
            && values.iter().all(|kv| {
                self.attributes
                    .binary_search_by(|probe| probe.key.cmp(&kv.key))
                    .map(|i| value_eq(&self.attributes[i].value, &kv.value))
                    .unwrap_or(false)
            })
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .zip(other.attributes.iter())
                .all(|(a, b)| a.key == b.key && value_eq(&a.value, &b.value))
    }
}

impl Eq for AttributeSet {}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash)
    }
}

/// Order independent hash of a list of attributes with distinct keys.
pub(crate) fn hash_attributes(values: &[KeyValue]) -> u64 {
    values
        .iter()
        .fold(0u64, |acc, kv| acc.wrapping_add(hash_key_value(kv)))
}

/// Whether `values` can be looked up without building an [AttributeSet].
pub(crate) fn is_borrowed_lookup_eligible(values: &[KeyValue]) -> bool {
    values.len() <= MAX_BORROWED_LOOKUP_LEN
        && values
            .iter()
            .enumerate()
            .all(|(i, kv)| values[i + 1..].iter().all(|other| other.key != kv.key))
}

fn hash_key_value(kv: &KeyValue) -> u64 {
    let mut hasher = DefaultHasher::new();
    kv.key.hash(&mut hasher);
    match &kv.value {
        Value::Bool(b) => {
            hasher.write_u8(0);
            b.hash(&mut hasher);
        }
        Value::I64(i) => {
            hasher.write_u8(1);
            i.hash(&mut hasher);
        }
        Value::F64(f) => {
            hasher.write_u8(2);
            f.to_bits().hash(&mut hasher);
        }
        Value::String(s) => {
            hasher.write_u8(3);
            s.as_str().hash(&mut hasher);
        }
        other => {
            hasher.write_u8(4);
            other.as_str().hash(&mut hasher);
        }
    }
    hasher.finish()
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::F64(x), Value::F64(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

/// Hasher for maps keyed by an already computed `u64` hash.
///
/// Only `write_u64` is supported; any other key type panics.
#[derive(Default, Clone, Debug)]
pub(crate) struct NoOpHasher {
    hashed: u64,
}

impl Hasher for NoOpHasher {
    fn finish(&self) -> u64 {
        self.hashed
    }

    fn write(&mut self, _bytes: &[u8]) {
        panic!("NoOpHasher only hashes precomputed u64 values")
    }

    fn write_u64(&mut self, i: u64) {
        self.hashed = i;
    }
}

impl BuildHasher for NoOpHasher {
    type Hasher = NoOpHasher;

    fn build_hasher(&self) -> Self::Hasher {
        NoOpHasher::default()
    }
}
