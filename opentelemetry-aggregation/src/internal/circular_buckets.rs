use std::mem;

use crate::error::{MetricError, MetricResult};

/// Bucket counts for a contiguous index range stored in a fixed-size ring.
///
/// The range `[offset, offset + size)` can grow in either direction without
/// moving stored counts, as long as it fits in `capacity` buckets. When it
/// would not fit, [try_increment](Self::try_increment) reports how many
/// halvings of the index space are needed instead of recording the value.
#[derive(Clone, Debug, PartialEq)]
pub struct CircularBuckets {
    counts: Box<[u64]>,
    /// Ring position of `begin`.
    head: usize,
    begin: i32,
    end: i32,
    populated: bool,
}

impl CircularBuckets {
    /// Creates an empty bucket set holding at most `capacity` buckets.
    pub fn new(capacity: usize) -> MetricResult<Self> {
        if capacity == 0 {
            return Err(MetricError::Config(
                "bucket capacity must be at least 1".into(),
            ));
        }
        Ok(CircularBuckets {
            counts: vec![0; capacity].into_boxed_slice(),
            head: 0,
            begin: 0,
            end: 0,
            populated: false,
        })
    }

    /// The maximum number of buckets.
    pub fn capacity(&self) -> usize {
        self.counts.len()
    }

    /// The number of buckets in the populated range.
    pub fn size(&self) -> usize {
        if self.populated {
            (i64::from(self.end) - i64::from(self.begin) + 1) as usize
        } else {
            0
        }
    }

    /// Whether no bucket has been populated yet.
    pub fn is_empty(&self) -> bool {
        !self.populated
    }

    /// The index of the first bucket, `0` when empty.
    pub fn offset(&self) -> i32 {
        if self.populated {
            self.begin
        } else {
            0
        }
    }

    /// The count of the bucket at `index`, `0` outside the populated range.
    pub fn get(&self, index: i32) -> u64 {
        if !self.populated || index < self.begin || index > self.end {
            return 0;
        }
        self.counts[self.slot(index)]
    }

    /// Adds `value` to the bucket at `index`.
    ///
    /// Returns `0` when the value was recorded. Otherwise nothing is recorded
    /// and the result is the number of times indexes must be halved (see
    /// [scale_down](Self::scale_down)) before `index` fits in the ring
    /// together with the current range.
    pub fn try_increment(&mut self, index: i32, value: u64) -> u32 {
        let capacity = self.counts.len() as i64;

        if !self.populated {
            self.head = 0;
            self.begin = index;
            self.end = index;
            self.populated = true;
        } else if index > self.end {
            if i64::from(index) - i64::from(self.begin) >= capacity {
                return self.halvings_to_fit(self.begin, index);
            }
            self.end = index;
        } else if index < self.begin {
            if i64::from(self.end) - i64::from(index) >= capacity {
                return self.halvings_to_fit(index, self.end);
            }
            let grow = (i64::from(self.begin) - i64::from(index)) as usize;
            self.head = (self.head + self.counts.len() - grow) % self.counts.len();
            self.begin = index;
        }

        let slot = self.slot(index);
        self.counts[slot] += value;
        0
    }

    /// Re-buckets every count from index `k` to index `k >> n`.
    pub fn scale_down(&mut self, n: u32) {
        if !self.populated || n == 0 {
            return;
        }

        let shift = n.min(63);
        let begin = i64::from(self.begin);
        let new_begin = begin >> shift;
        let capacity = self.counts.len();

        // destinations never run ahead of sources, so this compacts in place
        for i in 0..self.size() {
            let from = (self.head + i) % capacity;
            let count = mem::take(&mut self.counts[from]);
            if count == 0 {
                continue;
            }
            let distance = (((begin + i as i64) >> shift) - new_begin) as usize;
            self.counts[(self.head + distance) % capacity] += count;
        }

        self.begin = new_begin as i32;
        self.end = (i64::from(self.end) >> shift) as i32;
    }

    /// An independent snapshot of `(offset, counts)`.
    pub fn copy(&self) -> (i32, Vec<u64>) {
        (self.offset(), self.iter().collect())
    }

    /// Iterates the counts of the populated range in index order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.size()).map(move |i| self.counts[(self.head + i) % self.counts.len()])
    }

    /// Clears all counts, keeping the capacity.
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.head = 0;
        self.begin = 0;
        self.end = 0;
        self.populated = false;
    }

    fn slot(&self, index: i32) -> usize {
        let distance = (i64::from(index) - i64::from(self.begin)) as usize;
        (self.head + distance) % self.counts.len()
    }

    fn halvings_to_fit(&self, low: i32, high: i32) -> u32 {
        let capacity = self.counts.len() as i64;
        let (mut low, mut high) = (i64::from(low), i64::from(high));
        let mut n = 0;
        // with capacity 1, a range straddling -1 and 0 never converges
        while high - low >= capacity && n < 32 {
            low >>= 1;
            high >>= 1;
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn buckets(capacity: usize) -> CircularBuckets {
        CircularBuckets::new(capacity).unwrap()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            CircularBuckets::new(0),
            Err(MetricError::Config(_))
        ));
    }

    #[test]
    fn empty_buckets() {
        let b = buckets(1);

        assert_eq!(b.capacity(), 1);
        assert_eq!(b.size(), 0);
        assert!(b.is_empty());
        assert_eq!(b.offset(), 0);
        assert_eq!(b.get(0), 0);
        assert_eq!(b.copy(), (0, vec![]));
    }

    #[test]
    fn index_operations() {
        let mut b = buckets(5);

        assert_eq!(b.try_increment(2, 5), 0);
        assert_eq!(b.try_increment(0, 3), 0);
        assert_eq!(b.try_increment(-2, 1), 0);
        assert_eq!(b.try_increment(1, 4), 0);
        assert_eq!(b.try_increment(-1, 2), 0);

        assert_eq!(b.offset(), -2);
        assert_eq!(b.size(), 5);
        assert_eq!(b.copy(), (-2, vec![1, 2, 3, 4, 5]));
        assert_eq!(b.get(-3), 0);
        assert_eq!(b.get(3), 0);
        assert_eq!(b.get(1), 4);
    }

    #[rstest]
    #[case(9, 1)]
    #[case(5, 1)]
    #[case(-1, 1)]
    #[case(10, 2)]
    #[case(19, 2)]
    #[case(20, 3)]
    #[case(39, 3)]
    #[case(40, 4)]
    fn halvings_needed_to_fit(#[case] index: i32, #[case] expected: u32) {
        let mut b = buckets(5);
        for i in [0, 1, 3, 4, 2] {
            assert_eq!(b.try_increment(i, 1), 0);
        }

        assert_eq!(b.try_increment(index, 1), expected);
        // nothing is recorded when a rescale is needed
        assert_eq!(b.copy(), (0, vec![1, 1, 1, 1, 1]));
    }

    #[rstest]
    #[case(1, 30)]
    #[case(0, 30)]
    #[case(-1, 31)]
    #[case(i32::MIN + 1, 31)]
    #[case(i32::MIN, 31)]
    fn halvings_needed_across_extreme_indexes(#[case] index: i32, #[case] expected: u32) {
        let mut b = buckets(2);
        assert_eq!(b.try_increment(i32::MAX, 1), 0);

        assert_eq!(b.try_increment(index, 1), expected);
    }

    #[test]
    fn single_bucket_straddling_zero_is_bounded() {
        let mut b = buckets(1);
        assert_eq!(b.try_increment(0, 1), 0);

        assert_eq!(b.try_increment(-1, 1), 32);
    }

    #[rstest]
    #[case(i32::MAX, 0x3FFF_FFFF)]
    #[case(i32::MIN, -0x4000_0000)]
    fn scale_down_extreme_indexes(#[case] index: i32, #[case] expected_offset: i32) {
        let mut b = buckets(2);
        b.try_increment(index, 1);

        b.scale_down(1);

        assert_eq!(b.copy(), (expected_offset, vec![1]));
    }

    #[test]
    fn scale_down_empty_is_noop() {
        let mut b = buckets(1);
        b.scale_down(1);

        assert!(b.is_empty());
        assert_eq!(b.try_increment(7, 1), 0);
        assert_eq!(b.copy(), (7, vec![1]));
    }

    #[rstest]
    #[case(3, vec![(0, 2), (1, 4), (2, 8)], 0, vec![6, 8])]
    #[case(3, vec![(1, 2), (2, 4), (3, 8)], 0, vec![2, 12])]
    #[case(3, vec![(2, 2), (3, 4), (4, 8)], 1, vec![6, 8])]
    #[case(4, vec![(1, 2), (2, 4), (3, 8), (4, 16)], 0, vec![2, 12, 16])]
    #[case(4, vec![(0, 2), (1, 4), (2, 8), (2, 16)], 0, vec![6, 24])]
    fn scale_down_by_one(
        #[case] capacity: usize,
        #[case] increments: Vec<(i32, u64)>,
        #[case] expected_offset: i32,
        #[case] expected_counts: Vec<u64>,
    ) {
        let mut b = buckets(capacity);
        for (index, value) in increments {
            assert_eq!(b.try_increment(index, value), 0);
        }

        b.scale_down(1);

        assert_eq!(b.copy(), (expected_offset, expected_counts));
    }

    #[test]
    fn scale_down_with_rotated_ring() {
        let mut b = buckets(4);
        // growing downward moves the head away from slot 0
        for (index, value) in [(5, 1), (4, 2), (3, 4), (6, 8)] {
            assert_eq!(b.try_increment(index, value), 0);
        }
        assert_eq!(b.copy(), (3, vec![4, 2, 1, 8]));

        b.scale_down(2);

        assert_eq!(b.copy(), (0, vec![4, 11]));
        assert_eq!(b.try_increment(3, 1), 0);
        assert_eq!(b.copy(), (0, vec![4, 11, 0, 1]));
    }

    #[test]
    fn scale_down_then_increment_agrees_with_fresh_buckets() {
        let values = [-40, -7, -1, 0, 3, 17, 22, 60];
        let mut b = buckets(8);
        let mut shift = 0;
        for index in values {
            loop {
                let n = b.try_increment(index >> shift, 1);
                if n == 0 {
                    break;
                }
                b.scale_down(n);
                shift += n;
            }
        }

        let mut expected = buckets(8);
        for index in values {
            assert_eq!(expected.try_increment(index >> shift, 1), 0);
        }
        assert!(shift > 0);
        assert_eq!(b.copy(), expected.copy());
    }

    #[test]
    fn reset_clears_counts() {
        let mut b = buckets(3);
        b.try_increment(10, 1);
        b.try_increment(9, 1);

        b.reset();

        assert!(b.is_empty());
        assert_eq!(b.try_increment(-5, 2), 0);
        assert_eq!(b.copy(), (-5, vec![2]));
    }
}
