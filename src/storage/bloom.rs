//! Bloom filter over blob id strings.
//!
//! False positives are possible, false negatives are not: once an element is
//! inserted, `might_contain` returns true for it until the filter is dropped.
//!
//! Each filter hashes with its own seed, so the elements wrongly reported by
//! one filter are unrelated to those of the next.

use bitvec::prelude::*;
use std::f64::consts::LN_2;
use std::io::Cursor;

use crate::error::{StorageError, StorageResult};

/// Upper bound on hash functions, whatever the requested probability.
const MAX_HASH_COUNT: usize = 32;

/// Largest filter allocated: 2^34 bits, 2 GiB.
pub const MAX_SIZE_BITS: u64 = 1 << 34;

/// Insert-only bloom filter sized from an expected count and a target
/// false positive probability.
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: BitVec<u64, Lsb0>,
    /// Number of hash functions (k)
    k: usize,
    /// Size in bits (m)
    m: usize,
    /// Number of elements inserted (n)
    n: usize,
    seed: u32,
}

impl BloomFilter {
    /// Creates a randomly seeded filter for `expected_elements` at
    /// `false_positive_probability`.
    pub fn new(expected_elements: usize, false_positive_probability: f64) -> StorageResult<Self> {
        Self::with_seed(expected_elements, false_positive_probability, rand::random())
    }

    /// Creates a filter hashing with `seed`.
    pub fn with_seed(expected_elements: usize, false_positive_probability: f64, seed: u32) -> StorageResult<Self> {
        let m = Self::required_bits(expected_elements, false_positive_probability)?;
        // k = (m / n) * ln(2)
        let k = ((m as f64 / expected_elements as f64) * LN_2).round() as usize;
        let k = k.clamp(1, MAX_HASH_COUNT);

        Ok(Self {
            bits: bitvec![u64, Lsb0; 0; m],
            k,
            m,
            n: 0,
            seed,
        })
    }

    /// Size in bits of a filter for `expected_elements` at
    /// `false_positive_probability`: m = -n * ln(p) / ln(2)^2.
    ///
    /// Fails on parameters no filter can be built for, including filters
    /// above [`MAX_SIZE_BITS`].
    pub fn required_bits(expected_elements: usize, false_positive_probability: f64) -> StorageResult<usize> {
        if expected_elements == 0 {
            return Err(StorageError::invalid_argument(
                "'expectedBlobCount' must be strictly positive",
            ));
        }
        if !(false_positive_probability > 0.0 && false_positive_probability < 1.0) {
            return Err(StorageError::invalid_argument(
                "'associatedProbability' must be strictly between 0 and 1",
            ));
        }

        let n = expected_elements as f64;
        let m = (-n * false_positive_probability.ln() / (LN_2 * LN_2)).ceil();
        let limit = MAX_SIZE_BITS.min(BitSlice::<u64, Lsb0>::MAX_BITS as u64);
        if !(m <= limit as f64) {
            return Err(StorageError::invalid_argument(format!(
                "'expectedBlobCount' {} at 'associatedProbability' {} needs a bloom filter above {} bits",
                expected_elements, false_positive_probability, limit
            )));
        }
        Ok((m as usize).max(64))
    }

    pub fn insert(&mut self, element: &[u8]) {
        let (h1, h2) = hash_pair(element, self.seed);
        for i in 0..self.k {
            let position = self.position(h1, h2, i);
            self.bits.set(position, true);
        }
        self.n += 1;
    }

    /// `false` means the element was definitely never inserted.
    pub fn might_contain(&self, element: &[u8]) -> bool {
        let (h1, h2) = hash_pair(element, self.seed);
        (0..self.k).all(|i| self.bits[self.position(h1, h2, i)])
    }

    /// Double hashing: h(i) = h1 + i * h2.
    #[inline]
    fn position(&self, h1: u64, h2: u64, i: usize) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.m as u64) as usize
    }

    pub fn size_bits(&self) -> usize {
        self.m
    }

    pub fn hash_count(&self) -> usize {
        self.k
    }

    pub fn elements_inserted(&self) -> usize {
        self.n
    }

    /// Estimated false positive rate at the current fill: (1 - e^(-kn/m))^k
    pub fn false_positive_rate(&self) -> f64 {
        let exponent = -(self.k as f64) * (self.n as f64) / (self.m as f64);
        (1.0 - exponent.exp()).powi(self.k as i32)
    }
}

/// Both halves of a 128-bit MurmurHash3.
fn hash_pair(element: &[u8], seed: u32) -> (u64, u64) {
    // Reading from an in-memory cursor cannot fail.
    let hash = murmur3::murmur3_x64_128(&mut Cursor::new(element), seed).unwrap_or_default();
    let h1 = hash as u64;
    // An odd step visits distinct positions for every i.
    let h2 = ((hash >> 64) as u64) | 1;
    (h1, h2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01).unwrap();
        let elements: Vec<String> = (0..1000).map(|i| format!("blob-{}", i)).collect();
        for element in &elements {
            filter.insert(element.as_bytes());
        }
        for element in &elements {
            assert!(filter.might_contain(element.as_bytes()));
        }
        assert_eq!(filter.elements_inserted(), 1000);
    }

    #[test]
    fn false_positive_rate_stays_near_target() {
        let mut filter = BloomFilter::new(10_000, 0.01).unwrap();
        for i in 0..10_000 {
            filter.insert(format!("in-{}", i).as_bytes());
        }
        let false_positives = (0..10_000)
            .filter(|i| filter.might_contain(format!("out-{}", i).as_bytes()))
            .count();

        // 1% target, generous margin for statistical noise.
        assert!(false_positives < 300, "{} false positives", false_positives);
        assert!(filter.false_positive_rate() < 0.03);
    }

    #[test]
    fn sizing_follows_the_standard_formulas() {
        let filter = BloomFilter::new(1_000_000, 0.01).unwrap();
        // ~9.59 bits per element, ~7 hash functions.
        assert!(filter.size_bits() >= 9_585_058 && filter.size_bits() <= 9_585_060);
        assert_eq!(filter.hash_count(), 7);
    }

    #[test]
    fn seeds_change_false_positives() {
        let mut first = BloomFilter::with_seed(100, 0.1, 1).unwrap();
        let mut second = BloomFilter::with_seed(100, 0.1, 2).unwrap();
        for i in 0..100 {
            first.insert(format!("in-{}", i).as_bytes());
            second.insert(format!("in-{}", i).as_bytes());
        }
        let wrongly_reported = |filter: &BloomFilter| -> Vec<usize> {
            (0..2000)
                .filter(|i| filter.might_contain(format!("out-{}", i).as_bytes()))
                .collect()
        };

        assert_ne!(wrongly_reported(&first), wrongly_reported(&second));
    }

    #[test]
    fn empty_filter_contains_nothing() {
        let filter = BloomFilter::new(10, 0.01).unwrap();
        assert!(!filter.might_contain(b"anything"));
    }

    #[test]
    fn oversized_filters_are_rejected() {
        for expected in [usize::MAX, 9_000_000_000_000_000_000, 1_000_000_000_000] {
            let error = BloomFilter::new(expected, 0.01).unwrap_err();
            assert!(error.details.unwrap().contains("expectedBlobCount"), "{}", expected);
        }
        assert!(BloomFilter::required_bits(1_000_000_000, 0.01).is_ok());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(BloomFilter::new(0, 0.01).is_err());
        for probability in [0.0, 1.0, -0.1, 1.1, f64::NAN] {
            let error = BloomFilter::new(10, probability).unwrap_err();
            assert!(error.details.unwrap().contains("associatedProbability"));
        }
    }
}
