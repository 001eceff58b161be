//! Bloom filter for unique-visitor deduplication
//!
//! A fixed-capacity probabilistic set used to decide whether a client address
//! has been seen before. Once an item is added, `contains` always returns true
//! for it (no false negatives); items never added may report true with a
//! probability controlled by the construction parameters.
//!
//! Sizing follows the standard formulas: for `n` expected items and target
//! false-positive rate `p`, the bit array holds `m = ceil(-n*ln(p)/ln(2)^2)`
//! bits probed by `k = round(m/n * ln(2))` hash positions. Positions are
//! derived by double hashing two SipHash passes, so adding hash functions does
//! not add hashing cost.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Default capacity when the configuration does not specify one.
///
/// 100k distinct clients at a 1% false-positive target costs ~120 KiB of
/// bits and keeps unique-visitor counts accurate for a mid-sized service.
/// Under-provisioning silently under-counts visitors, so both knobs are
/// configurable.
pub const DEFAULT_EXPECTED_ITEMS: usize = 100_000;

/// Default false-positive rate target.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Seed mixed into the second hash pass for double hashing.
const STRIDE_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Fixed-size probabilistic membership set.
///
/// Mutation is serialized behind an exclusive lock; lookups take a shared
/// lock, so concurrent `contains` calls do not contend with each other.
pub struct BloomFilter {
    bits: RwLock<Vec<u64>>,
    num_bits: u64,
    num_hashes: u32,
    inserted: AtomicU64,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` distinct entries at the
    /// given false-positive rate target.
    ///
    /// Out-of-range inputs are clamped rather than rejected: a degenerate
    /// filter would silently corrupt unique-visitor accounting.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = if false_positive_rate.is_finite() {
            false_positive_rate.clamp(1e-9, 0.5)
        } else {
            DEFAULT_FALSE_POSITIVE_RATE
        };

        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            bits: RwLock::new(vec![0u64; num_bits.div_ceil(64) as usize]),
            num_bits,
            num_hashes,
            inserted: AtomicU64::new(0),
        }
    }

    /// Add an item to the set.
    ///
    /// The empty string is hashed like any other value.
    pub fn add(&self, item: &str) {
        self.check_and_add(item);
    }

    /// Atomically test membership and add the item, returning `true` if the
    /// item was not present before.
    ///
    /// The test and the bit mutation happen under one exclusive lock, so for
    /// any single item at most one concurrent caller observes `true`. This is
    /// what keeps the unique-visitor counter from double-counting a client
    /// that sends two first-time requests in parallel.
    pub fn check_and_add(&self, item: &str) -> bool {
        let (h1, h2) = self.hash_pair(item);
        let mut bits = self.bits.write().unwrap_or_else(PoisonError::into_inner);

        let mut newly_set = false;
        for j in 0..u64::from(self.num_hashes) {
            let pos = h1.wrapping_add(j.wrapping_mul(h2)) % self.num_bits;
            let word = (pos / 64) as usize;
            let mask = 1u64 << (pos % 64);
            if bits[word] & mask == 0 {
                bits[word] |= mask;
                newly_set = true;
            }
        }

        if newly_set {
            self.inserted.fetch_add(1, Ordering::Relaxed);
        }
        newly_set
    }

    /// Returns true iff every probed bit position for `item` is set.
    pub fn contains(&self, item: &str) -> bool {
        let (h1, h2) = self.hash_pair(item);
        let bits = self.bits.read().unwrap_or_else(PoisonError::into_inner);

        (0..u64::from(self.num_hashes)).all(|j| {
            let pos = h1.wrapping_add(j.wrapping_mul(h2)) % self.num_bits;
            bits[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0
        })
    }

    /// Number of distinct-looking insertions so far, for fill-ratio
    /// monitoring. Items whose bits were already all set do not count.
    pub fn len(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the bit array.
    pub fn bit_count(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash positions probed per item.
    pub fn hash_count(&self) -> u32 {
        self.num_hashes
    }

    fn hash_pair(&self, item: &str) -> (u64, u64) {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        let h1 = hasher.finish();

        let mut hasher = DefaultHasher::new();
        STRIDE_SEED.hash(&mut hasher);
        item.hash(&mut hasher);
        // An odd stride is coprime with any power-of-two span and never
        // collapses the probe sequence to a single position.
        let h2 = hasher.finish() | 1;

        (h1, h2)
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXPECTED_ITEMS, DEFAULT_FALSE_POSITIVE_RATE)
    }
}
