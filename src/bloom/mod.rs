//! Fixed-size bloom filter keyed by a Kirsch–Mitzenmacher double-hash scheme.
//!
//! `Contains` never returns a false negative: any key that was `insert`ed is
//! always reported present. False positives are bounded by the configured
//! false-positive probability at construction time.
//!
//! Marshal format: `u64_le(m) || u64_le(k) || bit_words` — `m` is the bit
//! count, `k` the number of hash probes, `bit_words` the packed bitset as
//! `u64` words (little-endian), `ceil(m / 64)` of them.

#[cfg(test)]
mod tests;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use thiserror::Error;

/// Errors produced while building or reading a [`BloomFilter`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BloomError {
    /// The marshaled buffer was too short to contain its own header.
    #[error("bloom filter buffer truncated")]
    Truncated,

    /// The bit-vector length did not match the declared bit count.
    #[error("bloom filter bit vector length mismatch: expected {expected} words, got {actual}")]
    LengthMismatch {
        /// Words implied by the declared bit count.
        expected: usize,
        /// Words actually present in the buffer.
        actual: usize,
    },
}

/// A bloom filter sized at construction time for an expected key count and
/// target false-positive probability.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Number of bits in the filter (`m`), always a power of two.
    num_bits: u64,
    /// Number of hash probes per operation (`k`), clamped to `[1, 16]`.
    num_hashes: u64,
    /// Packed bitset, `ceil(num_bits / 64)` words.
    bits: Vec<u64>,
}

impl BloomFilter {
    /// Build a filter sized for `expected_entries` keys at `false_positive_rate`.
    ///
    /// `m` is chosen as the smallest power-of-two ≥
    /// `-n * ln(fpp) / (ln 2)^2`; `k` is `round(m/n * ln 2)` clamped to
    /// `[1, 16]`. An `expected_entries` of zero still yields a minimal,
    /// valid (always-empty) filter.
    pub fn new(expected_entries: usize, false_positive_rate: f64) -> Self {
        let n = expected_entries.max(1) as f64;
        let fpp = false_positive_rate.clamp(1e-6, 0.5);

        let raw_m = (-n * fpp.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil();
        let num_bits = (raw_m.max(64.0) as u64).next_power_of_two();

        let raw_k = ((num_bits as f64 / n) * std::f64::consts::LN_2).round() as i64;
        let num_hashes = raw_k.clamp(1, 16) as u64;

        let word_count = num_bits.div_ceil(64) as usize;

        Self {
            num_bits,
            num_hashes,
            bits: vec![0u64; word_count],
        }
    }

    /// Build a filter sized directly from a bits-per-key budget rather than
    /// a target false-positive probability — `SSTable` construction uses
    /// this with `DefaultBloomFilterBits` (10 bits/key) per the on-disk
    /// format's sizing rule.
    ///
    /// `m` is the smallest power-of-two ≥ `expected_entries * bits_per_key`;
    /// `k` is `round(bits_per_key * ln 2)` clamped to `[1, 16]`.
    pub fn new_with_bits_per_key(expected_entries: usize, bits_per_key: u32) -> Self {
        let n = expected_entries.max(1) as u64;
        let raw_m = n.saturating_mul(bits_per_key as u64).max(64);
        let num_bits = raw_m.next_power_of_two();

        let raw_k = (bits_per_key as f64 * std::f64::consts::LN_2).round() as i64;
        let num_hashes = raw_k.clamp(1, 16) as u64;

        let word_count = num_bits.div_ceil(64) as usize;

        Self {
            num_bits,
            num_hashes,
            bits: vec![0u64; word_count],
        }
    }

    /// Number of bits backing this filter.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash probes per `insert`/`contains` call.
    pub fn num_hashes(&self) -> u64 {
        self.num_hashes
    }

    /// Insert `key`, setting its `k` bits.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::double_hash(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            self.set_bit(bit);
        }
    }

    /// Returns `true` only if every one of `key`'s `k` bits is set.
    ///
    /// Zero false negatives: if `insert(key)` was ever called, this always
    /// returns `true` for that key.
    pub fn contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::double_hash(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_index(h1, h2, i);
            self.get_bit(bit)
        })
    }

    /// Two independent 64-bit digests of `key`, used as `h1`/`h2` in the
    /// Kirsch–Mitzenmacher double-hashing scheme `h_i = h1 + i*h2 mod m`.
    fn double_hash(key: &[u8]) -> (u64, u64) {
        let mut h1_hasher = DefaultHasher::new();
        0u64.hash(&mut h1_hasher);
        key.hash(&mut h1_hasher);
        let h1 = h1_hasher.finish();

        let mut h2_hasher = DefaultHasher::new();
        1u64.hash(&mut h2_hasher);
        key.hash(&mut h2_hasher);
        // Odd output guarantees h2 is coprime with any power-of-two `m`,
        // so every probe i in 0..k lands on a distinct slot cycle.
        let h2 = h2_hasher.finish() | 1;

        (h1, h2)
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u64) -> u64 {
        h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits
    }

    fn set_bit(&mut self, bit: u64) {
        let word = (bit / 64) as usize;
        let offset = bit % 64;
        self.bits[word] |= 1u64 << offset;
    }

    fn get_bit(&self, bit: u64) -> bool {
        let word = (bit / 64) as usize;
        let offset = bit % 64;
        (self.bits[word] >> offset) & 1 == 1
    }

    /// Marshal to `u64_le(m) || u64_le(k) || bit_words`.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.bits.len() * 8);
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        for word in &self.bits {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Byte length that [`Self::marshal`] would produce.
    pub fn marshaled_len(&self) -> usize {
        16 + self.bits.len() * 8
    }

    /// Parse a filter from its marshaled form.
    pub fn unmarshal(buf: &[u8]) -> Result<Self, BloomError> {
        if buf.len() < 16 {
            return Err(BloomError::Truncated);
        }
        // `buf.len() >= 16` was just checked, so the two header ranges
        // below are in bounds and the `try_into` conversions cannot fail.
        let num_bits = match buf[0..8].try_into() {
            Ok(bytes) => u64::from_le_bytes(bytes),
            Err(_) => return Err(BloomError::Truncated),
        };
        let num_hashes = match buf[8..16].try_into() {
            Ok(bytes) => u64::from_le_bytes(bytes),
            Err(_) => return Err(BloomError::Truncated),
        };

        let expected_words = num_bits.div_ceil(64) as usize;
        let rest = &buf[16..];
        if rest.len() < expected_words * 8 {
            return Err(BloomError::LengthMismatch {
                expected: expected_words,
                actual: rest.len() / 8,
            });
        }

        let mut bits = Vec::with_capacity(expected_words);
        for chunk in rest[..expected_words * 8].chunks_exact(8) {
            let word = match chunk.try_into() {
                Ok(bytes) => u64::from_le_bytes(bytes),
                Err(_) => return Err(BloomError::Truncated),
            };
            bits.push(word);
        }

        Ok(Self {
            num_bits,
            num_hashes,
            bits,
        })
    }
}
