//! Charikar SimHash over configurable bit widths.
//!
//! A weighted feature bag is reduced to a W-bit fingerprint; two pages
//! with similar bags land at a small Hamming distance. W is fixed per
//! deployment (64 to 512 bits) and the packed byte order is pinned by the
//! downstream consumers, so it must not change.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use blake2::{Blake2b512, Digest};
use rustc_hash::FxHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use thiserror::Error;

/// Largest supported fingerprint width in bits.
pub const MAX_BIT_LENGTH: usize = 512;

#[derive(Debug, Error)]
pub enum SimhashError {
    #[error("unsupported simhash width {0}: must be a positive multiple of 64 up to 512")]
    UnsupportedWidth(usize),
}

/// Token hashing strategy feeding the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenHasher {
    /// Per-word FxHash seeded with the word index. Fast, non-cryptographic.
    Fast,
    /// BLAKE2b-512 digest truncated to the fingerprint width.
    Blake2,
}

/// A W-bit fingerprint. Bit `i` lives in word `i / 64` at position `i % 64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simhash {
    words: Vec<u64>,
    bit_length: usize,
}

impl Simhash {
    /// The all-zero fingerprint, also the value of an empty feature bag.
    pub fn zero(bit_length: usize) -> Self {
        Self {
            words: vec![0; bit_length / 64],
            bit_length,
        }
    }

    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    pub fn bit(&self, i: usize) -> bool {
        (self.words[i / 64] >> (i % 64)) & 1 == 1
    }

    /// Pack to `W/8` bytes: big-endian rendering of the integer with the
    /// byte order then reversed, which collapses to plain little-endian.
    pub fn pack(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.bit_length / 8);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Base64 of the packed bytes; the form persisted in the store.
    pub fn encode(&self) -> String {
        BASE64.encode(self.pack())
    }

    /// Hamming distance to another fingerprint of the same width.
    pub fn hamming_distance(&self, other: &Self) -> Option<u32> {
        if self.bit_length != other.bit_length {
            return None;
        }
        Some(
            self.words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| (a ^ b).count_ones())
                .sum(),
        )
    }
}

/// Fingerprint calculator for a fixed width and token hasher.
#[derive(Debug, Clone)]
pub struct SimhashEngine {
    bit_length: usize,
    hasher: TokenHasher,
}

impl SimhashEngine {
    pub fn new(bit_length: usize, hasher: TokenHasher) -> Result<Self, SimhashError> {
        if bit_length == 0 || bit_length > MAX_BIT_LENGTH || bit_length % 64 != 0 {
            return Err(SimhashError::UnsupportedWidth(bit_length));
        }
        Ok(Self { bit_length, hasher })
    }

    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    /// Compute the fingerprint of a weighted feature bag.
    ///
    /// Each token hash contributes `+weight` to accumulator slot `i` where
    /// its bit `i` is set and `-weight` where it is clear; output bit `i`
    /// is set iff the slot ends positive.
    pub fn calculate(&self, features: &HashMap<String, u32>) -> Simhash {
        let mut acc = vec![0i64; self.bit_length];
        for (token, weight) in features {
            let hash = self.hash_token(token.as_bytes());
            for (i, slot) in acc.iter_mut().enumerate() {
                if (hash[i / 64] >> (i % 64)) & 1 == 1 {
                    *slot += i64::from(*weight);
                } else {
                    *slot -= i64::from(*weight);
                }
            }
        }

        let mut result = Simhash::zero(self.bit_length);
        for (i, slot) in acc.iter().enumerate() {
            if *slot > 0 {
                result.words[i / 64] |= 1 << (i % 64);
            }
        }
        result
    }

    fn hash_token(&self, token: &[u8]) -> Vec<u64> {
        let words = self.bit_length / 64;
        match self.hasher {
            TokenHasher::Fast => (0..words)
                .map(|seed| {
                    let mut hasher = FxHasher::default();
                    hasher.write_u64(seed as u64);
                    hasher.write(token);
                    hasher.finish()
                })
                .collect(),
            TokenHasher::Blake2 => {
                let digest = Blake2b512::digest(token);
                (0..words)
                    .map(|i| {
                        let mut word = [0u8; 8];
                        word.copy_from_slice(&digest[i * 8..i * 8 + 8]);
                        u64::from_le_bytes(word)
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_width_validation() {
        for width in [64, 128, 256, 512] {
            assert!(SimhashEngine::new(width, TokenHasher::Fast).is_ok());
        }
        for width in [0, 32, 100, 576, 1024] {
            assert!(SimhashEngine::new(width, TokenHasher::Fast).is_err());
        }
    }

    #[test]
    fn test_packed_length_matches_width() {
        let features = bag(&[("one", 1), ("two", 2), ("three", 3)]);
        for width in [64, 128, 256, 512] {
            let engine = SimhashEngine::new(width, TokenHasher::Fast).unwrap();
            assert_eq!(engine.calculate(&features).pack().len(), width / 8);

            let engine = SimhashEngine::new(width, TokenHasher::Blake2).unwrap();
            assert_eq!(engine.calculate(&features).pack().len(), width / 8);
        }
    }

    #[test]
    fn test_empty_bag_is_zero() {
        let engine = SimhashEngine::new(128, TokenHasher::Fast).unwrap();
        let hash = engine.calculate(&HashMap::new());
        assert_eq!(hash, Simhash::zero(128));
        assert!(hash.pack().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_deterministic_for_fixed_hasher() {
        let features = bag(&[("abc", 2), ("test", 1), ("123", 1)]);
        for hasher in [TokenHasher::Fast, TokenHasher::Blake2] {
            let engine = SimhashEngine::new(256, hasher).unwrap();
            assert_eq!(engine.calculate(&features), engine.calculate(&features));
        }
    }

    #[test]
    fn test_hashers_disagree_on_bits() {
        let features = bag(&[("abc", 2), ("test", 1), ("123", 1)]);
        let fast = SimhashEngine::new(256, TokenHasher::Fast).unwrap();
        let blake = SimhashEngine::new(256, TokenHasher::Blake2).unwrap();
        assert_ne!(fast.calculate(&features), blake.calculate(&features));
    }

    #[test]
    fn test_similar_bags_are_close() {
        let engine = SimhashEngine::new(128, TokenHasher::Blake2).unwrap();
        let base = bag(&[("the", 5), ("quick", 2), ("brown", 2), ("fox", 2), ("jumps", 1)]);
        let mut tweaked = base.clone();
        tweaked.insert("lazy".to_string(), 1);

        let unrelated = bag(&[("completely", 3), ("different", 4), ("words", 2), ("here", 1)]);

        let h_base = engine.calculate(&base);
        let near = h_base.hamming_distance(&engine.calculate(&tweaked)).unwrap();
        let far = h_base.hamming_distance(&engine.calculate(&unrelated)).unwrap();
        assert!(near < far, "near={} far={}", near, far);
    }

    #[test]
    fn test_hamming_distance_width_mismatch() {
        let a = Simhash::zero(64);
        let b = Simhash::zero(128);
        assert!(a.hamming_distance(&b).is_none());
        assert_eq!(a.hamming_distance(&Simhash::zero(64)), Some(0));
    }

    #[test]
    fn test_base64_round_trip() {
        let engine = SimhashEngine::new(256, TokenHasher::Blake2).unwrap();
        let hash = engine.calculate(&bag(&[("abc", 1), ("def", 2)]));
        let decoded = BASE64.decode(hash.encode()).unwrap();
        assert_eq!(decoded, hash.pack());
    }

    #[test]
    fn test_single_token_hash_matches_token_bits() {
        // With one token of weight 1 every accumulator slot is +1 or -1,
        // so the fingerprint equals the token hash itself.
        let engine = SimhashEngine::new(64, TokenHasher::Fast).unwrap();
        let hash = engine.calculate(&bag(&[("solo", 1)]));
        let token_bits = engine.hash_token(b"solo");
        assert_eq!(hash.words, token_bits);
    }
}
