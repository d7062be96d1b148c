//! Per-generation frame key ratchet
//!
//! A [`KeyRatchet`] is seeded from the secret the membership session exports
//! for one participant in one epoch. Each generation yields one 32-byte frame
//! key. Keys are derived forward along an HMAC chain and cached until erased,
//! so a receiver can still open late frames from the previous generation.
//!
//! # Security Properties
//!
//! - Forward Secrecy: chain keys are overwritten when advancing
//! - Key Uniqueness: each generation produces a unique frame key
//! - Determinism: same seed always produces the same key sequence

use std::collections::BTreeMap;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::RatchetError;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a frame key
const FRAME_LABEL: &[u8] = b"frame";

/// HKDF info used when seeding a ratchet from an exported secret
const SEED_LABEL: &[u8] = b"DAVE frame ratchet seed";

/// Maximum number of generations derived ahead of the chain in one lookup.
///
/// The generation is the top byte of the frame nonce and changes every 2^24
/// frames, so a legitimate sender is never more than a handful ahead.
pub const MAX_GENERATION_SKIP: u32 = 16;

/// A frame key derived from the ratchet.
#[derive(Clone)]
pub struct FrameKey {
    key: [u8; 32],
    generation: u32,
}

impl FrameKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Generation this key was derived for.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Debug for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameKey").field("generation", &self.generation).finish_non_exhaustive()
    }
}

impl Drop for FrameKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Source of frame keys for one sender in one epoch.
pub struct KeyRatchet {
    /// Chain key for `next_generation`
    chain_key: [u8; 32],
    /// Next generation the chain will derive
    next_generation: u32,
    /// Derived keys that have not been erased yet
    cache: BTreeMap<u32, [u8; 32]>,
}

impl KeyRatchet {
    /// Create a ratchet whose generation 0 chain key is `seed`.
    pub fn new(seed: [u8; 32]) -> Self {
        Self { chain_key: seed, next_generation: 0, cache: BTreeMap::new() }
    }

    /// Create a ratchet from an exported base secret of any length.
    pub fn from_secret(secret: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, secret);

        let mut seed = [0u8; 32];
        let Ok(()) = hkdf.expand(SEED_LABEL, &mut seed) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };

        let ratchet = Self::new(seed);
        seed.zeroize();
        ratchet
    }

    /// Frame key for `generation`.
    ///
    /// Derives forward as needed and caches every key it passes, so earlier
    /// generations stay available until [`erase_below`](Self::erase_below).
    ///
    /// # Errors
    ///
    /// - `GenerationErased` if the key was derived and later erased
    /// - `TooFarAhead` if more than [`MAX_GENERATION_SKIP`] steps are needed
    pub fn get(&mut self, generation: u32) -> Result<FrameKey, RatchetError> {
        if let Some(key) = self.cache.get(&generation) {
            return Ok(FrameKey { key: *key, generation });
        }

        if generation < self.next_generation {
            return Err(RatchetError::GenerationErased {
                current: self.next_generation,
                requested: generation,
            });
        }

        let steps = generation - self.next_generation;
        if steps >= MAX_GENERATION_SKIP {
            return Err(RatchetError::TooFarAhead {
                current: self.next_generation,
                requested: generation,
            });
        }

        while self.next_generation <= generation {
            let frame_key = self.derive(FRAME_LABEL);
            let next_chain = self.derive(CHAIN_LABEL);

            self.chain_key.zeroize();
            self.chain_key = next_chain;
            self.cache.insert(self.next_generation, frame_key);
            self.next_generation = self.next_generation.saturating_add(1);
        }

        self.cache
            .get(&generation)
            .map(|key| FrameKey { key: *key, generation })
            .ok_or(RatchetError::GenerationErased { current: self.next_generation, requested: generation })
    }

    /// Erase the cached key for one generation.
    pub fn erase(&mut self, generation: u32) {
        if let Some(mut key) = self.cache.remove(&generation) {
            key.zeroize();
        }
    }

    /// Erase every cached key older than `generation`.
    pub fn erase_below(&mut self, generation: u32) {
        let kept = self.cache.split_off(&generation);
        for key in self.cache.values_mut() {
            key.zeroize();
        }
        self.cache = kept;
    }

    /// Next generation the chain will derive.
    pub fn next_generation(&self) -> u32 {
        self.next_generation
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.chain_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        key.copy_from_slice(&result);
        key
    }
}

impl std::fmt::Debug for KeyRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRatchet")
            .field("next_generation", &self.next_generation)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Drop for KeyRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
        for key in self.cache.values_mut() {
            key.zeroize();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        seed
    }

    #[test]
    fn same_seed_same_keys() {
        let mut a = KeyRatchet::new(test_seed());
        let mut b = KeyRatchet::new(test_seed());

        for generation in 0..5 {
            assert_eq!(a.get(generation).unwrap().key(), b.get(generation).unwrap().key());
        }
    }

    #[test]
    fn generations_produce_distinct_keys() {
        let mut ratchet = KeyRatchet::new(test_seed());
        let k0 = ratchet.get(0).unwrap();
        let k1 = ratchet.get(1).unwrap();
        assert_ne!(k0.key(), k1.key());
        assert_eq!(k1.generation(), 1);
    }

    #[test]
    fn skipping_ahead_matches_sequential_derivation() {
        let mut sequential = KeyRatchet::new(test_seed());
        for generation in 0..4 {
            sequential.get(generation).unwrap();
        }
        let expected = *sequential.get(4).unwrap().key();

        let mut skipping = KeyRatchet::new(test_seed());
        assert_eq!(skipping.get(4).unwrap().key(), &expected);

        // passed-over generations stay cached
        assert!(skipping.get(2).is_ok());
    }

    #[test]
    fn erased_generation_is_gone() {
        let mut ratchet = KeyRatchet::new(test_seed());
        ratchet.get(3).unwrap();
        ratchet.erase_below(2);

        assert!(matches!(ratchet.get(0), Err(RatchetError::GenerationErased { .. })));
        assert!(ratchet.get(2).is_ok());

        ratchet.erase(3);
        assert!(matches!(ratchet.get(3), Err(RatchetError::GenerationErased { .. })));
    }

    #[test]
    fn too_far_ahead_rejected() {
        let mut ratchet = KeyRatchet::new(test_seed());
        let result = ratchet.get(MAX_GENERATION_SKIP);
        assert!(matches!(result, Err(RatchetError::TooFarAhead { .. })));
        assert!(ratchet.get(MAX_GENERATION_SKIP - 1).is_ok());
    }

    #[test]
    fn different_secrets_diverge() {
        let mut a = KeyRatchet::from_secret(b"alice exported secret");
        let mut b = KeyRatchet::from_secret(b"bob exported secret");
        assert_ne!(a.get(0).unwrap().key(), b.get(0).unwrap().key());
    }
}
