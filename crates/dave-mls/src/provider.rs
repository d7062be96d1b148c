//! `OpenMLS` provider backed by the coordinator's Environment.
//!
//! Randomness `OpenMLS` draws through the provider comes from
//! [`Environment::random_bytes`], so it follows the environment's seed.

use dave_core::env::Environment;
use openmls_memory_storage::MemoryStorage;
use openmls_rust_crypto::RustCrypto;
use openmls_traits::{OpenMlsProvider, random::OpenMlsRand};

/// `OpenMLS` provider for one group or key package store.
///
/// Storage is in memory and lives exactly as long as the provider.
pub struct MlsProvider<E: Environment> {
    crypto: RustCrypto,
    rng: EnvironmentRng<E>,
    storage: MemoryStorage,
}

impl<E: Environment> MlsProvider<E> {
    /// Provider with empty storage drawing randomness from `env`.
    pub fn new(env: E) -> Self {
        Self {
            crypto: RustCrypto::default(),
            rng: EnvironmentRng(env),
            storage: MemoryStorage::default(),
        }
    }
}

impl<E: Environment> OpenMlsProvider for MlsProvider<E> {
    type CryptoProvider = RustCrypto;
    type RandProvider = EnvironmentRng<E>;
    type StorageProvider = MemoryStorage;

    fn crypto(&self) -> &RustCrypto {
        &self.crypto
    }

    fn rand(&self) -> &EnvironmentRng<E> {
        &self.rng
    }

    fn storage(&self) -> &MemoryStorage {
        &self.storage
    }
}

/// Randomness source for `OpenMLS` backed by [`Environment::random_bytes`].
pub struct EnvironmentRng<E: Environment>(E);

impl<E: Environment> EnvironmentRng<E> {
    fn array<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        self.0.random_bytes(&mut out);
        out
    }
}

impl<E: Environment> OpenMlsRand for EnvironmentRng<E> {
    type Error = std::convert::Infallible;

    fn random_array<const N: usize>(&self) -> Result<[u8; N], Self::Error> {
        Ok(self.array())
    }

    fn random_vec(&self, len: usize) -> Result<Vec<u8>, Self::Error> {
        let mut out = vec![0u8; len];
        self.0.random_bytes(&mut out);
        Ok(out)
    }
}

impl<E: Environment> rand::RngCore for EnvironmentRng<E> {
    fn next_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn next_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl<E: Environment> rand::CryptoRng for EnvironmentRng<E> {}

#[cfg(test)]
mod tests {
    use dave_core::env::test_utils::MockEnv;

    use super::*;

    #[test]
    fn seeded_environments_give_identical_randomness() {
        let a = MlsProvider::new(MockEnv::with_seed(3));
        let b = MlsProvider::new(MockEnv::with_seed(3));

        let ra: Result<[u8; 16], _> = a.rand().random_array();
        let rb: Result<[u8; 16], _> = b.rand().random_array();
        assert_eq!(ra, rb);
    }
}
