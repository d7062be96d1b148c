//! Environment abstraction for deterministic testing.
//!
//! Decouples coordination logic from system resources (time, randomness).
//! Production uses the system clock and OS entropy; tests use [`MockEnv`]
//! with a virtual clock and a seeded RNG.
//!
//! [`MockEnv`]: test_utils::MockEnv

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type used by this environment.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + std::fmt::Debug
        + std::ops::Sub<Output = Duration>
        + std::ops::Add<Duration, Output = Self::Instant>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

pub mod test_utils {
    //! Deterministic environment for tests.

    use std::{sync::Arc, time::Instant};

    use parking_lot::Mutex;
    use rand::{RngCore, SeedableRng, rngs::StdRng};

    use super::{Duration, Environment};

    /// Virtual clock and seeded RNG.
    ///
    /// Clones share the clock and the RNG, so advancing time in a test is
    /// visible to every component holding a clone.
    #[derive(Clone)]
    pub struct MockEnv {
        base: Instant,
        offset: Arc<Mutex<Duration>>,
        rng: Arc<Mutex<StdRng>>,
    }

    impl MockEnv {
        /// Create an environment whose RNG is seeded with `seed`.
        pub fn with_seed(seed: u64) -> Self {
            Self {
                base: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
                rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            }
        }

        /// Move the virtual clock forward.
        pub fn advance(&self, duration: Duration) {
            *self.offset.lock() += duration;
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::with_seed(0)
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Self::Instant {
            self.base + *self.offset.lock()
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().fill_bytes(buffer);
        }
    }

}
