//! Production Environment using the system clock and OS entropy.

use dave_core::env::Environment;

/// Environment backed by `std::time::Instant` and getrandom.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Key material cannot be
/// generated safely without it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        SystemEnv.random_bytes(&mut a);
        SystemEnv.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn clock_is_monotonic() {
        let start = SystemEnv.now();
        assert!(SystemEnv.now() >= start);
    }
}
