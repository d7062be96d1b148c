//! DAVE Frame Cryptography
//!
//! Cryptographic building blocks for per-frame media encryption. Pure state
//! with deterministic outputs: time is passed in by the caller, nonces are
//! counters, so every operation can be replayed in tests.
//!
//! # Key Lifecycle
//!
//! The membership session exports one base secret per participant and epoch.
//! That secret seeds a [`KeyRatchet`], which hands out one frame key per
//! generation. The generation is the top byte of the 32-bit truncated nonce
//! carried in every encrypted frame, so the sender moves to a fresh key every
//! 2^24 frames without any signaling.
//!
//! ```text
//! Membership export (per identity, per epoch)
//!        │
//!        ▼
//! HKDF → Ratchet seed
//!        │
//!        ▼
//! HMAC chain → Frame key (per generation)
//!        │
//!        ▼
//! XChaCha20-Poly1305 → ciphertext || tag || nonce || trailer
//! ```
//!
//! # Components
//!
//! - [`Encryptor`]: self-side frame encryption with passthrough toggle
//! - [`Decryptor`]: per-peer frame decryption that tolerates in-flight frames
//!   from the previous key during a transition
//! - [`KeyRatchet`]: per-generation frame key derivation
//! - [`EncryptError`], [`DecryptError`]: closed result-code taxonomy with an
//!   `Unknown` variant for codes this crate does not know yet

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod decryptor;
mod encryptor;
mod error;
pub mod frame;
mod media;
mod ratchet;

pub use decryptor::{DecryptionStats, Decryptor, DecryptorConfig};
pub use encryptor::{EncryptionStats, Encryptor};
pub use error::{DecryptError, EncryptError, RatchetError};
pub use media::MediaType;
pub use ratchet::{FrameKey, KeyRatchet, MAX_GENERATION_SKIP};
