//! Self-side frame encryption.

use std::collections::HashMap;

use crate::{
    error::EncryptError,
    frame,
    media::MediaType,
    ratchet::{FrameKey, KeyRatchet},
};

/// Frame counters for one SSRC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionStats {
    /// Frames returned unmodified in passthrough mode
    pub passthrough_count: u64,
    /// Frames sealed successfully
    pub encrypt_success_count: u64,
    /// Frames rejected with an error
    pub encrypt_failure_count: u64,
    /// Plaintext bytes sealed
    pub plaintext_bytes: u64,
    /// Ciphertext bytes produced, trailer included
    pub ciphertext_bytes: u64,
}

/// Encrypts outgoing frames for the local participant.
///
/// Starts in passthrough mode with no ratchet. The truncated nonce is a
/// counter that restarts whenever a new ratchet is bound; its top byte selects
/// the key generation.
#[derive(Debug, Default)]
pub struct Encryptor {
    passthrough: bool,
    ratchet: Option<KeyRatchet>,
    current_key: Option<FrameKey>,
    next_nonce: u64,
    stats: HashMap<u32, EncryptionStats>,
}

impl Encryptor {
    /// Create an encryptor in passthrough mode.
    pub fn new() -> Self {
        Self { passthrough: true, ..Self::default() }
    }

    /// Enable or disable passthrough.
    pub fn set_passthrough_mode(&mut self, enabled: bool) {
        self.passthrough = enabled;
    }

    /// Returns true if frames currently pass through unmodified.
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Replace the key ratchet. `None` unbinds encryption keys entirely.
    pub fn set_key_ratchet(&mut self, ratchet: Option<KeyRatchet>) {
        self.ratchet = ratchet;
        self.current_key = None;
        self.next_nonce = 0;
    }

    /// Returns true if a key ratchet is bound.
    pub fn has_key_ratchet(&self) -> bool {
        self.ratchet.is_some()
    }

    /// Encrypt one frame for stream `ssrc`.
    ///
    /// # Errors
    ///
    /// - `MissingKeyRatchet` if passthrough is off and no ratchet is bound
    /// - `EncryptionFailure` if the nonce space of the ratchet is exhausted
    pub fn encrypt(
        &mut self,
        ssrc: u32,
        plaintext: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, EncryptError> {
        if self.passthrough {
            self.stats.entry(ssrc).or_default().passthrough_count += 1;
            return Ok(plaintext.to_vec());
        }

        match self.seal(plaintext, media_type) {
            Ok(frame) => {
                let stats = self.stats.entry(ssrc).or_default();
                stats.encrypt_success_count += 1;
                stats.plaintext_bytes += plaintext.len() as u64;
                stats.ciphertext_bytes += frame.len() as u64;
                Ok(frame)
            },
            Err(err) => {
                self.stats.entry(ssrc).or_default().encrypt_failure_count += 1;
                Err(err)
            },
        }
    }

    /// Counters for stream `ssrc`, if it has sent any frame.
    pub fn stats(&self, ssrc: u32) -> Option<EncryptionStats> {
        self.stats.get(&ssrc).copied()
    }

    fn seal(&mut self, plaintext: &[u8], media_type: MediaType) -> Result<Vec<u8>, EncryptError> {
        let Some(ratchet) = self.ratchet.as_mut() else {
            return Err(EncryptError::MissingKeyRatchet);
        };

        let Ok(nonce) = u32::try_from(self.next_nonce) else {
            return Err(EncryptError::EncryptionFailure);
        };
        let generation = frame::generation_of(nonce);

        let key = match self.current_key.take() {
            Some(key) if key.generation() == generation => key,
            _ => {
                let key = ratchet.get(generation).map_err(|_| EncryptError::EncryptionFailure)?;
                ratchet.erase_below(generation);
                key
            },
        };

        let sealed = frame::seal(plaintext, media_type, &key, nonce);
        self.current_key = Some(key);
        self.next_nonce += 1;
        Ok(sealed)
    }
}
