//! Frame cipher ports.
//!
//! One encryptor exists for the local participant and one decryptor per
//! roster peer. The coordinator only rebinds them; the media path calls
//! `encrypt`/`decrypt` through [`crate::FrameRouter`].

use dave_crypto::{
    DecryptError, DecryptionStats, Decryptor, DecryptorConfig, EncryptError, EncryptionStats,
    Encryptor, KeyRatchet, MediaType,
};

use crate::env::Environment;

/// Encrypt side of a frame cipher.
pub trait FrameEncryptor: Send + 'static {
    /// Enable or disable passthrough.
    fn set_passthrough_mode(&mut self, enabled: bool);

    /// Replace the key ratchet.
    fn set_key_ratchet(&mut self, ratchet: Option<KeyRatchet>);

    /// Encrypt one frame of stream `ssrc`.
    fn encrypt(
        &mut self,
        ssrc: u32,
        plaintext: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, EncryptError>;

    /// Returns true if frames pass through unmodified.
    fn is_passthrough(&self) -> bool;

    /// Counters for stream `ssrc`, if the cipher keeps any.
    fn stats(&self, _ssrc: u32) -> Option<EncryptionStats> {
        None
    }
}

/// Decrypt side of a frame cipher.
pub trait FrameDecryptor: Send + 'static {
    /// Switch to a new ratchet, keeping the previous one briefly for frames
    /// already in flight.
    fn transition_to_key_ratchet(&mut self, ratchet: Option<KeyRatchet>);

    /// Enable passthrough, or disable it after the transition grace period.
    fn transition_to_passthrough_mode(&mut self, enabled: bool);

    /// Decrypt one frame.
    fn decrypt(
        &mut self,
        ciphertext: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, DecryptError>;

    /// Frame counters, if the cipher keeps any.
    fn stats(&self) -> Option<DecryptionStats> {
        None
    }
}

/// Builds the ciphers for a call.
pub trait CipherFactory: Send + Sync + 'static {
    /// Encryptor type for the local participant
    type Encryptor: FrameEncryptor;
    /// Decryptor type for roster peers
    type Decryptor: FrameDecryptor;

    /// New encryptor. Must start in passthrough.
    fn encryptor(&self) -> Self::Encryptor;

    /// New decryptor with no binding.
    fn decryptor(&self) -> Self::Decryptor;
}

impl FrameEncryptor for Encryptor {
    fn set_passthrough_mode(&mut self, enabled: bool) {
        Encryptor::set_passthrough_mode(self, enabled);
    }

    fn set_key_ratchet(&mut self, ratchet: Option<KeyRatchet>) {
        Encryptor::set_key_ratchet(self, ratchet);
    }

    fn encrypt(
        &mut self,
        ssrc: u32,
        plaintext: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, EncryptError> {
        Encryptor::encrypt(self, ssrc, plaintext, media_type)
    }

    fn is_passthrough(&self) -> bool {
        Encryptor::is_passthrough(self)
    }

    fn stats(&self, ssrc: u32) -> Option<EncryptionStats> {
        Encryptor::stats(self, ssrc)
    }
}

/// [`Decryptor`] reading time from an [`Environment`].
pub struct ClockedDecryptor<E: Environment> {
    env: E,
    inner: Decryptor<E::Instant>,
}

impl<E: Environment> ClockedDecryptor<E> {
    /// Wrap a fresh decryptor.
    pub fn new(env: E, config: DecryptorConfig) -> Self {
        Self { env, inner: Decryptor::new(config) }
    }

    /// Underlying decryptor.
    pub fn inner(&self) -> &Decryptor<E::Instant> {
        &self.inner
    }
}

impl<E: Environment> FrameDecryptor for ClockedDecryptor<E> {
    fn transition_to_key_ratchet(&mut self, ratchet: Option<KeyRatchet>) {
        let now = self.env.now();
        self.inner.transition_to_key_ratchet(ratchet, now);
    }

    fn transition_to_passthrough_mode(&mut self, enabled: bool) {
        let now = self.env.now();
        self.inner.transition_to_passthrough_mode(enabled, now);
    }

    fn decrypt(
        &mut self,
        ciphertext: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, DecryptError> {
        let now = self.env.now();
        self.inner.decrypt(ciphertext, media_type, now)
    }

    fn stats(&self) -> Option<DecryptionStats> {
        Some(self.inner.stats())
    }
}

/// Ciphers backed by `dave-crypto`.
#[derive(Clone)]
pub struct DaveCiphers<E: Environment> {
    env: E,
    config: DecryptorConfig,
}

impl<E: Environment> DaveCiphers<E> {
    /// Factory producing decryptors with `config`.
    pub fn new(env: E, config: DecryptorConfig) -> Self {
        Self { env, config }
    }
}

impl<E: Environment> CipherFactory for DaveCiphers<E> {
    type Encryptor = Encryptor;
    type Decryptor = ClockedDecryptor<E>;

    fn encryptor(&self) -> Encryptor {
        Encryptor::new()
    }

    fn decryptor(&self) -> ClockedDecryptor<E> {
        ClockedDecryptor::new(self.env.clone(), self.config)
    }
}
