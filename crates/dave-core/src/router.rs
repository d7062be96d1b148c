//! Frame routing between the media pipeline and the cipher bindings.
//!
//! The router is shared by `Arc` between the coordinator and the media path.
//! The coordinator rebinds ciphers while holding the locks; `encrypt` and
//! `decrypt` take the same locks, so a frame sees a binding either before or
//! after a rebind, never halfway through.

use std::collections::HashMap;

use dave_crypto::{DecryptError, DecryptionStats, EncryptError, EncryptionStats, MediaType};
use parking_lot::{Mutex, RwLock};

use crate::{
    cipher::{CipherFactory, FrameDecryptor, FrameEncryptor},
    types::Identity,
};

/// Self encryptor plus one decryptor per roster peer.
pub struct FrameRouter<F: CipherFactory> {
    factory: F,
    encryptor: Mutex<F::Encryptor>,
    decryptors: RwLock<HashMap<Identity, Mutex<F::Decryptor>>>,
}

impl<F: CipherFactory> FrameRouter<F> {
    /// Router with a passthrough encryptor and an empty roster.
    pub fn new(factory: F) -> Self {
        let encryptor = Mutex::new(factory.encryptor());
        Self { factory, encryptor, decryptors: RwLock::new(HashMap::new()) }
    }

    /// Encrypt a frame with the self binding.
    pub fn encrypt(
        &self,
        ssrc: u32,
        data: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, EncryptError> {
        self.encryptor.lock().encrypt(ssrc, data, media_type)
    }

    /// Decrypt a frame from `identity`.
    ///
    /// `None` if the identity is not in the roster.
    pub fn decrypt(
        &self,
        identity: &Identity,
        data: &[u8],
        media_type: MediaType,
    ) -> Option<Result<Vec<u8>, DecryptError>> {
        let decryptors = self.decryptors.read();
        let decryptor = decryptors.get(identity)?;
        let result = decryptor.lock().decrypt(data, media_type);
        Some(result)
    }

    /// Encryption counters for stream `ssrc`.
    pub fn encryption_stats(&self, ssrc: u32) -> Option<EncryptionStats> {
        self.encryptor.lock().stats(ssrc)
    }

    /// Decryption counters for `identity`. `None` if the identity is not in
    /// the roster or its decryptor keeps no counters.
    pub fn decryption_stats(&self, identity: &Identity) -> Option<DecryptionStats> {
        self.decryptors.read().get(identity)?.lock().stats()
    }

    /// Returns true if the self encryptor is in passthrough.
    pub fn is_encryptor_passthrough(&self) -> bool {
        self.encryptor.lock().is_passthrough()
    }

    /// Returns true if `identity` has a decryptor.
    pub fn contains_peer(&self, identity: &Identity) -> bool {
        self.decryptors.read().contains_key(identity)
    }

    /// Roster identities, in no particular order.
    pub fn peers(&self) -> Vec<Identity> {
        self.decryptors.read().keys().cloned().collect()
    }

    pub(crate) fn with_encryptor<R>(&self, f: impl FnOnce(&mut F::Encryptor) -> R) -> R {
        f(&mut self.encryptor.lock())
    }

    /// Rebind every peer and the self encryptor while holding both locks, so
    /// no frame observes one side switched and the other not.
    ///
    /// Lock order is decryptors then encryptor. No other path holds both.
    pub(crate) fn rebind_all(
        &self,
        mut peer: impl FnMut(&Identity, &mut F::Decryptor),
        own: impl FnOnce(&mut F::Encryptor),
    ) {
        let mut decryptors = self.decryptors.write();
        let mut encryptor = self.encryptor.lock();
        for (identity, decryptor) in decryptors.iter_mut() {
            peer(identity, decryptor.get_mut());
        }
        own(&mut encryptor);
    }

    /// Install a fresh decryptor for `identity`, replacing any existing one,
    /// and configure it before it becomes visible to the media path.
    pub(crate) fn insert_peer(
        &self,
        identity: Identity,
        configure: impl FnOnce(&mut F::Decryptor),
    ) {
        let mut decryptor = self.factory.decryptor();
        configure(&mut decryptor);
        self.decryptors.write().insert(identity, Mutex::new(decryptor));
    }

    pub(crate) fn remove_peer(&self, identity: &Identity) -> bool {
        self.decryptors.write().remove(identity).is_some()
    }

    /// Apply `f` to every roster decryptor under one write lock.
    pub(crate) fn for_each_peer(&self, mut f: impl FnMut(&Identity, &mut F::Decryptor)) {
        let mut decryptors = self.decryptors.write();
        for (identity, decryptor) in decryptors.iter_mut() {
            f(identity, decryptor.get_mut());
        }
    }
}
