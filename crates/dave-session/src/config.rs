//! Session configuration.

use dave_core::{GroupId, Identity};
use dave_crypto::DecryptorConfig;

/// Configuration for a [`crate::DaveSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity of the local participant
    pub self_identity: Identity,
    /// Call the membership group belongs to
    pub group_id: GroupId,
    /// Commands buffered before submitters wait for the worker
    pub command_queue_depth: usize,
    /// Grace period and replay window for peer decryptors
    pub decryptor: DecryptorConfig,
}

impl SessionConfig {
    /// Default limits for `self_identity` in `group_id`.
    pub fn new(self_identity: impl Into<Identity>, group_id: GroupId) -> Self {
        Self { self_identity: self_identity.into(), group_id, ..Self::default() }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            self_identity: Identity::new(String::new()),
            group_id: 0,
            command_queue_depth: 64,
            decryptor: DecryptorConfig::default(),
        }
    }
}
