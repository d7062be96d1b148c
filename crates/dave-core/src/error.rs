//! Error types for membership and coordination.
//!
//! Membership failures are absorbed by the coordinator and turned into
//! resynchronization. Only bootstrapping can fail back to the caller.

use thiserror::Error;

use crate::types::{Identity, ProtocolVersion};

/// Errors reported by a [`crate::MembershipSession`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    /// Operation requires an initialized session.
    #[error("membership session not initialized")]
    NotInitialized,

    /// Version cannot be used to initialize a group.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(ProtocolVersion),

    /// Message bytes could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Message names a participant that is not part of the call.
    #[error("unknown identity {0}")]
    UnknownIdentity(Identity),

    /// Membership message was rejected by the group.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Key or credential operation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Protocol storage failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl MembershipError {
    /// Returns true if the session can no longer be used without a fresh
    /// `initialize`.
    ///
    /// Storage failures leave the group state in an unknown condition. Every
    /// other error is specific to the message that caused it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Errors returned by [`crate::TransitionCoordinator`] entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The membership group could not be created for a new epoch.
    #[error("failed to bootstrap group at version {version}: {source}")]
    Bootstrap {
        /// Requested protocol version
        version: ProtocolVersion,
        /// Underlying membership failure
        source: MembershipError,
    },

    /// The key package for the local participant could not be exported.
    #[error("key package unavailable: {0}")]
    KeyPackage(MembershipError),
}
