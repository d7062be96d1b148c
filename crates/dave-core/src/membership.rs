//! Membership session port.
//!
//! The cryptographic group engine behind the coordinator. It owns key
//! derivation and validates proposals, commits and welcomes; the coordinator
//! only decides when the resulting key material is bound to frame ciphers.

use dave_crypto::KeyRatchet;

use crate::{
    error::MembershipError,
    types::{GroupId, Identity, ProtocolVersion},
};

/// Result of submitting a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Commit merged; the group moved to a new epoch.
    Applied,
    /// Commit is stale or redundant and changed nothing.
    Ignored,
    /// Commit was rejected; local group state may be out of sync.
    Failed {
        /// Human readable rejection reason
        reason: String,
    },
}

impl CommitOutcome {
    /// Returns true if the commit was rejected.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if the commit should be ignored.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

/// Result of an accepted welcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeOutcome {
    /// Participants in the group that was joined
    pub members: Vec<Identity>,
}

/// Cryptographic group session consumed by the coordinator.
///
/// Exactly one session exists per call. It is only driven from the
/// coordinator, so implementations need no internal locking.
pub trait MembershipSession: Send + 'static {
    /// Start a fresh group for `self_identity` at `version`, discarding any
    /// previous state.
    fn initialize(
        &mut self,
        version: ProtocolVersion,
        group_id: GroupId,
        self_identity: &Identity,
    ) -> Result<(), MembershipError>;

    /// Discard all cryptographic state. Ratchets are unavailable until the
    /// next `initialize`.
    fn reset(&mut self);

    /// Protocol version of the current group, `0` when reset.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Frame key ratchet for `identity` at the current epoch.
    ///
    /// `None` if no group is established or the identity is not a member.
    fn key_ratchet(&self, identity: &Identity) -> Option<KeyRatchet>;

    /// Serialized key package for the local participant.
    fn key_package(&mut self) -> Result<Vec<u8>, MembershipError>;

    /// Register the external sender allowed to propose membership changes.
    fn set_external_sender(&mut self, package: &[u8]) -> Result<(), MembershipError>;

    /// Apply proposals from the external sender.
    ///
    /// Returns the commit/welcome payload to broadcast, or `None` if the
    /// proposals produced nothing to commit.
    fn process_proposals(
        &mut self,
        proposals: &[u8],
        known_identities: &[Identity],
    ) -> Result<Option<Vec<u8>>, MembershipError>;

    /// Join a group from a welcome. Every member must be in
    /// `known_identities`.
    fn process_welcome(
        &mut self,
        welcome: &[u8],
        known_identities: &[Identity],
    ) -> Result<WelcomeOutcome, MembershipError>;

    /// Apply a commit announced for a transition.
    fn process_commit(&mut self, commit: &[u8]) -> Result<CommitOutcome, MembershipError>;
}
