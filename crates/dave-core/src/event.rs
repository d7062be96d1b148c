//! Coordinator events and actions.

use crate::{
    opcode::SignalingOpcode,
    types::{Epoch, Identity, ProtocolVersion, TransitionId},
};

/// Signaling events the caller feeds into the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Protocol version negotiated for a new call.
    SelectProtocol {
        /// Negotiated version, `0` for unencrypted
        version: ProtocolVersion,
    },

    /// Stage a transition.
    PrepareTransition {
        /// Transition to stage
        transition_id: TransitionId,
        /// Version the transition activates
        version: ProtocolVersion,
    },

    /// Activate a staged transition.
    ExecuteTransition {
        /// Transition to activate
        transition_id: TransitionId,
    },

    /// A membership epoch begins.
    PrepareEpoch {
        /// Announced epoch
        epoch: Epoch,
        /// Version for the group
        version: ProtocolVersion,
    },

    /// Credential of the external proposal sender.
    ExternalSenderPackage {
        /// Serialized external sender
        package: Vec<u8>,
    },

    /// Membership proposals relayed by the external sender.
    Proposals {
        /// Serialized proposals
        proposals: Vec<u8>,
    },

    /// Winning commit for a transition.
    PrepareCommitTransition {
        /// Transition the commit belongs to
        transition_id: TransitionId,
        /// Serialized commit
        commit: Vec<u8>,
    },

    /// Welcome into the group for a transition.
    Welcome {
        /// Transition the welcome belongs to
        transition_id: TransitionId,
        /// Serialized welcome
        welcome: Vec<u8>,
    },

    /// A participant joined the call.
    AddPeer {
        /// Joining participant
        identity: Identity,
    },

    /// A participant left the call.
    RemovePeer {
        /// Leaving participant
        identity: Identity,
    },
}

/// Notifications the coordinator produces for the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Publish the local key package.
    SendKeyPackage(Vec<u8>),

    /// Local participant is ready to execute a transition.
    ReadyForTransition(TransitionId),

    /// Broadcast a commit, with a welcome if members were added.
    SendCommitWelcome(Vec<u8>),

    /// The commit or welcome for a transition could not be used.
    InvalidCommitWelcome(TransitionId),
}

impl SessionAction {
    /// Opcode the action is sent with.
    pub fn opcode(&self) -> SignalingOpcode {
        match self {
            Self::SendKeyPackage(_) => SignalingOpcode::KeyPackage,
            Self::ReadyForTransition(_) => SignalingOpcode::ReadyForTransition,
            Self::SendCommitWelcome(_) => SignalingOpcode::CommitWelcome,
            Self::InvalidCommitWelcome(_) => SignalingOpcode::InvalidCommitWelcome,
        }
    }
}
