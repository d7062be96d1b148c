//! Signaling opcodes for the encryption control messages.

/// Voice gateway opcode of an encryption control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignalingOpcode {
    /// Server announces an upcoming transition
    PrepareTransition = 21,
    /// Server tells everyone to switch to a prepared transition
    ExecuteTransition = 22,
    /// Client is ready to execute a transition
    ReadyForTransition = 23,
    /// Server announces a new membership epoch
    PrepareEpoch = 24,
    /// Server delivers the external sender credential
    ExternalSenderPackage = 25,
    /// Client publishes its key package
    KeyPackage = 26,
    /// Server relays membership proposals
    Proposals = 27,
    /// Client submits a commit and optional welcome
    CommitWelcome = 28,
    /// Server announces the winning commit for a transition
    AnnounceCommitTransition = 29,
    /// Server delivers a welcome for a transition
    Welcome = 30,
    /// Client reports an unusable commit or welcome
    InvalidCommitWelcome = 31,
}

impl SignalingOpcode {
    /// Raw opcode byte.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SignalingOpcode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            21 => Self::PrepareTransition,
            22 => Self::ExecuteTransition,
            23 => Self::ReadyForTransition,
            24 => Self::PrepareEpoch,
            25 => Self::ExternalSenderPackage,
            26 => Self::KeyPackage,
            27 => Self::Proposals,
            28 => Self::CommitWelcome,
            29 => Self::AnnounceCommitTransition,
            30 => Self::Welcome,
            31 => Self::InvalidCommitWelcome,
            other => return Err(other),
        })
    }
}
