//! Identifiers shared across the coordinator.

use std::fmt;

/// Protocol generation negotiated for the call. `0` means encryption is off.
pub type ProtocolVersion = u16;

/// Identifier of one prepare/execute transition.
pub type TransitionId = u16;

/// Group identifier handed to the membership session.
pub type GroupId = u64;

/// Transition applied synchronously at prepare time, never queued.
pub const INIT_TRANSITION_ID: TransitionId = 0;

/// Protocol version meaning "media flows unencrypted".
pub const DISABLED_PROTOCOL_VERSION: ProtocolVersion = 0;

/// Highest protocol version this implementation speaks.
pub const MAX_SUPPORTED_PROTOCOL_VERSION: ProtocolVersion = 1;

/// Membership group generation as announced by signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The group was just formed and its first key package must be published.
    pub const MLS_NEW_GROUP: Self = Self(1);
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque participant handle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wrap a participant handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Handle as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Handle as bytes, used as the membership credential.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}
