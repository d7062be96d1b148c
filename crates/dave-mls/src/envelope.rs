//! CBOR envelopes around TLS-encoded MLS messages.
//!
//! Signaling carries several MLS messages in one payload: a batch of
//! proposals from the external sender, or a commit plus an optional welcome.

use dave_core::MembershipError;
use serde::{Deserialize, Serialize};

/// Batch of proposals relayed by the external sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalsEnvelope {
    /// TLS-encoded `MlsMessage` proposals, in order
    pub messages: Vec<Vec<u8>>,
}

/// Commit produced from pending proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitWelcome {
    /// TLS-encoded commit `MlsMessage`
    pub commit: Vec<u8>,
    /// TLS-encoded welcome `MlsMessage`, present if members were added
    pub welcome: Option<Vec<u8>>,
}

/// Encode an envelope.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, MembershipError> {
    let mut data = Vec::new();
    ciborium::ser::into_writer(value, &mut data)
        .map_err(|e| MembershipError::Malformed(format!("CBOR encode failed: {e}")))?;
    Ok(data)
}

/// Decode an envelope.
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, MembershipError> {
    ciborium::de::from_reader(data)
        .map_err(|e| MembershipError::Malformed(format!("CBOR decode failed: {e}")))
}
