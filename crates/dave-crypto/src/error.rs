//! Error types for frame cryptography.
//!
//! Encryptor and decryptor failures mirror a C-style result code table: code
//! 0 is success, known codes map to named variants, and anything else is kept
//! as `Unknown { code }` so a newer cipher engine never breaks older callers.

use thiserror::Error;

/// Errors from [`crate::Encryptor::encrypt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncryptError {
    /// The frame could not be sealed (nonce space exhausted, key derivation
    /// failed).
    #[error("encryption failure")]
    EncryptionFailure,

    /// Encryption is enabled but no key ratchet is bound.
    #[error("missing key ratchet")]
    MissingKeyRatchet,

    /// Result code not known to this version.
    #[error("unknown encryptor result code {code}")]
    Unknown {
        /// Raw result code
        code: u32,
    },
}

impl EncryptError {
    /// Map a raw result code. `None` for the success code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Self::EncryptionFailure),
            2 => Some(Self::MissingKeyRatchet),
            code => Some(Self::Unknown { code }),
        }
    }

    /// Raw result code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::EncryptionFailure => 1,
            Self::MissingKeyRatchet => 2,
            Self::Unknown { code } => *code,
        }
    }
}

/// Errors from [`crate::Decryptor::decrypt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// Authentication failed under every available key.
    #[error("decryption failure")]
    DecryptionFailure,

    /// A cryptor exists but has no key ratchet bound.
    #[error("missing key ratchet")]
    MissingKeyRatchet,

    /// Nonce was replayed, too old, or the frame trailer is malformed.
    #[error("invalid nonce")]
    InvalidNonce,

    /// No cryptor is available for this sender.
    #[error("missing cryptor")]
    MissingCryptor,

    /// Result code not known to this version.
    #[error("unknown decryptor result code {code}")]
    Unknown {
        /// Raw result code
        code: u32,
    },
}

impl DecryptError {
    /// Map a raw result code. `None` for the success code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Self::DecryptionFailure),
            2 => Some(Self::MissingKeyRatchet),
            3 => Some(Self::InvalidNonce),
            4 => Some(Self::MissingCryptor),
            code => Some(Self::Unknown { code }),
        }
    }

    /// Raw result code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::DecryptionFailure => 1,
            Self::MissingKeyRatchet => 2,
            Self::InvalidNonce => 3,
            Self::MissingCryptor => 4,
            Self::Unknown { code } => *code,
        }
    }

    /// Returns true if a later frame from the same sender may succeed.
    ///
    /// Missing key material resolves itself once the next transition binds a
    /// ratchet. Authentication and nonce failures are specific to the frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MissingKeyRatchet | Self::MissingCryptor)
    }
}

/// Errors from [`crate::KeyRatchet`] lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RatchetError {
    /// Generation is behind the chain and its key was already erased.
    #[error("generation {requested} was erased (chain at {current})")]
    GenerationErased {
        /// Next generation the chain will derive
        current: u32,
        /// Requested generation
        requested: u32,
    },

    /// Generation is further ahead than the ratchet is willing to skip.
    #[error("generation {requested} too far ahead (chain at {current})")]
    TooFarAhead {
        /// Next generation the chain will derive
        current: u32,
        /// Requested generation
        requested: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_code_is_not_an_error() {
        assert_eq!(EncryptError::from_code(0), None);
        assert_eq!(DecryptError::from_code(0), None);
    }

    #[test]
    fn known_codes_round_trip() {
        for code in 1..=4 {
            let err = DecryptError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
            assert!(!matches!(err, DecryptError::Unknown { .. }));
        }
        for code in 1..=2 {
            let err = EncryptError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn unrecognized_codes_are_preserved() {
        assert_eq!(DecryptError::from_code(99), Some(DecryptError::Unknown { code: 99 }));
        assert_eq!(EncryptError::from_code(7), Some(EncryptError::Unknown { code: 7 }));
        assert_eq!(DecryptError::Unknown { code: 99 }.code(), 99);
    }

    #[test]
    fn missing_key_material_is_transient() {
        assert!(DecryptError::MissingKeyRatchet.is_transient());
        assert!(DecryptError::MissingCryptor.is_transient());
        assert!(!DecryptError::DecryptionFailure.is_transient());
        assert!(!DecryptError::InvalidNonce.is_transient());
    }

    #[test]
    fn error_display() {
        let err = RatchetError::TooFarAhead { current: 2, requested: 900 };
        assert_eq!(err.to_string(), "generation 900 too far ahead (chain at 2)");
        assert_eq!(DecryptError::InvalidNonce.to_string(), "invalid nonce");
    }
}
