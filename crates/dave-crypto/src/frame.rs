//! Encrypted frame codec
//!
//! An encrypted frame is the AEAD output followed by a fixed trailer:
//!
//! ```text
//! ┌────────────┬──────────┬───────────────┬─────────────┬────────┐
//! │ ciphertext │ tag (16) │ nonce (u32 BE)│ trailer_len │ 0xFAFA │
//! └────────────┴──────────┴───────────────┴─────────────┴────────┘
//! ```
//!
//! The 32-bit truncated nonce is expanded to the 24-byte `XChaCha20` nonce by
//! zero padding. Its top byte is the key generation. The media type and the
//! truncated nonce are bound as associated data.
//!
//! All functions are pure.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{media::MediaType, ratchet::FrameKey};

/// Marker closing every encrypted frame.
pub const MAGIC_MARKER: [u8; 2] = [0xFA, 0xFA];

/// Poly1305 tag size
pub const TAG_SIZE: usize = 16;

/// Truncated nonce size
pub const NONCE_SIZE: usize = 4;

/// Trailer size: nonce, length byte, marker
pub const TRAILER_SIZE: usize = NONCE_SIZE + 1 + MAGIC_MARKER.len();

/// Bits of the truncated nonce below the generation byte.
const GENERATION_SHIFT: u32 = 24;

/// Parsed view of an encrypted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedFrame<'a> {
    /// Ciphertext including the Poly1305 tag
    pub sealed: &'a [u8],
    /// Truncated nonce
    pub nonce: u32,
}

impl EncryptedFrame<'_> {
    /// Key generation the frame was sealed under.
    pub fn generation(&self) -> u32 {
        generation_of(self.nonce)
    }
}

/// Malformed frame trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedFrame;

/// Key generation encoded in a truncated nonce.
pub fn generation_of(nonce: u32) -> u32 {
    nonce >> GENERATION_SHIFT
}

/// Returns true if `frame` ends with the encrypted-frame marker.
pub fn is_encrypted(frame: &[u8]) -> bool {
    frame.ends_with(&MAGIC_MARKER)
}

/// Split an encrypted frame into sealed payload and nonce.
///
/// # Errors
///
/// `MalformedFrame` if the trailer length byte is wrong or the frame is too
/// short to hold a tag.
pub fn parse(frame: &[u8]) -> Result<EncryptedFrame<'_>, MalformedFrame> {
    if !is_encrypted(frame) || frame.len() < TRAILER_SIZE + TAG_SIZE {
        return Err(MalformedFrame);
    }

    let trailer_start = frame.len() - TRAILER_SIZE;
    let trailer = &frame[trailer_start..];

    if usize::from(trailer[NONCE_SIZE]) != TRAILER_SIZE {
        return Err(MalformedFrame);
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&trailer[..NONCE_SIZE]);

    Ok(EncryptedFrame { sealed: &frame[..trailer_start], nonce: u32::from_be_bytes(nonce_bytes) })
}

/// Seal `plaintext` under `key` and append the trailer.
pub fn seal(plaintext: &[u8], media_type: MediaType, key: &FrameKey, nonce: u32) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.key().into());
    let full_nonce = expand_nonce(nonce);
    let aad = associated_data(media_type, nonce);

    let Ok(mut out) = cipher.encrypt(XNonce::from_slice(&full_nonce), Payload {
        msg: plaintext,
        aad: &aad,
    }) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    out.reserve(TRAILER_SIZE);
    out.extend_from_slice(&nonce.to_be_bytes());
    out.push(TRAILER_SIZE as u8);
    out.extend_from_slice(&MAGIC_MARKER);
    out
}

/// Open a parsed frame under `key`.
///
/// Returns `None` if authentication fails.
pub fn open(frame: &EncryptedFrame<'_>, media_type: MediaType, key: &FrameKey) -> Option<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.key().into());
    let full_nonce = expand_nonce(frame.nonce);
    let aad = associated_data(media_type, frame.nonce);

    cipher
        .decrypt(XNonce::from_slice(&full_nonce), Payload { msg: frame.sealed, aad: &aad })
        .ok()
}

fn expand_nonce(nonce: u32) -> [u8; 24] {
    let mut full = [0u8; 24];
    full[24 - NONCE_SIZE..].copy_from_slice(&nonce.to_be_bytes());
    full
}

fn associated_data(media_type: MediaType, nonce: u32) -> [u8; 1 + NONCE_SIZE] {
    let mut aad = [0u8; 1 + NONCE_SIZE];
    aad[0] = media_type.code();
    aad[1..].copy_from_slice(&nonce.to_be_bytes());
    aad
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ratchet::KeyRatchet;

    fn key(generation: u32) -> FrameKey {
        KeyRatchet::new([7u8; 32]).get(generation).unwrap()
    }

    #[test]
    fn sealed_frame_carries_trailer() {
        let frame = seal(b"opus", MediaType::Audio, &key(0), 42);

        assert!(is_encrypted(&frame));
        assert_eq!(frame.len(), 4 + TAG_SIZE + TRAILER_SIZE);

        let parsed = parse(&frame).unwrap();
        assert_eq!(parsed.nonce, 42);
        assert_eq!(parsed.generation(), 0);
    }

    #[test]
    fn open_recovers_plaintext() {
        let k = key(0);
        let frame = seal(b"hello video", MediaType::Video, &k, 1);
        let parsed = parse(&frame).unwrap();

        assert_eq!(open(&parsed, MediaType::Video, &k).unwrap(), b"hello video");
    }

    #[test]
    fn media_type_is_authenticated() {
        let k = key(0);
        let frame = seal(b"audio", MediaType::Audio, &k, 1);
        let parsed = parse(&frame).unwrap();

        assert!(open(&parsed, MediaType::Video, &k).is_none());
    }

    #[test]
    fn tampered_nonce_fails_authentication() {
        let k = key(0);
        let mut frame = seal(b"audio", MediaType::Audio, &k, 1);
        let nonce_at = frame.len() - TRAILER_SIZE;
        frame[nonce_at + NONCE_SIZE - 1] ^= 0x01;

        let parsed = parse(&frame).unwrap();
        assert!(open(&parsed, MediaType::Audio, &k).is_none());
    }

    #[test]
    fn generation_is_top_nonce_byte() {
        assert_eq!(generation_of(0x00FF_FFFF), 0);
        assert_eq!(generation_of(0x0100_0000), 1);
        assert_eq!(generation_of(u32::MAX), 255);
    }

    #[test]
    fn bad_trailer_length_is_malformed() {
        let mut frame = seal(b"x", MediaType::Audio, &key(0), 0);
        let len_at = frame.len() - MAGIC_MARKER.len() - 1;
        frame[len_at] = 3;
        assert_eq!(parse(&frame), Err(MalformedFrame));
    }

    #[test]
    fn short_frame_is_malformed() {
        assert_eq!(parse(&[0, 0, 0, 0, 7, 0xFA, 0xFA]), Err(MalformedFrame));
        assert!(!is_encrypted(b"plain"));
    }
}
