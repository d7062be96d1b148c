//! Per-sender frame decryption.
//!
//! A [`Decryptor`] holds one slot per key ratchet it has been transitioned to.
//! The newest slot is current; older ones are retired with an expiry so
//! frames already in flight under the previous key still open. Passthrough
//! is handled the same way: leaving passthrough keeps accepting unencrypted
//! frames until the grace period ends.

use std::{collections::BTreeSet, ops::Add, time::Duration};

use crate::{
    error::DecryptError,
    frame::{self, EncryptedFrame},
    media::MediaType,
    ratchet::KeyRatchet,
};

/// Tuning for [`Decryptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptorConfig {
    /// How long a retired ratchet or a disabled passthrough keeps accepting
    /// frames after a transition.
    pub transition_expiry: Duration,
    /// How far behind the newest nonce a frame may arrive before it is
    /// rejected as stale.
    pub max_missing_nonces: u32,
}

impl Default for DecryptorConfig {
    fn default() -> Self {
        Self { transition_expiry: Duration::from_secs(10), max_missing_nonces: 1000 }
    }
}

/// Frame counters for one decryptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptionStats {
    /// Unencrypted frames accepted in passthrough
    pub passthrough_count: u64,
    /// Frames opened successfully
    pub decrypt_success_count: u64,
    /// Frames rejected with an error
    pub decrypt_failure_count: u64,
    /// Frames that opened under a retired ratchet
    pub decrypt_retired_key_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Passthrough<I> {
    Disabled,
    Enabled,
    Until(I),
}

/// Replay window over truncated nonces.
#[derive(Debug, Default)]
struct NonceWindow {
    newest: Option<u32>,
    seen: BTreeSet<u32>,
}

impl NonceWindow {
    fn accepts(&self, nonce: u32, max_missing: u32) -> bool {
        match self.newest {
            None => true,
            Some(newest) if nonce > newest => true,
            Some(newest) => newest - nonce <= max_missing && !self.seen.contains(&nonce),
        }
    }

    fn commit(&mut self, nonce: u32, max_missing: u32) {
        self.seen.insert(nonce);
        let newest = self.newest.map_or(nonce, |n| n.max(nonce));
        self.newest = Some(newest);

        let floor = newest.saturating_sub(max_missing);
        self.seen = self.seen.split_off(&floor);
    }
}

#[derive(Debug)]
struct Slot<I> {
    ratchet: Option<KeyRatchet>,
    expires_at: Option<I>,
    window: NonceWindow,
}

/// Decrypts frames from one remote sender.
///
/// Generic over the instant type so callers pick the clock; time only ever
/// comes in through `now` arguments.
#[derive(Debug)]
pub struct Decryptor<I> {
    config: DecryptorConfig,
    slots: Vec<Slot<I>>,
    passthrough: Passthrough<I>,
    stats: DecryptionStats,
}

impl<I> Decryptor<I>
where
    I: Copy + PartialOrd + Add<Duration, Output = I>,
{
    /// Create a decryptor with no ratchet and passthrough disabled.
    pub fn new(config: DecryptorConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            passthrough: Passthrough::Disabled,
            stats: DecryptionStats::default(),
        }
    }

    /// Switch to a new ratchet, retiring the current ones.
    ///
    /// `None` installs a slot with no key material, so encrypted frames fail
    /// with `MissingKeyRatchet` once the retired slots expire.
    pub fn transition_to_key_ratchet(&mut self, ratchet: Option<KeyRatchet>, now: I) {
        self.expire(now);

        let expiry = now + self.config.transition_expiry;
        for slot in &mut self.slots {
            if slot.expires_at.is_none() {
                slot.expires_at = Some(expiry);
            }
        }

        self.slots.push(Slot { ratchet, expires_at: None, window: NonceWindow::default() });
    }

    /// Enable passthrough, or disable it after the transition grace period.
    pub fn transition_to_passthrough_mode(&mut self, enabled: bool, now: I) {
        self.expire(now);

        self.passthrough = if enabled {
            Passthrough::Enabled
        } else {
            match self.passthrough {
                Passthrough::Enabled => Passthrough::Until(now + self.config.transition_expiry),
                other => other,
            }
        };
    }

    /// Returns true if unencrypted frames are accepted at `now`.
    pub fn accepts_passthrough(&self, now: I) -> bool {
        match self.passthrough {
            Passthrough::Enabled => true,
            Passthrough::Until(deadline) => now < deadline,
            Passthrough::Disabled => false,
        }
    }

    /// Number of ratchet slots still live, the current one included.
    pub fn active_ratchets(&self) -> usize {
        self.slots.len()
    }

    /// Decrypt one frame.
    ///
    /// While passthrough is accepted, a frame that merely looks encrypted but
    /// does not open is returned unmodified.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailure` if no slot authenticates the frame, or an
    ///   unencrypted frame arrives outside passthrough
    /// - `InvalidNonce` for a replayed or stale nonce, or a malformed trailer
    /// - `MissingKeyRatchet` if the only candidate slots carry no ratchet
    /// - `MissingCryptor` if no slot exists at all
    pub fn decrypt(
        &mut self,
        data: &[u8],
        media_type: MediaType,
        now: I,
    ) -> Result<Vec<u8>, DecryptError> {
        self.expire(now);

        let result = self.decrypt_inner(data, media_type, now);
        if result.is_err() {
            self.stats.decrypt_failure_count += 1;
        }
        result
    }

    /// Counters since construction.
    pub fn stats(&self) -> DecryptionStats {
        self.stats
    }

    fn decrypt_inner(
        &mut self,
        data: &[u8],
        media_type: MediaType,
        now: I,
    ) -> Result<Vec<u8>, DecryptError> {
        if !frame::is_encrypted(data) {
            if self.accepts_passthrough(now) {
                self.stats.passthrough_count += 1;
                return Ok(data.to_vec());
            }
            return Err(DecryptError::DecryptionFailure);
        }

        match self.open_encrypted(data, media_type) {
            Err(_) if self.accepts_passthrough(now) => {
                self.stats.passthrough_count += 1;
                Ok(data.to_vec())
            },
            result => result,
        }
    }

    fn open_encrypted(
        &mut self,
        data: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, DecryptError> {
        if self.slots.is_empty() {
            return Err(DecryptError::MissingCryptor);
        }

        let parsed = frame::parse(data).map_err(|_| DecryptError::InvalidNonce)?;
        let max_missing = self.config.max_missing_nonces;
        let newest = self.slots.len() - 1;

        let mut worst = DecryptError::MissingKeyRatchet;
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            match open_in_slot(slot, &parsed, media_type, max_missing) {
                Ok(plaintext) => {
                    self.stats.decrypt_success_count += 1;
                    if index != newest {
                        self.stats.decrypt_retired_key_count += 1;
                    }
                    return Ok(plaintext);
                },
                Err(err) => worst = more_specific(worst, err),
            }
        }

        Err(worst)
    }

    fn expire(&mut self, now: I) {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.expires_at.is_none_or(|deadline| now < deadline));
        if self.slots.len() < before {
            tracing::debug!(expired = before - self.slots.len(), "retired key ratchets expired");
        }

        if let Passthrough::Until(deadline) = self.passthrough
            && now >= deadline
        {
            self.passthrough = Passthrough::Disabled;
        }
    }
}

fn open_in_slot<I>(
    slot: &mut Slot<I>,
    parsed: &EncryptedFrame<'_>,
    media_type: MediaType,
    max_missing: u32,
) -> Result<Vec<u8>, DecryptError> {
    let Some(ratchet) = slot.ratchet.as_mut() else {
        return Err(DecryptError::MissingKeyRatchet);
    };

    let generation = parsed.generation();
    let key = ratchet.get(generation).map_err(|_| DecryptError::DecryptionFailure)?;
    let plaintext =
        frame::open(parsed, media_type, &key).ok_or(DecryptError::DecryptionFailure)?;

    if !slot.window.accepts(parsed.nonce, max_missing) {
        return Err(DecryptError::InvalidNonce);
    }
    slot.window.commit(parsed.nonce, max_missing);

    // keep one generation back for frames reordered across the boundary
    ratchet.erase_below(generation.saturating_sub(1));

    Ok(plaintext)
}

fn more_specific(current: DecryptError, candidate: DecryptError) -> DecryptError {
    fn rank(err: DecryptError) -> u8 {
        match err {
            DecryptError::InvalidNonce => 3,
            DecryptError::DecryptionFailure => 2,
            DecryptError::MissingKeyRatchet => 1,
            _ => 0,
        }
    }

    if rank(candidate) > rank(current) { candidate } else { current }
}
