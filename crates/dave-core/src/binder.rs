//! Applies a protocol version decision to one participant's cipher.
//!
//! Version `0` means passthrough. Any other version binds the ratchet the
//! membership session derives for that participant right now. A binding is
//! never both: enabling encryption always turns passthrough off.

use tracing::{debug, warn};

use crate::{
    cipher::{FrameDecryptor, FrameEncryptor},
    membership::MembershipSession,
    types::{DISABLED_PROTOCOL_VERSION, Identity, ProtocolVersion},
};

/// Bind the local encryptor to `version`.
pub fn bind_encryptor<C, M>(
    encryptor: &mut C,
    session: &M,
    self_identity: &Identity,
    version: ProtocolVersion,
) where
    C: FrameEncryptor + ?Sized,
    M: MembershipSession + ?Sized,
{
    if version == DISABLED_PROTOCOL_VERSION {
        debug!(identity = %self_identity, "encryptor set to passthrough");
        encryptor.set_passthrough_mode(true);
        return;
    }

    let ratchet = session.key_ratchet(self_identity);
    if ratchet.is_none() {
        warn!(identity = %self_identity, protocol_version = version, "no key ratchet for encryptor");
    }

    debug!(identity = %self_identity, protocol_version = version, "encryptor bound to key ratchet");
    encryptor.set_key_ratchet(ratchet);
    encryptor.set_passthrough_mode(false);
}

/// Bind a peer decryptor to `version`.
pub fn bind_decryptor<C, M>(
    decryptor: &mut C,
    session: &M,
    identity: &Identity,
    version: ProtocolVersion,
) where
    C: FrameDecryptor + ?Sized,
    M: MembershipSession + ?Sized,
{
    if version == DISABLED_PROTOCOL_VERSION {
        debug!(%identity, "decryptor set to passthrough");
        decryptor.transition_to_passthrough_mode(true);
        return;
    }

    let ratchet = session.key_ratchet(identity);
    if ratchet.is_none() {
        warn!(%identity, protocol_version = version, "no key ratchet for decryptor");
    }

    debug!(%identity, protocol_version = version, "decryptor bound to key ratchet");
    decryptor.transition_to_key_ratchet(ratchet);
    decryptor.transition_to_passthrough_mode(false);
}
