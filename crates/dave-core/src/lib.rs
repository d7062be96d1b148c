//! DAVE Core
//!
//! Keeps frame encryption in step with the membership group of a call.
//!
//! A call has one membership session, one encryptor for the local
//! participant, and one decryptor per remote participant. Signaling drives
//! protocol version changes through a prepare/execute protocol; the
//! [`TransitionCoordinator`] decides when each cipher is rebound to the key
//! ratchet the membership session derives for that participant.
//!
//! # Architecture
//!
//! ```text
//! signaling event ─> TransitionCoordinator ─> MembershipSession
//!                          │
//!                          ├─> binder ─> FrameRouter (encryptor + decryptors)
//!                          │                   ^
//!                          v                   │ encrypt / decrypt
//!                   Vec<SessionAction>     media pipeline
//! ```
//!
//! The coordinator performs no I/O. Callers feed [`SessionEvent`]s and
//! deliver the returned [`SessionAction`]s. The [`FrameRouter`] is shared by
//! `Arc` so the media path can encrypt and decrypt concurrently with
//! coordination.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod binder;
mod cipher;
mod coordinator;
pub mod env;
mod error;
mod event;
mod membership;
mod opcode;
mod router;
pub mod test_utils;
mod types;

pub use cipher::{CipherFactory, ClockedDecryptor, DaveCiphers, FrameDecryptor, FrameEncryptor};
pub use coordinator::{CoordinatorPhase, TransitionCoordinator};
pub use error::{CoordinatorError, MembershipError};
pub use event::{SessionAction, SessionEvent};
pub use membership::{CommitOutcome, MembershipSession, WelcomeOutcome};
pub use opcode::SignalingOpcode;
pub use router::FrameRouter;
pub use types::{
    DISABLED_PROTOCOL_VERSION, Epoch, GroupId, INIT_TRANSITION_ID, Identity,
    MAX_SUPPORTED_PROTOCOL_VERSION, ProtocolVersion, TransitionId,
};
