//! DAVE MLS
//!
//! `OpenMLS` implementation of the coordinator's membership session.
//!
//! # Components
//!
//! - [`session`]: group lifecycle and ratchet export
//! - [`envelope`]: CBOR framing of proposal batches and commit/welcome pairs
//! - [`provider`]: `OpenMLS` provider wired to the Environment RNG

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod provider;
pub mod session;

pub use envelope::{CommitWelcome, ProposalsEnvelope};
pub use provider::MlsProvider;
pub use session::{CIPHERSUITE, MlsSession, RATCHET_EXPORT_LABEL};
