//! DAVE Session
//!
//! Async facade over the transition coordinator for one call.
//!
//! [`DaveSession`] serializes signaling commands through a single worker
//! task and reports outbound notifications to an optional
//! [`SessionDelegate`]. The media path calls [`DaveSession::encrypt`] and
//! [`DaveSession::decrypt`] directly; they never wait on the worker.
//!
//! # Example
//!
//! ```no_run
//! use dave_session::{DaveSession, SessionConfig};
//!
//! # async fn run() -> Result<(), dave_session::SessionError> {
//! let session = DaveSession::with_mls(SessionConfig::new("alice", 42), None);
//! let actions = session.select_protocol(1).await?;
//! # drop(actions);
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod delegate;
mod error;
mod session;
mod system_env;

pub use config::SessionConfig;
pub use delegate::SessionDelegate;
pub use error::SessionError;
pub use session::DaveSession;
pub use system_env::SystemEnv;
