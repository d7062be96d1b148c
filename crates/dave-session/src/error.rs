//! Errors returned by the async session facade.

use dave_core::CoordinatorError;
use thiserror::Error;

/// Errors returned by [`crate::DaveSession`] entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The worker has stopped; no further commands are accepted.
    #[error("session closed")]
    Closed,

    /// The coordinator rejected the command.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}
