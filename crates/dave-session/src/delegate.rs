//! Outbound signaling notifications.

use async_trait::async_trait;
use dave_core::{SessionAction, TransitionId};

/// Receives the notifications the session needs sent over signaling.
///
/// Called from the session worker after the coordinator has finished
/// mutating state, one notification at a time and in the order produced.
/// A slow delegate delays later commands but never frame encryption.
#[async_trait]
pub trait SessionDelegate: Send + Sync {
    /// Publish the local key package (opcode 26).
    async fn send_key_package(&self, key_package: Vec<u8>);

    /// The local participant is ready to execute `transition_id` (opcode 23).
    async fn ready_for_transition(&self, transition_id: TransitionId);

    /// Broadcast a commit and optional welcome (opcode 28).
    async fn send_commit_welcome(&self, commit_welcome: Vec<u8>);

    /// The commit or welcome for `transition_id` was unusable (opcode 31).
    async fn invalid_commit_welcome(&self, transition_id: TransitionId);
}

/// Hand one coordinator action to the delegate.
pub(crate) async fn deliver(delegate: &dyn SessionDelegate, action: SessionAction) {
    match action {
        SessionAction::SendKeyPackage(key_package) => {
            delegate.send_key_package(key_package).await;
        },
        SessionAction::ReadyForTransition(transition_id) => {
            delegate.ready_for_transition(transition_id).await;
        },
        SessionAction::SendCommitWelcome(commit_welcome) => {
            delegate.send_commit_welcome(commit_welcome).await;
        },
        SessionAction::InvalidCommitWelcome(transition_id) => {
            delegate.invalid_commit_welcome(transition_id).await;
        },
    }
}
