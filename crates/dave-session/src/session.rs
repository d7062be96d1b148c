//! Async session handle and its coordination worker.
//!
//! Every mutating entry point becomes a [`Command`] on a bounded queue. A
//! single worker task owns the [`TransitionCoordinator`], applies commands in
//! submission order, and only then hands the resulting actions to the
//! delegate. Frame encryption and decryption bypass the queue and go straight
//! to the shared [`FrameRouter`].

use std::sync::Arc;

use dave_core::{
    CipherFactory, CoordinatorError, CoordinatorPhase, DaveCiphers, Epoch, FrameRouter, Identity,
    MAX_SUPPORTED_PROTOCOL_VERSION, MembershipSession, ProtocolVersion, SessionAction,
    SessionEvent, TransitionCoordinator, TransitionId,
};
use dave_crypto::{DecryptError, DecryptionStats, EncryptError, EncryptionStats, MediaType};
use dave_mls::MlsSession;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::SessionConfig,
    delegate::{SessionDelegate, deliver},
    error::SessionError,
    system_env::SystemEnv,
};

type Reply = oneshot::Sender<Result<Vec<SessionAction>, CoordinatorError>>;

enum Command {
    Event { event: SessionEvent, reply: Reply },
    Phase { reply: oneshot::Sender<CoordinatorPhase> },
}

/// Handle to a running call session.
///
/// Dropping the handle stops the worker; queued commands are discarded.
pub struct DaveSession<F: CipherFactory> {
    commands: mpsc::Sender<Command>,
    router: Arc<FrameRouter<F>>,
    self_identity: Identity,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DaveSession<DaveCiphers<SystemEnv>> {
    /// Session backed by `OpenMLS` and the `dave-crypto` ciphers.
    ///
    /// Must be called within a tokio runtime.
    pub fn with_mls(config: SessionConfig, delegate: Option<Arc<dyn SessionDelegate>>) -> Self {
        let ciphers = DaveCiphers::new(SystemEnv, config.decryptor);
        Self::spawn(MlsSession::new(SystemEnv), ciphers, config, delegate)
    }
}

impl<F: CipherFactory> DaveSession<F> {
    /// Start the worker for `session`.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<M: MembershipSession>(
        session: M,
        ciphers: F,
        config: SessionConfig,
        delegate: Option<Arc<dyn SessionDelegate>>,
    ) -> Self {
        let coordinator = TransitionCoordinator::new(
            session,
            ciphers,
            config.self_identity.clone(),
            config.group_id,
        );
        let router = Arc::clone(coordinator.router());
        let (commands, queue) = mpsc::channel(config.command_queue_depth.max(1));
        let shutdown = CancellationToken::new();

        let worker = Worker { coordinator, queue, delegate, shutdown: shutdown.clone() };
        let handle = tokio::spawn(worker.run());

        debug!(identity = %config.self_identity, group_id = config.group_id, "session started");

        Self {
            commands,
            router,
            self_identity: config.self_identity,
            shutdown,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Identity of the local participant.
    pub fn self_identity(&self) -> &Identity {
        &self.self_identity
    }

    /// Highest protocol version this implementation speaks.
    pub fn max_supported_protocol_version(&self) -> ProtocolVersion {
        MAX_SUPPORTED_PROTOCOL_VERSION
    }

    /// Cipher bindings shared with the media path.
    pub fn router(&self) -> &Arc<FrameRouter<F>> {
        &self.router
    }

    /// Negotiate the protocol version for a new call.
    pub async fn select_protocol(
        &self,
        version: ProtocolVersion,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::SelectProtocol { version }).await
    }

    /// Stage a transition to `version`.
    pub async fn prepare_transition(
        &self,
        transition_id: TransitionId,
        version: ProtocolVersion,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::PrepareTransition { transition_id, version }).await
    }

    /// Activate a staged transition.
    pub async fn execute_transition(
        &self,
        transition_id: TransitionId,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::ExecuteTransition { transition_id }).await
    }

    /// Begin a membership epoch.
    pub async fn prepare_epoch(
        &self,
        epoch: Epoch,
        version: ProtocolVersion,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::PrepareEpoch { epoch, version }).await
    }

    /// Register the external proposal sender.
    pub async fn external_sender_package(
        &self,
        package: Vec<u8>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::ExternalSenderPackage { package }).await
    }

    /// Apply proposals relayed by the external sender.
    pub async fn proposals(&self, proposals: Vec<u8>) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::Proposals { proposals }).await
    }

    /// Apply the winning commit for a transition.
    pub async fn prepare_commit_transition(
        &self,
        transition_id: TransitionId,
        commit: Vec<u8>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::PrepareCommitTransition { transition_id, commit }).await
    }

    /// Join the group from a welcome.
    pub async fn welcome(
        &self,
        transition_id: TransitionId,
        welcome: Vec<u8>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.submit(SessionEvent::Welcome { transition_id, welcome }).await
    }

    /// Track a participant that joined the call.
    pub async fn add_peer(&self, identity: Identity) -> Result<(), SessionError> {
        self.submit(SessionEvent::AddPeer { identity }).await.map(drop)
    }

    /// Forget a participant that left the call.
    pub async fn remove_peer(&self, identity: Identity) -> Result<(), SessionError> {
        self.submit(SessionEvent::RemovePeer { identity }).await.map(drop)
    }

    /// Coordinator phase after every previously submitted command.
    pub async fn phase(&self) -> Result<CoordinatorPhase, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::Phase { reply }).await.map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    /// Encrypt an outgoing frame.
    pub fn encrypt(
        &self,
        ssrc: u32,
        data: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, EncryptError> {
        self.router.encrypt(ssrc, data, media_type)
    }

    /// Decrypt a frame from `identity`. `None` for unknown participants.
    pub fn decrypt(
        &self,
        identity: &Identity,
        data: &[u8],
        media_type: MediaType,
    ) -> Option<Result<Vec<u8>, DecryptError>> {
        self.router.decrypt(identity, data, media_type)
    }

    /// Encryption counters for stream `ssrc`.
    pub fn encryption_stats(&self, ssrc: u32) -> Option<EncryptionStats> {
        self.router.encryption_stats(ssrc)
    }

    /// Decryption counters for `identity`. `None` for unknown participants.
    pub fn decryption_stats(&self, identity: &Identity) -> Option<DecryptionStats> {
        self.router.decryption_stats(identity)
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Cancels a delegate notification in flight. Commands still queued are
    /// dropped and their submitters see [`SessionError::Closed`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "session worker failed");
        }
    }

    async fn submit(&self, event: SessionEvent) -> Result<Vec<SessionAction>, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Event { event, reply })
            .await
            .map_err(|_| SessionError::Closed)?;

        let actions = response.await.map_err(|_| SessionError::Closed)??;
        Ok(actions)
    }
}

impl<F: CipherFactory> Drop for DaveSession<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Worker<M: MembershipSession, F: CipherFactory> {
    coordinator: TransitionCoordinator<M, F>,
    queue: mpsc::Receiver<Command>,
    delegate: Option<Arc<dyn SessionDelegate>>,
    shutdown: CancellationToken,
}

impl<M: MembershipSession, F: CipherFactory> Worker<M, F> {
    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                command = self.queue.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                Command::Event { event, reply } => {
                    let result = self.coordinator.handle(event);
                    if let Ok(actions) = &result
                        && !notify(self.delegate.as_deref(), &self.shutdown, actions).await
                    {
                        break;
                    }
                    let _ = reply.send(result);
                },
                Command::Phase { reply } => {
                    let _ = reply.send(self.coordinator.phase());
                },
            }
        }

        debug!(identity = %self.coordinator.self_identity(), "session worker stopped");
    }
}

/// Deliver actions in order. Returns false if shutdown interrupted.
async fn notify(
    delegate: Option<&dyn SessionDelegate>,
    shutdown: &CancellationToken,
    actions: &[SessionAction],
) -> bool {
    let Some(delegate) = delegate else {
        return true;
    };

    for action in actions {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                debug!(opcode = action.opcode().code(), "notification cancelled");
                return false;
            },

            () = deliver(delegate, action.clone()) => {},
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dave_core::test_utils::{MockEnv, ScriptedSession};
    use dave_crypto::DecryptorConfig;

    use super::*;

    fn start() -> DaveSession<DaveCiphers<MockEnv>> {
        let ciphers = DaveCiphers::new(MockEnv::default(), DecryptorConfig::default());
        DaveSession::spawn(ScriptedSession::new(), ciphers, SessionConfig::new("alice", 1), None)
    }

    #[tokio::test]
    async fn actions_are_returned_without_delegate() {
        let session = start();

        let actions = session.select_protocol(1).await.unwrap();

        assert!(matches!(actions.as_slice(), [SessionAction::SendKeyPackage(_)]));
        assert_eq!(session.phase().await.unwrap(), CoordinatorPhase::Active(1));
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let session = start();
        session.shutdown().await;

        assert_eq!(session.select_protocol(1).await, Err(SessionError::Closed));
        assert_eq!(session.phase().await, Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn frames_bypass_the_queue() {
        let session = start();
        assert_eq!(session.encrypt(1, b"hello", MediaType::Audio).unwrap(), b"hello");
        assert!(session.decrypt(&Identity::from("bob"), b"hello", MediaType::Audio).is_none());
    }

    #[tokio::test]
    async fn decryption_stats_count_roster_frames() {
        let session = start();
        let bob = Identity::from("bob");
        assert!(session.decryption_stats(&bob).is_none());

        session.select_protocol(0).await.unwrap();
        session.add_peer(bob.clone()).await.unwrap();
        session.decrypt(&bob, b"hello", MediaType::Audio).unwrap().unwrap();

        assert_eq!(session.decryption_stats(&bob).unwrap().passthrough_count, 1);
    }
}
