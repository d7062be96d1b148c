//! Transition and epoch coordination.
//!
//! Protocol version changes go through a prepare/execute pair so every
//! participant switches keys at the same logical moment without a shared
//! clock:
//!
//! - **prepare** rebinds every peer decryptor right away, because frames
//!   under either the old or the new key may already be in flight. The self
//!   encryptor keeps its old key and the coordinator reports readiness.
//! - **execute** rebinds the self encryptor once every participant is ready.
//!
//! The init transition (id 0) skips the queue and rebinds self at prepare
//! time.
//!
//! The coordinator is Sans-IO: it mutates its own state and the shared
//! [`FrameRouter`], then returns [`SessionAction`]s for the caller to deliver.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────┐ select_protocol(v>0) ┌──────────────┐ prepare_epoch ┌───────────┐
//! │ Disabled │─────────────────────>│ PendingEpoch │──────────────>│ Active(v) │
//! └──────────┘                      └──────────────┘               └───────────┘
//!      ^                                                              │    ^
//!      │ execute_transition(id) resolving to 0   prepare_transition(id)│    │ execute_transition(id)
//!      │                                                              v    │
//!      │                                                  ┌──────────────────────┐
//!      └──────────────────────────────────────────────────│ PendingTransition(*) │
//!                                                         └──────────────────────┘
//! ```

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    binder::{bind_decryptor, bind_encryptor},
    cipher::CipherFactory,
    error::{CoordinatorError, MembershipError},
    event::{SessionAction, SessionEvent},
    membership::MembershipSession,
    router::FrameRouter,
    types::{
        DISABLED_PROTOCOL_VERSION, Epoch, GroupId, INIT_TRANSITION_ID, Identity,
        MAX_SUPPORTED_PROTOCOL_VERSION, ProtocolVersion, TransitionId,
    },
};

/// Observable coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorPhase {
    /// Encryption is off.
    Disabled,
    /// An encrypted protocol was selected; the group is being formed.
    PendingEpoch,
    /// Encryption is agreed at this version.
    Active(ProtocolVersion),
    /// Transitions are staged and waiting for execute, sorted by id.
    PendingTransition(Vec<(TransitionId, ProtocolVersion)>),
}

/// Settled phase when no transition is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Disabled,
    PendingEpoch,
    Active(ProtocolVersion),
}

/// Drives cipher bindings from signaling and membership events.
pub struct TransitionCoordinator<M, F: CipherFactory> {
    session: M,
    router: Arc<FrameRouter<F>>,
    self_identity: Identity,
    group_id: GroupId,
    pending: HashMap<TransitionId, ProtocolVersion>,
    last_prepared_version: ProtocolVersion,
    self_version: ProtocolVersion,
    settled: Settled,
}

impl<M: MembershipSession, F: CipherFactory> TransitionCoordinator<M, F> {
    /// Create a coordinator for `self_identity` in `group_id`.
    ///
    /// Starts disabled: the self encryptor passes frames through and the
    /// roster is empty.
    pub fn new(session: M, ciphers: F, self_identity: Identity, group_id: GroupId) -> Self {
        Self {
            session,
            router: Arc::new(FrameRouter::new(ciphers)),
            self_identity,
            group_id,
            pending: HashMap::new(),
            last_prepared_version: DISABLED_PROTOCOL_VERSION,
            self_version: DISABLED_PROTOCOL_VERSION,
            settled: Settled::Disabled,
        }
    }

    /// Frame router shared with the media path.
    pub fn router(&self) -> &Arc<FrameRouter<F>> {
        &self.router
    }

    /// Membership session.
    pub fn session(&self) -> &M {
        &self.session
    }

    /// Local participant.
    pub fn self_identity(&self) -> &Identity {
        &self.self_identity
    }

    /// Highest protocol version this implementation speaks.
    pub fn max_supported_protocol_version(&self) -> ProtocolVersion {
        MAX_SUPPORTED_PROTOCOL_VERSION
    }

    /// Version the self encryptor is bound to.
    pub fn self_version(&self) -> ProtocolVersion {
        self.self_version
    }

    /// Version of the most recent prepare, used to bind late joiners.
    pub fn last_prepared_version(&self) -> ProtocolVersion {
        self.last_prepared_version
    }

    /// Version staged for `transition_id`, if not yet executed.
    pub fn pending_version(&self, transition_id: TransitionId) -> Option<ProtocolVersion> {
        self.pending.get(&transition_id).copied()
    }

    /// Staged transitions, sorted by id.
    pub fn pending_transitions(&self) -> Vec<(TransitionId, ProtocolVersion)> {
        let mut pending: Vec<_> = self.pending.iter().map(|(&id, &v)| (id, v)).collect();
        pending.sort_unstable();
        pending
    }

    /// Current phase.
    pub fn phase(&self) -> CoordinatorPhase {
        if !self.pending.is_empty() {
            return CoordinatorPhase::PendingTransition(self.pending_transitions());
        }

        match self.settled {
            Settled::Disabled => CoordinatorPhase::Disabled,
            Settled::PendingEpoch => CoordinatorPhase::PendingEpoch,
            Settled::Active(version) => CoordinatorPhase::Active(version),
        }
    }

    /// Roster peers plus the local participant.
    pub fn known_identities(&self) -> Vec<Identity> {
        let mut known = self.router.peers();
        known.sort_unstable();
        known.push(self.self_identity.clone());
        known
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<SessionAction>, CoordinatorError> {
        match event {
            SessionEvent::SelectProtocol { version } => self.select_protocol(version),
            SessionEvent::PrepareTransition { transition_id, version } => {
                Ok(self.prepare_transition(transition_id, version))
            },
            SessionEvent::ExecuteTransition { transition_id } => {
                self.execute_transition(transition_id);
                Ok(vec![])
            },
            SessionEvent::PrepareEpoch { epoch, version } => self.prepare_epoch(epoch, version),
            SessionEvent::ExternalSenderPackage { package } => {
                Ok(self.external_sender_package(&package))
            },
            SessionEvent::Proposals { proposals } => Ok(self.proposals(&proposals)),
            SessionEvent::PrepareCommitTransition { transition_id, commit } => {
                Ok(self.prepare_commit_transition(transition_id, &commit))
            },
            SessionEvent::Welcome { transition_id, welcome } => {
                Ok(self.welcome(transition_id, &welcome))
            },
            SessionEvent::AddPeer { identity } => {
                self.add_peer(identity);
                Ok(vec![])
            },
            SessionEvent::RemovePeer { identity } => {
                self.remove_peer(&identity);
                Ok(vec![])
            },
        }
    }

    /// Track a peer and bind its decryptor to the last prepared version.
    ///
    /// Replaces the binding if the peer is already tracked.
    pub fn add_peer(&mut self, identity: Identity) {
        let version = self.last_prepared_version;
        let session = &self.session;

        debug!(%identity, protocol_version = version, "adding peer");
        self.router.insert_peer(identity.clone(), |decryptor| {
            bind_decryptor(decryptor, session, &identity, version);
        });
    }

    /// Stop tracking a peer and drop its decryptor.
    pub fn remove_peer(&mut self, identity: &Identity) {
        if self.router.remove_peer(identity) {
            debug!(%identity, "removed peer");
        }
    }

    /// Stage `version` under `transition_id`.
    ///
    /// Peers are rebound immediately. The init transition also rebinds self;
    /// any other id is queued for execute and reported as ready.
    pub fn prepare_transition(
        &mut self,
        transition_id: TransitionId,
        version: ProtocolVersion,
    ) -> Vec<SessionAction> {
        info!(transition_id, protocol_version = version, "preparing transition");

        let session = &self.session;
        let self_identity = &self.self_identity;
        let bind_peer = |identity: &Identity, decryptor: &mut F::Decryptor| {
            bind_decryptor(decryptor, session, identity, version);
        };

        let mut actions = Vec::new();
        if transition_id == INIT_TRANSITION_ID {
            self.router.rebind_all(bind_peer, |encryptor| {
                bind_encryptor(encryptor, session, self_identity, version);
            });
            self.settle_self_version(version);
        } else {
            self.router.for_each_peer(bind_peer);
            self.pending.insert(transition_id, version);
            actions.push(SessionAction::ReadyForTransition(transition_id));
        }

        self.last_prepared_version = version;
        actions
    }

    /// Activate a staged transition. Unknown or already executed ids are
    /// ignored.
    pub fn execute_transition(&mut self, transition_id: TransitionId) {
        let Some(version) = self.pending.remove(&transition_id) else {
            debug!(transition_id, "execute for unknown transition ignored");
            return;
        };

        info!(transition_id, protocol_version = version, "executing transition");

        if version == DISABLED_PROTOCOL_VERSION {
            self.session.reset();
        }

        self.setup_key_ratchet_for_encryptor(version);
    }

    /// Form a new group and publish its key package.
    ///
    /// Only the new-group epoch is acted on; other epochs are ignored.
    pub fn prepare_epoch(
        &mut self,
        epoch: Epoch,
        version: ProtocolVersion,
    ) -> Result<Vec<SessionAction>, CoordinatorError> {
        if epoch != Epoch::MLS_NEW_GROUP {
            debug!(%epoch, "ignoring epoch");
            return Ok(vec![]);
        }

        info!(%epoch, protocol_version = version, group_id = self.group_id, "forming group");

        self.session
            .initialize(version, self.group_id, &self.self_identity)
            .map_err(|source| CoordinatorError::Bootstrap { version, source })?;

        let key_package = self.session.key_package().map_err(CoordinatorError::KeyPackage)?;

        self.settled = Settled::Active(version);
        Ok(vec![SessionAction::SendKeyPackage(key_package)])
    }

    /// Entry point once signaling has negotiated a protocol version.
    pub fn select_protocol(
        &mut self,
        version: ProtocolVersion,
    ) -> Result<Vec<SessionAction>, CoordinatorError> {
        info!(protocol_version = version, "protocol selected");

        if version > DISABLED_PROTOCOL_VERSION {
            if version > MAX_SUPPORTED_PROTOCOL_VERSION {
                warn!(
                    protocol_version = version,
                    max = MAX_SUPPORTED_PROTOCOL_VERSION,
                    "selected version above supported maximum"
                );
            }
            self.settled = Settled::PendingEpoch;
            return self.prepare_epoch(Epoch::MLS_NEW_GROUP, version);
        }

        let actions = self.prepare_transition(INIT_TRANSITION_ID, version);
        self.execute_transition(INIT_TRANSITION_ID);
        Ok(actions)
    }

    /// Register the external proposal sender.
    ///
    /// A fatal session error resynchronizes; any other rejection is logged.
    pub fn external_sender_package(&mut self, package: &[u8]) -> Vec<SessionAction> {
        match self.session.set_external_sender(package) {
            Ok(()) => vec![],
            Err(e) => self.absorb(&e, "external sender package rejected"),
        }
    }

    /// Apply proposals and forward any resulting commit/welcome.
    pub fn proposals(&mut self, proposals: &[u8]) -> Vec<SessionAction> {
        let known = self.known_identities();

        match self.session.process_proposals(proposals, &known) {
            Ok(Some(commit_welcome)) => vec![SessionAction::SendCommitWelcome(commit_welcome)],
            Ok(None) => vec![],
            Err(e) => self.absorb(&e, "proposals rejected"),
        }
    }

    /// Log a membership failure. Fatal ones leave the group unusable, so the
    /// session is rebuilt at its current version.
    fn absorb(&mut self, error: &MembershipError, context: &'static str) -> Vec<SessionAction> {
        warn!(error = %error, fatal = error.is_fatal(), "{context}");
        let mut actions = Vec::new();
        if error.is_fatal() {
            self.resynchronize(&mut actions);
        }
        actions
    }

    /// Apply the commit announced for `transition_id`.
    ///
    /// A failed commit is reported and the coordinator resynchronizes by
    /// selecting the session's current version again. An ignored commit
    /// changes nothing. An applied commit prepares the transition.
    pub fn prepare_commit_transition(
        &mut self,
        transition_id: TransitionId,
        commit: &[u8],
    ) -> Vec<SessionAction> {
        let outcome = self.session.process_commit(commit);

        let failure = match &outcome {
            Err(e) => Some(e.to_string()),
            Ok(outcome) if outcome.is_failed() => Some(format!("{outcome:?}")),
            Ok(_) => None,
        };

        if let Some(reason) = failure {
            warn!(transition_id, %reason, "invalid commit");
            let mut actions = vec![SessionAction::InvalidCommitWelcome(transition_id)];
            self.resynchronize(&mut actions);
            return actions;
        }

        if outcome.as_ref().is_ok_and(|outcome| outcome.is_ignored()) {
            debug!(transition_id, "commit ignored");
            return vec![];
        }

        let version = self.session.protocol_version();
        self.prepare_transition(transition_id, version)
    }

    /// Join the group from the welcome for `transition_id`.
    ///
    /// A rejected welcome is reported and a fresh key package is published so
    /// the next commit can add us again.
    pub fn welcome(&mut self, transition_id: TransitionId, welcome: &[u8]) -> Vec<SessionAction> {
        let known = self.known_identities();

        match self.session.process_welcome(welcome, &known) {
            Ok(outcome) => {
                info!(transition_id, members = outcome.members.len(), "joined group");
                let version = self.session.protocol_version();
                self.prepare_transition(transition_id, version)
            },
            Err(e) => {
                warn!(transition_id, error = %e, "invalid welcome");
                let mut actions = vec![SessionAction::InvalidCommitWelcome(transition_id)];
                match self.session.key_package() {
                    Ok(key_package) => actions.push(SessionAction::SendKeyPackage(key_package)),
                    Err(e) => warn!(error = %e, "no key package after invalid welcome"),
                }
                actions
            },
        }
    }

    /// Select the session's current version again after a failed commit.
    fn resynchronize(&mut self, actions: &mut Vec<SessionAction>) {
        let version = self.session.protocol_version();
        match self.select_protocol(version) {
            Ok(recovered) => actions.extend(recovered),
            Err(e) => warn!(protocol_version = version, error = %e, "resynchronization failed"),
        }
    }

    /// The only place the self encryptor changes version.
    fn setup_key_ratchet_for_encryptor(&mut self, version: ProtocolVersion) {
        let session = &self.session;
        let self_identity = &self.self_identity;
        self.router.with_encryptor(|encryptor| {
            bind_encryptor(encryptor, session, self_identity, version);
        });
        self.settle_self_version(version);
    }

    fn settle_self_version(&mut self, version: ProtocolVersion) {
        self.self_version = version;
        self.settled = if version == DISABLED_PROTOCOL_VERSION {
            Settled::Disabled
        } else {
            Settled::Active(version)
        };
    }
}
