//! Test doubles for the coordinator ports.
//!
//! [`ScriptedSession`] is a membership session whose outcomes are queued up
//! front and whose calls are recorded. Its ratchets are derived from
//! `(group, version, epoch, identity)`, so a test can build the ratchet a
//! binding is expected to hold and check frames against it.

use std::{collections::VecDeque, sync::Arc};

use dave_crypto::KeyRatchet;
use parking_lot::Mutex;

pub use crate::env::test_utils::MockEnv;
use crate::{
    error::MembershipError,
    membership::{CommitOutcome, MembershipSession, WelcomeOutcome},
    types::{DISABLED_PROTOCOL_VERSION, GroupId, Identity, ProtocolVersion},
};

/// One recorded call into [`ScriptedSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    /// `initialize`
    Initialize {
        /// Requested version
        version: ProtocolVersion,
        /// Requested group
        group_id: GroupId,
        /// Local participant
        self_identity: Identity,
    },
    /// `reset`
    Reset,
    /// `key_package`
    KeyPackage,
    /// `set_external_sender`
    SetExternalSender(Vec<u8>),
    /// `process_proposals`
    ProcessProposals {
        /// Identities passed as known
        known: Vec<Identity>,
    },
    /// `process_welcome`
    ProcessWelcome {
        /// Identities passed as known
        known: Vec<Identity>,
    },
    /// `process_commit`
    ProcessCommit(Vec<u8>),
}

#[derive(Default)]
struct ScriptState {
    version: ProtocolVersion,
    group_id: GroupId,
    self_identity: Option<Identity>,
    established: bool,
    epoch: u64,
    key_packages_issued: u64,
    calls: Vec<SessionCall>,
    fail_initialize: bool,
    commit_outcomes: VecDeque<Result<CommitOutcome, MembershipError>>,
    welcome_outcomes: VecDeque<Result<WelcomeOutcome, MembershipError>>,
    proposal_replies: VecDeque<Result<Option<Vec<u8>>, MembershipError>>,
}

/// Recording membership session with scripted outcomes.
///
/// Clones share state, so a test keeps one clone to inspect calls after the
/// other was moved into a coordinator.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSession {
    /// Session with no group and default outcomes (commits applied, welcomes
    /// accepted, proposals produce nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `initialize` calls fail.
    pub fn fail_initialize(&self, fail: bool) {
        self.state.lock().fail_initialize = fail;
    }

    /// Queue the outcome of the next `process_commit`.
    pub fn script_commit(&self, outcome: Result<CommitOutcome, MembershipError>) {
        self.state.lock().commit_outcomes.push_back(outcome);
    }

    /// Queue the outcome of the next `process_welcome`.
    pub fn script_welcome(&self, outcome: Result<WelcomeOutcome, MembershipError>) {
        self.state.lock().welcome_outcomes.push_back(outcome);
    }

    /// Queue the reply of the next `process_proposals`.
    pub fn script_proposals(&self, reply: Result<Option<Vec<u8>>, MembershipError>) {
        self.state.lock().proposal_replies.push_back(reply);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<SessionCall> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&SessionCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Current membership epoch; advances on applied commits and welcomes.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Ratchet the session would hand out for `identity` right now.
    pub fn expected_ratchet(&self, identity: &Identity) -> Option<KeyRatchet> {
        let state = self.state.lock();
        ratchet_for(&state, identity)
    }

    fn record(&self, call: SessionCall) {
        self.state.lock().calls.push(call);
    }
}

fn ratchet_for(state: &ScriptState, identity: &Identity) -> Option<KeyRatchet> {
    if !state.established || state.version == DISABLED_PROTOCOL_VERSION {
        return None;
    }

    let secret = format!("{}/{}/{}/{}", state.group_id, state.version, state.epoch, identity);
    Some(KeyRatchet::from_secret(secret.as_bytes()))
}

impl MembershipSession for ScriptedSession {
    fn initialize(
        &mut self,
        version: ProtocolVersion,
        group_id: GroupId,
        self_identity: &Identity,
    ) -> Result<(), MembershipError> {
        self.record(SessionCall::Initialize {
            version,
            group_id,
            self_identity: self_identity.clone(),
        });

        let mut state = self.state.lock();
        if state.fail_initialize {
            return Err(MembershipError::Crypto("scripted initialize failure".into()));
        }

        state.version = version;
        state.group_id = group_id;
        state.self_identity = Some(self_identity.clone());
        state.established = true;
        state.epoch = 0;
        Ok(())
    }

    fn reset(&mut self) {
        self.record(SessionCall::Reset);

        let mut state = self.state.lock();
        state.version = DISABLED_PROTOCOL_VERSION;
        state.established = false;
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.state.lock().version
    }

    fn key_ratchet(&self, identity: &Identity) -> Option<KeyRatchet> {
        let state = self.state.lock();
        ratchet_for(&state, identity)
    }

    fn key_package(&mut self) -> Result<Vec<u8>, MembershipError> {
        self.record(SessionCall::KeyPackage);

        let mut state = self.state.lock();
        let Some(identity) = state.self_identity.clone() else {
            return Err(MembershipError::NotInitialized);
        };

        state.key_packages_issued += 1;
        Ok(format!("key-package/{identity}/{}", state.key_packages_issued).into_bytes())
    }

    fn set_external_sender(&mut self, package: &[u8]) -> Result<(), MembershipError> {
        self.record(SessionCall::SetExternalSender(package.to_vec()));
        Ok(())
    }

    fn process_proposals(
        &mut self,
        _proposals: &[u8],
        known_identities: &[Identity],
    ) -> Result<Option<Vec<u8>>, MembershipError> {
        self.record(SessionCall::ProcessProposals { known: known_identities.to_vec() });
        self.state.lock().proposal_replies.pop_front().unwrap_or(Ok(None))
    }

    fn process_welcome(
        &mut self,
        _welcome: &[u8],
        known_identities: &[Identity],
    ) -> Result<WelcomeOutcome, MembershipError> {
        self.record(SessionCall::ProcessWelcome { known: known_identities.to_vec() });

        let mut state = self.state.lock();
        let outcome = state
            .welcome_outcomes
            .pop_front()
            .unwrap_or_else(|| Ok(WelcomeOutcome { members: known_identities.to_vec() }));

        if outcome.is_ok() {
            state.established = true;
            state.epoch += 1;
        }
        outcome
    }

    fn process_commit(&mut self, commit: &[u8]) -> Result<CommitOutcome, MembershipError> {
        self.record(SessionCall::ProcessCommit(commit.to_vec()));

        let mut state = self.state.lock();
        let outcome = state.commit_outcomes.pop_front().unwrap_or(Ok(CommitOutcome::Applied));

        if matches!(outcome, Ok(CommitOutcome::Applied)) {
            state.epoch += 1;
        }
        outcome
    }
}
