//! MLS membership session.
//!
//! One `OpenMLS` group per call. The local participant creates a pending
//! group when the external sender is announced, commits proposals relayed by
//! that sender, and joins existing groups through welcomes. Frame key
//! ratchets are exported from the established group's key schedule.
//!
//! # Invariants
//!
//! - Ratchets are only available once a commit has been merged or a welcome
//!   accepted. A pending group never yields key material.
//! - A commit this session produced is merged only when signaling echoes it
//!   back, so competing commits from other members can win.
//! - Welcomes and proposals that name participants outside the call are
//!   rejected without changing group state.

use dave_core::{
    CommitOutcome, Identity, MembershipError, MembershipSession, WelcomeOutcome, env::Environment,
};
use dave_crypto::KeyRatchet;
use openmls::prelude::*;
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::OpenMlsProvider;
use tls_codec::{Deserialize as _, Serialize as _};

use crate::{
    envelope::{self, CommitWelcome, ProposalsEnvelope},
    provider::MlsProvider,
};

/// Ciphersuite used for every call group.
pub const CIPHERSUITE: Ciphersuite = Ciphersuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

/// Exporter label for per-participant frame ratchet secrets.
pub const RATCHET_EXPORT_LABEL: &str = "DAVE frame ratchet";

const RATCHET_SECRET_LEN: usize = 32;

/// Keys and credential of the local participant, created by `initialize`.
struct LocalMember {
    identity: Identity,
    group_id: dave_core::GroupId,
    signer: SignatureKeyPair,
    credential: CredentialWithKey,
}

/// An `OpenMLS` group and the provider holding its state.
///
/// Each group owns its storage so a pending group never collides with the
/// group a welcome creates under the same group id.
struct CallGroup<E: Environment> {
    provider: MlsProvider<E>,
    mls: openmls::group::MlsGroup,
}

/// [`MembershipSession`] backed by `OpenMLS`.
pub struct MlsSession<E: Environment> {
    env: E,
    /// Holds private keys of published key packages until a welcome arrives
    join_provider: MlsProvider<E>,
    version: dave_core::ProtocolVersion,
    local: Option<LocalMember>,
    group: Option<CallGroup<E>>,
    established: bool,
    pending_commit: Option<Vec<u8>>,
}

impl<E: Environment> MlsSession<E> {
    /// Session with no group. Call `initialize` before use.
    pub fn new(env: E) -> Self {
        let join_provider = MlsProvider::new(env.clone());
        Self {
            env,
            join_provider,
            version: dave_core::DISABLED_PROTOCOL_VERSION,
            local: None,
            group: None,
            established: false,
            pending_commit: None,
        }
    }

    /// MLS epoch of the current group, `None` without a group.
    pub fn epoch(&self) -> Option<u64> {
        self.group.as_ref().map(|g| g.mls.epoch().as_u64())
    }

    /// True once a commit was merged or a welcome accepted.
    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Identities of the current group's members, in leaf order.
    pub fn members(&self) -> Vec<Identity> {
        self.group.as_ref().map(|g| member_identities(&g.mls)).unwrap_or_default()
    }

    fn local(&self) -> Result<&LocalMember, MembershipError> {
        self.local.as_ref().ok_or(MembershipError::NotInitialized)
    }

    fn mls_group_id(&self) -> Result<GroupId, MembershipError> {
        Ok(GroupId::from_slice(&self.local()?.group_id.to_be_bytes()))
    }

    fn create_pending_group(&mut self, sender: ExternalSender) -> Result<(), MembershipError> {
        let group_id = self.mls_group_id()?;
        let local = self.local()?;
        let provider = MlsProvider::new(self.env.clone());

        let mls = openmls::group::MlsGroup::builder()
            .with_group_id(group_id)
            .ciphersuite(CIPHERSUITE)
            .use_ratchet_tree_extension(true)
            .with_group_context_extensions(Extensions::single(Extension::ExternalSenders(vec![
                sender,
            ])))
            .map_err(|e| MembershipError::Crypto(format!("failed to set group extensions: {e}")))?
            .build(&provider, &local.signer, local.credential.clone())
            .map_err(|e| MembershipError::Crypto(format!("failed to create group: {e}")))?;

        tracing::debug!(identity = %local.identity, "created pending group");
        self.group = Some(CallGroup { provider, mls });
        self.established = false;
        self.pending_commit = None;
        Ok(())
    }

    /// Run one relayed proposal through the group and queue it.
    fn queue_proposal(
        &mut self,
        message: &[u8],
        known_identities: &[Identity],
    ) -> Result<(), MembershipError> {
        let group = self.group.as_mut().ok_or(MembershipError::NotInitialized)?;

        let message = MlsMessageIn::tls_deserialize_exact(message)
            .map_err(|e| MembershipError::Malformed(format!("proposal: {e}")))?;
        let protocol_message: ProtocolMessage = message
            .try_into()
            .map_err(|e| MembershipError::Malformed(format!("proposal is not a handshake: {e:?}")))?;

        let processed = group
            .mls
            .process_message(&group.provider, protocol_message)
            .map_err(|e| MembershipError::Rejected(format!("proposal: {e}")))?;

        let ProcessedMessageContent::ProposalMessage(queued) = processed.into_content() else {
            return Err(MembershipError::Rejected("expected a proposal".into()));
        };

        if let Proposal::Add(add) = queued.proposal() {
            let identity = identity_of(add.key_package().leaf_node().credential());
            if !known_identities.contains(&identity) {
                return Err(MembershipError::UnknownIdentity(identity));
            }
        }

        group
            .mls
            .store_pending_proposal(group.provider.storage(), *queued)
            .map_err(|e| MembershipError::Storage(format!("failed to queue proposal: {e}")))
    }

    fn discard_pending_proposals(&mut self) {
        if let Some(group) = self.group.as_mut()
            && let Err(e) = group.mls.clear_pending_proposals(group.provider.storage())
        {
            tracing::warn!(error = %e, "failed to clear pending proposals");
        }
    }

    fn discard_pending_commit(&mut self) {
        self.pending_commit = None;
        if let Some(group) = self.group.as_mut()
            && let Err(e) = group.mls.clear_pending_commit(group.provider.storage())
        {
            tracing::warn!(error = %e, "failed to clear pending commit");
        }
    }

    /// Join from a welcome using the key package store, which is consumed.
    fn join(
        &mut self,
        welcome: Welcome,
        known_identities: &[Identity],
    ) -> Result<WelcomeOutcome, MembershipError> {
        let provider =
            std::mem::replace(&mut self.join_provider, MlsProvider::new(self.env.clone()));

        let join_config = MlsGroupJoinConfig::builder().use_ratchet_tree_extension(true).build();
        let mls = StagedWelcome::new_from_welcome(&provider, &join_config, welcome, None)
            .map_err(|e| MembershipError::Rejected(format!("welcome: {e}")))?
            .into_group(&provider)
            .map_err(|e| MembershipError::Rejected(format!("welcome: {e}")))?;

        if mls.group_id() != &self.mls_group_id()? {
            return Err(MembershipError::Rejected("welcome for another group".into()));
        }

        let members = member_identities(&mls);
        if let Some(stranger) = members.iter().find(|m| !known_identities.contains(m)) {
            return Err(MembershipError::UnknownIdentity(stranger.clone()));
        }

        tracing::debug!(epoch = mls.epoch().as_u64(), members = members.len(), "joined group");
        self.group = Some(CallGroup { provider, mls });
        self.established = true;
        self.pending_commit = None;
        Ok(WelcomeOutcome { members })
    }
}

impl<E: Environment> MembershipSession for MlsSession<E> {
    fn initialize(
        &mut self,
        version: dave_core::ProtocolVersion,
        group_id: dave_core::GroupId,
        self_identity: &Identity,
    ) -> Result<(), MembershipError> {
        if version == dave_core::DISABLED_PROTOCOL_VERSION {
            return Err(MembershipError::UnsupportedVersion(version));
        }

        self.reset();

        let signer = SignatureKeyPair::new(CIPHERSUITE.signature_algorithm())
            .map_err(|e| MembershipError::Crypto(format!("failed to generate keypair: {e}")))?;
        let credential = BasicCredential::new(self_identity.as_bytes().to_vec());
        let credential = CredentialWithKey {
            credential: credential.into(),
            signature_key: signer.public().into(),
        };

        self.local = Some(LocalMember {
            identity: self_identity.clone(),
            group_id,
            signer,
            credential,
        });
        self.version = version;

        tracing::debug!(version, group_id, identity = %self_identity, "membership session initialized");
        Ok(())
    }

    fn reset(&mut self) {
        if self.local.is_some() {
            tracing::debug!("membership session reset");
        }
        self.join_provider = MlsProvider::new(self.env.clone());
        self.version = dave_core::DISABLED_PROTOCOL_VERSION;
        self.local = None;
        self.group = None;
        self.established = false;
        self.pending_commit = None;
    }

    fn protocol_version(&self) -> dave_core::ProtocolVersion {
        self.version
    }

    fn key_ratchet(&self, identity: &Identity) -> Option<KeyRatchet> {
        if !self.established {
            return None;
        }
        let group = self.group.as_ref()?;
        if !member_identities(&group.mls).contains(identity) {
            return None;
        }

        match group.mls.export_secret(
            group.provider.crypto(),
            RATCHET_EXPORT_LABEL,
            identity.as_bytes(),
            RATCHET_SECRET_LEN,
        ) {
            Ok(secret) => Some(KeyRatchet::from_secret(&secret)),
            Err(e) => {
                tracing::warn!(%identity, error = %e, "failed to export ratchet secret");
                None
            },
        }
    }

    fn key_package(&mut self) -> Result<Vec<u8>, MembershipError> {
        let local = self.local()?;

        let bundle = KeyPackage::builder()
            .build(CIPHERSUITE, &self.join_provider, &local.signer, local.credential.clone())
            .map_err(|e| MembershipError::Crypto(format!("failed to build key package: {e}")))?;

        bundle
            .key_package()
            .tls_serialize_detached()
            .map_err(|e| MembershipError::Malformed(format!("key package: {e}")))
    }

    fn set_external_sender(&mut self, package: &[u8]) -> Result<(), MembershipError> {
        self.local()?;

        let sender = ExternalSender::tls_deserialize_exact(package)
            .map_err(|e| MembershipError::Malformed(format!("external sender: {e}")))?;

        if self.group.is_some() {
            tracing::debug!("external sender already set, keeping current group");
            return Ok(());
        }

        self.create_pending_group(sender)
    }

    fn process_proposals(
        &mut self,
        proposals: &[u8],
        known_identities: &[Identity],
    ) -> Result<Option<Vec<u8>>, MembershipError> {
        self.local()?;
        if self.group.is_none() {
            return Err(MembershipError::NotInitialized);
        }

        let batch: ProposalsEnvelope = envelope::decode(proposals)?;
        if batch.messages.is_empty() {
            return Ok(None);
        }

        for message in &batch.messages {
            if let Err(e) = self.queue_proposal(message, known_identities) {
                self.discard_pending_proposals();
                return Err(e);
            }
        }

        let local = self.local.as_ref().ok_or(MembershipError::NotInitialized)?;
        let group = self.group.as_mut().ok_or(MembershipError::NotInitialized)?;
        let (commit, welcome, _group_info) = group
            .mls
            .commit_to_pending_proposals(&group.provider, &local.signer)
            .map_err(|e| MembershipError::Rejected(format!("failed to commit proposals: {e}")))?;

        let commit = commit
            .tls_serialize_detached()
            .map_err(|e| MembershipError::Malformed(format!("commit: {e}")))?;
        let welcome = welcome
            .map(|w| w.tls_serialize_detached())
            .transpose()
            .map_err(|e| MembershipError::Malformed(format!("welcome: {e}")))?;

        tracing::debug!(
            proposals = batch.messages.len(),
            with_welcome = welcome.is_some(),
            "committed pending proposals"
        );

        self.pending_commit = Some(commit.clone());
        envelope::encode(&CommitWelcome { commit, welcome }).map(Some)
    }

    fn process_welcome(
        &mut self,
        welcome: &[u8],
        known_identities: &[Identity],
    ) -> Result<WelcomeOutcome, MembershipError> {
        self.local()?;
        if self.established {
            return Err(MembershipError::Rejected("already a member of the group".into()));
        }

        let message = MlsMessageIn::tls_deserialize_exact(welcome)
            .map_err(|e| MembershipError::Malformed(format!("welcome: {e}")))?;
        let MlsMessageBodyIn::Welcome(welcome) = message.extract() else {
            return Err(MembershipError::Malformed("message is not a welcome".into()));
        };

        self.join(welcome, known_identities)
    }

    fn process_commit(&mut self, commit: &[u8]) -> Result<CommitOutcome, MembershipError> {
        self.local()?;

        if self.pending_commit.as_deref() == Some(commit) {
            let group = self.group.as_mut().ok_or(MembershipError::NotInitialized)?;
            group
                .mls
                .merge_pending_commit(&group.provider)
                .map_err(|e| MembershipError::Rejected(format!("merge own commit: {e}")))?;
            self.pending_commit = None;
            self.established = true;
            tracing::debug!(epoch = group.mls.epoch().as_u64(), "merged own commit");
            return Ok(CommitOutcome::Applied);
        }

        let message = MlsMessageIn::tls_deserialize_exact(commit)
            .map_err(|e| MembershipError::Malformed(format!("commit: {e}")))?;
        let protocol_message: ProtocolMessage = message
            .try_into()
            .map_err(|e| MembershipError::Malformed(format!("commit is not a handshake: {e:?}")))?;

        // Another member's commit won; ours will never be merged.
        self.discard_pending_commit();

        if !self.established {
            return Ok(CommitOutcome::Ignored);
        }
        let Some(group) = self.group.as_mut() else {
            return Ok(CommitOutcome::Ignored);
        };
        if protocol_message.group_id() != group.mls.group_id()
            || protocol_message.epoch().as_u64() < group.mls.epoch().as_u64()
        {
            return Ok(CommitOutcome::Ignored);
        }

        let processed = match group.mls.process_message(&group.provider, protocol_message) {
            Ok(processed) => processed,
            Err(e) => return Ok(CommitOutcome::Failed { reason: e.to_string() }),
        };

        let ProcessedMessageContent::StagedCommitMessage(staged) = processed.into_content() else {
            return Ok(CommitOutcome::Failed { reason: "message is not a commit".into() });
        };

        if let Err(e) = group.mls.merge_staged_commit(&group.provider, *staged) {
            return Ok(CommitOutcome::Failed { reason: e.to_string() });
        }

        tracing::debug!(epoch = group.mls.epoch().as_u64(), "merged commit");
        Ok(CommitOutcome::Applied)
    }
}

fn identity_of(credential: &Credential) -> Identity {
    Identity::new(String::from_utf8_lossy(credential.serialized_content()).into_owned())
}

fn member_identities(group: &openmls::group::MlsGroup) -> Vec<Identity> {
    group.members().map(|m| identity_of(&m.credential)).collect()
}
