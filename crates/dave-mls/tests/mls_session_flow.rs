//! Group lifecycle across several MLS sessions.
//!
//! A test gateway plays the external sender: it announces its key, then
//! relays add proposals for participants' key packages.

use dave_core::{
    CommitOutcome, Identity, MembershipError, MembershipSession, test_utils::MockEnv,
};
use dave_mls::{CIPHERSUITE, CommitWelcome, MlsProvider, MlsSession, ProposalsEnvelope, envelope};
use openmls::{key_packages::KeyPackageIn, prelude::*};
use openmls_basic_credential::SignatureKeyPair;
use openmls_rust_crypto::RustCrypto;
use tls_codec::{Deserialize as _, Serialize as _};

const GROUP: u64 = 0x00c0_ffee;

struct Gateway {
    signer: SignatureKeyPair,
    package: Vec<u8>,
}

impl Gateway {
    fn new() -> Self {
        let signer = SignatureKeyPair::new(CIPHERSUITE.signature_algorithm()).unwrap();
        let credential = BasicCredential::new(b"voice-gateway".to_vec());
        let sender = ExternalSender::new(signer.public().into(), credential.into());
        let package = sender.tls_serialize_detached().unwrap();
        Self { signer, package }
    }

    fn propose_add(&self, key_package: &[u8], epoch: u64) -> Vec<u8> {
        let key_package = KeyPackageIn::tls_deserialize_exact(key_package)
            .unwrap()
            .validate(&RustCrypto::default(), ProtocolVersion::Mls10)
            .unwrap();

        let proposal = ExternalProposal::new_add::<MlsProvider<MockEnv>>(
            key_package,
            GroupId::from_slice(&GROUP.to_be_bytes()),
            GroupEpoch::from(epoch),
            &self.signer,
            SenderExtensionIndex::new(0),
        )
        .unwrap();

        let batch = ProposalsEnvelope { messages: vec![proposal.tls_serialize_detached().unwrap()] };
        envelope::encode(&batch).unwrap()
    }
}

fn participant(name: &str, seed: u64, gateway: &Gateway) -> MlsSession<MockEnv> {
    let mut session = MlsSession::new(MockEnv::with_seed(seed));
    session.initialize(1, GROUP, &Identity::from(name)).unwrap();
    session.set_external_sender(&gateway.package).unwrap();
    session
}

fn ids(names: &[&str]) -> Vec<Identity> {
    names.iter().copied().map(Identity::from).collect()
}

#[test]
fn commit_and_welcome_agree_on_ratchets() {
    let gateway = Gateway::new();
    let mut alice = participant("alice", 1, &gateway);
    let mut bob = participant("bob", 2, &gateway);
    let known = ids(&["alice", "bob"]);

    let bob_package = bob.key_package().unwrap();
    let proposals = gateway.propose_add(&bob_package, 0);

    let payload = alice.process_proposals(&proposals, &known).unwrap().unwrap();
    let CommitWelcome { commit, welcome } = envelope::decode(&payload).unwrap();
    let welcome = welcome.unwrap();

    // Pending until signaling echoes the commit.
    assert!(alice.key_ratchet(&Identity::from("alice")).is_none());
    assert_eq!(alice.process_commit(&commit), Ok(CommitOutcome::Applied));
    assert!(alice.is_established());

    let joined = bob.process_welcome(&welcome, &known).unwrap();
    assert_eq!(joined.members.len(), 2);
    assert_eq!(alice.epoch(), bob.epoch());

    for name in ["alice", "bob"] {
        let id = Identity::from(name);
        let mut from_alice = alice.key_ratchet(&id).unwrap();
        let mut from_bob = bob.key_ratchet(&id).unwrap();
        assert_eq!(from_alice.get(0).unwrap().key(), from_bob.get(0).unwrap().key());
    }

    let mut alice_key = alice.key_ratchet(&Identity::from("alice")).unwrap();
    let mut bob_key = alice.key_ratchet(&Identity::from("bob")).unwrap();
    assert_ne!(alice_key.get(0).unwrap().key(), bob_key.get(0).unwrap().key());

    assert!(alice.key_ratchet(&Identity::from("carol")).is_none());
}

#[test]
fn proposal_for_stranger_is_rejected() {
    let gateway = Gateway::new();
    let mut alice = participant("alice", 1, &gateway);
    let mut mallory = participant("mallory", 3, &gateway);

    let proposals = gateway.propose_add(&mallory.key_package().unwrap(), 0);
    let result = alice.process_proposals(&proposals, &ids(&["alice", "bob"]));

    assert_eq!(result, Err(MembershipError::UnknownIdentity(Identity::from("mallory"))));
    assert!(!alice.is_established());
}

#[test]
fn welcome_naming_stranger_is_rejected() {
    let gateway = Gateway::new();
    let mut alice = participant("alice", 1, &gateway);
    let mut bob = participant("bob", 2, &gateway);

    let proposals = gateway.propose_add(&bob.key_package().unwrap(), 0);
    let payload = alice.process_proposals(&proposals, &ids(&["alice", "bob"])).unwrap().unwrap();
    let CommitWelcome { welcome, .. } = envelope::decode(&payload).unwrap();

    let result = bob.process_welcome(&welcome.unwrap(), &ids(&["bob"]));

    assert_eq!(result, Err(MembershipError::UnknownIdentity(Identity::from("alice"))));
    assert!(bob.key_ratchet(&Identity::from("bob")).is_none());
}

#[test]
fn competing_commit_is_ignored_by_pending_group() {
    let gateway = Gateway::new();
    let mut alice = participant("alice", 1, &gateway);
    let mut carol = participant("carol", 4, &gateway);
    let mut bob = participant("bob", 2, &gateway);
    let known = ids(&["alice", "bob", "carol"]);

    let bob_package = bob.key_package().unwrap();
    let proposals = gateway.propose_add(&bob_package, 0);

    alice.process_proposals(&proposals, &known).unwrap().unwrap();
    let carol_payload = carol.process_proposals(&proposals, &known).unwrap().unwrap();
    let CommitWelcome { commit: carol_commit, .. } = envelope::decode(&carol_payload).unwrap();

    assert_eq!(alice.process_commit(&carol_commit), Ok(CommitOutcome::Ignored));
    assert!(!alice.is_established());
    assert_eq!(carol.process_commit(&carol_commit), Ok(CommitOutcome::Applied));
}

#[test]
fn empty_proposal_batch_commits_nothing() {
    let gateway = Gateway::new();
    let mut alice = participant("alice", 1, &gateway);

    let empty = envelope::encode(&ProposalsEnvelope { messages: Vec::new() }).unwrap();
    assert_eq!(alice.process_proposals(&empty, &ids(&["alice"])), Ok(None));
}

#[test]
fn reset_drops_group() {
    let gateway = Gateway::new();
    let mut alice = participant("alice", 1, &gateway);
    assert_eq!(alice.epoch(), Some(0));

    alice.reset();

    assert_eq!(alice.epoch(), None);
    assert_eq!(alice.protocol_version(), 0);
    assert_eq!(alice.set_external_sender(&gateway.package), Err(MembershipError::NotInitialized));
}
