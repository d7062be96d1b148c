//! Property-based tests for transition coordination
//!
//! Cipher bindings are checked by behavior: a binding "holds the session's
//! ratchet for X" when frames sealed under that ratchet open through it (or
//! frames it seals open under that ratchet).

use std::time::Instant;

use dave_core::{
    CommitOutcome, CoordinatorPhase, DaveCiphers, Identity, MembershipSession, SessionAction,
    TransitionCoordinator,
    test_utils::{MockEnv, ScriptedSession, SessionCall},
};
use dave_crypto::{DecryptError, Decryptor, DecryptorConfig, Encryptor, MediaType};
use proptest::prelude::*;

type Coordinator = TransitionCoordinator<ScriptedSession, DaveCiphers<MockEnv>>;

const GROUP_ID: u64 = 0xDA7E;

fn me() -> Identity {
    Identity::from("me")
}

fn coordinator() -> (Coordinator, ScriptedSession) {
    let session = ScriptedSession::new();
    let ciphers = DaveCiphers::new(MockEnv::default(), DecryptorConfig::default());
    (TransitionCoordinator::new(session.clone(), ciphers, me(), GROUP_ID), session)
}

/// Frame sealed under the ratchet the session currently derives for `identity`.
fn sealed_by(session: &ScriptedSession, identity: &Identity, plaintext: &[u8]) -> Vec<u8> {
    let mut encryptor = Encryptor::new();
    encryptor.set_key_ratchet(session.expected_ratchet(identity));
    encryptor.set_passthrough_mode(false);
    encryptor.encrypt(1, plaintext, MediaType::Audio).unwrap()
}

/// Opens `frame` under the ratchet the session currently derives for `identity`.
fn opens_under(session: &ScriptedSession, identity: &Identity, frame: &[u8]) -> Option<Vec<u8>> {
    let mut decryptor = Decryptor::new(DecryptorConfig::default());
    decryptor.transition_to_key_ratchet(session.expected_ratchet(identity), Instant::now());
    decryptor.decrypt(frame, MediaType::Audio, Instant::now()).ok()
}

#[derive(Debug, Clone)]
enum Op {
    Select(u16),
    Prepare(u16, u16),
    Execute(u16),
    AddPeer(u8),
    RemovePeer(u8),
    Commit(u16, u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u16..3).prop_map(Op::Select),
        (0u16..6, 0u16..3).prop_map(|(id, v)| Op::Prepare(id, v)),
        (0u16..6).prop_map(Op::Execute),
        (0u8..4).prop_map(Op::AddPeer),
        (0u8..4).prop_map(Op::RemovePeer),
        (0u16..6, 0u8..3).prop_map(|(id, outcome)| Op::Commit(id, outcome)),
    ]
}

fn peer(n: u8) -> Identity {
    Identity::new(format!("peer-{n}"))
}

fn apply(coordinator: &mut Coordinator, session: &ScriptedSession, op: &Op) {
    match *op {
        Op::Select(version) => {
            let _ = coordinator.select_protocol(version);
        },
        Op::Prepare(id, version) => {
            coordinator.prepare_transition(id, version);
        },
        Op::Execute(id) => coordinator.execute_transition(id),
        Op::AddPeer(n) => coordinator.add_peer(peer(n)),
        Op::RemovePeer(n) => coordinator.remove_peer(&peer(n)),
        Op::Commit(id, outcome) => {
            let outcome = match outcome {
                0 => CommitOutcome::Applied,
                1 => CommitOutcome::Ignored,
                _ => CommitOutcome::Failed { reason: "scripted".into() },
            };
            session.script_commit(Ok(outcome));
            coordinator.prepare_commit_transition(id, b"commit");
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_prepare_execute_binds_self_to_session_ratchet(
        version in 1u16..=u16::MAX,
        transition_id in 1u16..=u16::MAX,
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let (mut coordinator, session) = coordinator();
        coordinator.select_protocol(version).unwrap();

        coordinator.prepare_transition(transition_id, version);
        coordinator.execute_transition(transition_id);

        prop_assert_eq!(coordinator.pending_version(transition_id), None);
        prop_assert!(!coordinator.router().is_encryptor_passthrough());

        let frame = coordinator.router().encrypt(7, &plaintext, MediaType::Audio).unwrap();
        prop_assert_eq!(opens_under(&session, &me(), &frame), Some(plaintext));
    }

    #[test]
    fn prop_second_execute_has_no_effect(
        version in 0u16..4,
        transition_id in 1u16..100,
    ) {
        let (mut coordinator, session) = coordinator();
        coordinator.select_protocol(1).unwrap();
        coordinator.prepare_transition(transition_id, version);
        coordinator.execute_transition(transition_id);

        let phase = coordinator.phase();
        let self_version = coordinator.self_version();
        let calls = session.calls().len();
        let passthrough = coordinator.router().is_encryptor_passthrough();

        coordinator.execute_transition(transition_id);

        prop_assert_eq!(coordinator.phase(), phase);
        prop_assert_eq!(coordinator.self_version(), self_version);
        prop_assert_eq!(session.calls().len(), calls);
        prop_assert_eq!(coordinator.router().is_encryptor_passthrough(), passthrough);
    }

    #[test]
    fn prop_init_transition_never_pending(ops in prop::collection::vec(op(), 0..40)) {
        let (mut coordinator, session) = coordinator();

        for op in &ops {
            apply(&mut coordinator, &session, op);
            prop_assert_eq!(coordinator.pending_version(0), None);
        }
    }

    #[test]
    fn prop_init_transition_binds_self_immediately(version in 0u16..4) {
        let (mut coordinator, _session) = coordinator();
        coordinator.select_protocol(1).unwrap();

        let actions = coordinator.prepare_transition(0, version);

        prop_assert!(actions.is_empty());
        prop_assert_eq!(coordinator.self_version(), version);
        prop_assert_eq!(coordinator.router().is_encryptor_passthrough(), version == 0);
        prop_assert!(coordinator.pending_transitions().is_empty());
    }

    #[test]
    fn prop_late_joiner_inherits_prepared_version(
        version in 1u16..50,
        transition_id in 1u16..=u16::MAX,
        plaintext in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let (mut coordinator, session) = coordinator();
        coordinator.select_protocol(version).unwrap();
        coordinator.prepare_transition(0, 0);

        coordinator.prepare_transition(transition_id, version);
        prop_assert_eq!(coordinator.last_prepared_version(), version);

        let alice = Identity::from("alice");
        coordinator.add_peer(alice.clone());

        let frame = sealed_by(&session, &alice, &plaintext);
        let opened = coordinator.router().decrypt(&alice, &frame, MediaType::Audio);
        prop_assert_eq!(opened, Some(Ok(plaintext)));
    }

    #[test]
    fn prop_removed_peer_yields_no_result(
        data in prop::collection::vec(any::<u8>(), 0..256),
        encrypted in any::<bool>(),
    ) {
        let (mut coordinator, _session) = coordinator();
        let bob = Identity::from("bob");
        if encrypted {
            coordinator.select_protocol(1).unwrap();
        }
        coordinator.add_peer(bob.clone());
        coordinator.remove_peer(&bob);

        prop_assert!(coordinator.router().decrypt(&bob, &data, MediaType::Video).is_none());
    }

    #[test]
    fn prop_failed_commit_notifies_once_and_reselects_once(
        version in 1u16..10,
        transition_id in 1u16..100,
        via_error in any::<bool>(),
    ) {
        let (mut coordinator, session) = coordinator();
        coordinator.select_protocol(version).unwrap();
        let initializes_before = session
            .count_calls(|c| matches!(c, SessionCall::Initialize { .. }));

        if via_error {
            session.script_commit(Err(dave_core::MembershipError::Malformed("truncated".into())));
        } else {
            session.script_commit(Ok(CommitOutcome::Failed { reason: "epoch".into() }));
        }
        let actions = coordinator.prepare_commit_transition(transition_id, b"commit");

        let invalid = actions
            .iter()
            .filter(|a| **a == SessionAction::InvalidCommitWelcome(transition_id))
            .count();
        prop_assert_eq!(invalid, 1);

        let reselected = session.count_calls(|c| {
            matches!(c, SessionCall::Initialize { version: v, .. } if *v == version)
        }) - initializes_before;
        prop_assert_eq!(reselected, 1);
        prop_assert_eq!(coordinator.pending_version(transition_id), None);
    }

    #[test]
    fn prop_ignored_commit_is_silent(
        version in 1u16..10,
        transition_id in 1u16..100,
    ) {
        let (mut coordinator, session) = coordinator();
        coordinator.select_protocol(version).unwrap();
        let calls_before = session.calls().len();
        session.script_commit(Ok(CommitOutcome::Ignored));

        let actions = coordinator.prepare_commit_transition(transition_id, b"commit");

        prop_assert!(actions.is_empty());
        prop_assert_eq!(coordinator.pending_version(transition_id), None);
        // only the commit itself was submitted
        prop_assert_eq!(session.calls().len(), calls_before + 1);
    }
}

#[test]
fn scenario_unencrypted_call_then_encrypted_group() {
    let (mut coordinator, session) = coordinator();

    let actions = coordinator.select_protocol(0).unwrap();
    assert!(actions.is_empty());
    assert!(coordinator.router().peers().is_empty());
    assert!(coordinator.router().is_encryptor_passthrough());
    assert!(coordinator.pending_transitions().is_empty());

    let alice = Identity::from("alice");
    coordinator.add_peer(alice.clone());
    let opened = coordinator.router().decrypt(&alice, b"plain audio", MediaType::Audio);
    assert_eq!(opened, Some(Ok(b"plain audio".to_vec())));

    let actions = coordinator.select_protocol(7).unwrap();
    assert_eq!(session.calls()[0], SessionCall::Initialize {
        version: 7,
        group_id: GROUP_ID,
        self_identity: me(),
    });
    assert_eq!(session.count_calls(|c| *c == SessionCall::KeyPackage), 1);
    assert!(matches!(actions.as_slice(), [SessionAction::SendKeyPackage(kp)] if !kp.is_empty()));
}

#[test]
fn scenario_transition_with_one_peer() {
    let (mut coordinator, session) = coordinator();
    coordinator.select_protocol(7).unwrap();
    let bob = Identity::from("bob");
    coordinator.add_peer(bob.clone());

    let actions = coordinator.prepare_transition(5, 7);

    assert_eq!(actions, vec![SessionAction::ReadyForTransition(5)]);
    assert_eq!(coordinator.pending_transitions(), vec![(5, 7)]);
    assert_eq!(coordinator.phase(), CoordinatorPhase::PendingTransition(vec![(5, 7)]));

    let from_bob = sealed_by(&session, &bob, b"bob speaks");
    assert_eq!(
        coordinator.router().decrypt(&bob, &from_bob, MediaType::Audio),
        Some(Ok(b"bob speaks".to_vec()))
    );

    // self keeps the old binding until execute
    assert!(coordinator.router().is_encryptor_passthrough());

    coordinator.execute_transition(5);

    assert!(coordinator.pending_transitions().is_empty());
    assert_eq!(coordinator.phase(), CoordinatorPhase::Active(7));
    let from_me = coordinator.router().encrypt(3, b"i speak", MediaType::Audio).unwrap();
    assert_eq!(opens_under(&session, &me(), &from_me), Some(b"i speak".to_vec()));
}

#[test]
fn scenario_disable_resets_session_before_rebinding() {
    let (mut coordinator, session) = coordinator();
    coordinator.select_protocol(1).unwrap();
    coordinator.prepare_transition(1, 1);
    coordinator.execute_transition(1);
    assert!(!coordinator.router().is_encryptor_passthrough());

    coordinator.prepare_transition(2, 0);
    coordinator.execute_transition(2);

    assert!(session.calls().ends_with(&[SessionCall::Reset]));
    assert!(coordinator.router().is_encryptor_passthrough());
    assert_eq!(coordinator.session().protocol_version(), 0);
    assert!(coordinator.session().key_ratchet(&me()).is_none());
    assert!(coordinator.session().key_ratchet(&Identity::from("bob")).is_none());

    // a later peer cannot pick up key material from the reset session
    let carol = Identity::from("carol");
    coordinator.prepare_transition(3, 1);
    coordinator.add_peer(carol.clone());
    let mut stray = Encryptor::new();
    stray.set_key_ratchet(Some(dave_crypto::KeyRatchet::from_secret(b"stale")));
    stray.set_passthrough_mode(false);
    let frame = stray.encrypt(1, b"x", MediaType::Audio).unwrap();
    assert_eq!(
        coordinator.router().decrypt(&carol, &frame, MediaType::Audio),
        Some(Err(DecryptError::MissingKeyRatchet))
    );
}
