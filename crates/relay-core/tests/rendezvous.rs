//! End-to-end rendezvous scenarios over in-memory transports.

use relay_core::transport::{CloseLog, FrameReader, FrameWriter, MemoryTransport};
use relay_core::{
    AccessToken, CloseReason, CoordinatorConfig, PumpEnd, RelayCoordinator, RelayError,
    RelayRequest, RelaySession, Role, SessionId, SessionRegistry, Transport,
};
use std::sync::Arc;
use std::time::Duration;

struct Client {
    rx: Box<dyn FrameReader>,
    tx: Box<dyn FrameWriter>,
}

fn connect() -> (Box<dyn Transport>, Client, CloseLog) {
    let (server_end, client_end) = MemoryTransport::pair();
    let log = server_end.close_log();
    let (rx, tx) = Box::new(client_end).split();
    (Box::new(server_end), Client { rx, tx }, log)
}

fn coordinator() -> Arc<RelayCoordinator> {
    Arc::new(RelayCoordinator::new(CoordinatorConfig::default()))
}

fn spawn_handler(
    coordinator: &Arc<RelayCoordinator>,
    request: RelayRequest,
    transport: Box<dyn Transport>,
) -> tokio::task::JoinHandle<relay_core::RelayResult<relay_core::ConnectionOutcome>> {
    let coordinator = coordinator.clone();
    tokio::spawn(async move { coordinator.handle_connection(request, transport).await })
}

/// Yield until the initiator of `id` has claimed its role.
async fn initiator_arrived(coordinator: &RelayCoordinator, id: SessionId) {
    loop {
        if let Some(session) = coordinator.registry().try_get(id).await {
            if session.summary().await.initiator_assigned {
                return;
            }
        }
        tokio::task::yield_now().await;
    }
}

fn req(id: SessionId, token: &str, role: Role, ms: u64) -> RelayRequest {
    RelayRequest::new(id, token, Some(role), Duration::from_millis(ms))
}

#[tokio::test]
async fn normal_session_relays_hello() {
    let coordinator = coordinator();
    let id = SessionId::new_random();
    let (a, mut alice, _) = connect();
    let (b, mut bob, _) = connect();

    let initiator = spawn_handler(&coordinator, req(id, "secret", Role::Initiator, 2_000), a);
    let responder = spawn_handler(&coordinator, req(id, "secret", Role::Responder, 2_000), b);

    alice.tx.send(b"hello").await.unwrap();
    assert_eq!(bob.rx.receive().await.unwrap().unwrap(), b"hello");
    bob.tx.send(b"hi back").await.unwrap();
    assert_eq!(alice.rx.receive().await.unwrap().unwrap(), b"hi back");

    bob.tx.close(CloseReason::SessionEnded).await.unwrap();

    let initiator = initiator.await.unwrap().unwrap();
    let responder = responder.await.unwrap().unwrap();
    assert_eq!(initiator.role, Role::Initiator);
    assert_eq!(responder.role, Role::Responder);

    let report = initiator.report.expect("pump ran");
    assert_eq!(report.end, PumpEnd::Closed(relay_core::Direction::ResponderToInitiator));
    assert_eq!(report.initiator_to_responder.bytes, 5);
    assert_eq!(report.responder_to_initiator.bytes, 7);
    assert_eq!(coordinator.registry().count().await, 0);

    // Alice sees the relay close her side.
    assert!(alice.rx.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn token_mismatch_leaves_first_caller_waiting() {
    let coordinator = coordinator();
    let id = SessionId::new_random();
    let (a, _alice, _) = connect();
    let (b, _bob, bob_log) = connect();

    let initiator = spawn_handler(&coordinator, req(id, "secret", Role::Initiator, 300), a);
    initiator_arrived(&coordinator, id).await;

    let rejected = coordinator
        .handle_connection(req(id, "wrong", Role::Responder, 300), b)
        .await;
    assert!(matches!(rejected, Err(RelayError::TokenMismatch)));
    assert!(matches!(
        bob_log.reasons().await.as_slice(),
        [CloseReason::Rejected(_)]
    ));
    assert!(coordinator.registry().try_get(id).await.is_some());

    assert!(matches!(
        initiator.await.unwrap(),
        Err(RelayError::HandshakeTimeout)
    ));
}

#[tokio::test]
async fn rightful_responder_still_joins_after_token_mismatch() {
    let coordinator = coordinator();
    let id = SessionId::new_random();
    let (a, mut alice, _) = connect();
    let (m, _mallory, mallory_log) = connect();
    let (b, mut bob, _) = connect();

    let initiator = spawn_handler(&coordinator, req(id, "secret", Role::Initiator, 2_000), a);
    initiator_arrived(&coordinator, id).await;

    let rejected = coordinator
        .handle_connection(req(id, "wrong", Role::Responder, 2_000), m)
        .await;
    assert!(matches!(rejected, Err(RelayError::TokenMismatch)));
    assert_eq!(mallory_log.count().await, 1);

    let responder = spawn_handler(&coordinator, req(id, "secret", Role::Responder, 2_000), b);
    alice.tx.send(b"hello").await.unwrap();
    assert_eq!(bob.rx.receive().await.unwrap().unwrap(), b"hello");
    alice.tx.close(CloseReason::SessionEnded).await.unwrap();

    let initiator = initiator.await.unwrap().unwrap();
    let responder = responder.await.unwrap().unwrap();
    assert_eq!(responder.role, Role::Responder);
    assert_eq!(initiator.report, responder.report);
    assert_eq!(
        initiator.report.map(|r| r.initiator_to_responder.bytes),
        Some(5)
    );
    assert!(alice.rx.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn second_initiator_gets_role_conflict() {
    let coordinator = coordinator();
    let id = SessionId::new_random();
    let (a, _alice, _) = connect();
    let (c, _carol, carol_log) = connect();

    let first = spawn_handler(&coordinator, req(id, "secret", Role::Initiator, 300), a);
    initiator_arrived(&coordinator, id).await;

    let second = coordinator
        .handle_connection(req(id, "secret", Role::Initiator, 300), c)
        .await;
    assert!(matches!(
        second,
        Err(RelayError::RoleConflict(Role::Initiator))
    ));
    assert_eq!(carol_log.count().await, 1);

    // The first initiator is undisturbed until its own deadline.
    assert!(matches!(first.await.unwrap(), Err(RelayError::HandshakeTimeout)));
}

#[tokio::test]
async fn lone_caller_times_out_and_session_is_removed() {
    let coordinator = coordinator();
    let id = SessionId::new_random();
    let (a, mut alice, log) = connect();

    let started = tokio::time::Instant::now();
    let result = coordinator
        .handle_connection(req(id, "secret", Role::Initiator, 200), a)
        .await;
    assert!(matches!(result, Err(RelayError::HandshakeTimeout)));
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(coordinator.registry().try_get(id).await.is_none());
    assert!(matches!(log.reasons().await.as_slice(), [CloseReason::TryAgain(_)]));
    assert!(alice.rx.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn large_and_empty_frames_cross_intact() {
    let coordinator = coordinator();
    let id = SessionId::new_random();
    let (a, mut alice, _) = connect();
    let (b, mut bob, _) = connect();

    let initiator = spawn_handler(&coordinator, req(id, "t", Role::Initiator, 2_000), a);
    let responder = spawn_handler(&coordinator, req(id, "t", Role::Responder, 2_000), b);

    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    alice.tx.send(&[]).await.unwrap();
    alice.tx.send(&big).await.unwrap();
    alice.tx.send(b"tail").await.unwrap();

    assert_eq!(bob.rx.receive().await.unwrap().unwrap(), big);
    assert_eq!(bob.rx.receive().await.unwrap().unwrap(), b"tail");

    alice.tx.close(CloseReason::SessionEnded).await.unwrap();
    let report = initiator.await.unwrap().unwrap().report.unwrap();
    assert_eq!(report.initiator_to_responder.frames, 2);
    responder.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_get_or_create_yields_one_session() {
    let registry = Arc::new(SessionRegistry::new());
    let id = SessionId::new_random();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry
                .get_or_create(id, || RelaySession::new(id, AccessToken::new("t")))
                .await
                .unwrap()
        }));
    }

    let mut sessions = Vec::new();
    let mut created = 0;
    for h in handles {
        let (session, was_created) = h.await.unwrap();
        if was_created {
            created += 1;
        }
        sessions.push(session);
    }
    assert_eq!(created, 1);
    assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn disposal_during_relay_cancels_the_pump() {
    let coordinator = coordinator();
    let id = SessionId::new_random();
    let (a, mut alice, alice_log) = connect();
    let (b, mut bob, bob_log) = connect();

    let initiator = spawn_handler(&coordinator, req(id, "t", Role::Initiator, 2_000), a);
    let responder = spawn_handler(&coordinator, req(id, "t", Role::Responder, 2_000), b);

    alice.tx.send(b"x").await.unwrap();
    assert_eq!(bob.rx.receive().await.unwrap().unwrap(), b"x");

    coordinator.shutdown().await;

    let report = initiator.await.unwrap().unwrap().report.unwrap();
    assert_eq!(report.end, PumpEnd::Cancelled);
    assert_eq!(responder.await.unwrap().unwrap().report, Some(report));
    assert_eq!(alice_log.count().await, 1);
    assert_eq!(bob_log.count().await, 1);
    assert!(alice.rx.receive().await.unwrap().is_none());
}
