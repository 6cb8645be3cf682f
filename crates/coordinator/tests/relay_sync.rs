//! Cross-device reconciliation through the relay service.
//!
//! Two coordinator nodes with no shared bus and no media session reconcile
//! exclusively through an in-process relay-service instance on an ephemeral
//! port: membership arrives via (simulated) media events, state flows as
//! envelopes over HTTP push + poll. Runs on real time because real sockets
//! are involved.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use common::envelope::PresenceStatus;
use common::types::ParticipantId;
use coordinator::actors::{CoordinatorActor, CoordinatorActorHandle, CoordinatorMetrics};
use coordinator::config::Config;
use coordinator::engine::StateSnapshot;
use coordinator::media::MediaEvent;
use coordinator::pairing::PairingOutcome;
use coordinator::transport::relay::{spawn_relay_poll, RelayTransport};
use coordinator::transport::Transport;
use relay_service::routes::{router, AppState};
use relay_service::store::MessageStore;
use tokio_util::sync::CancellationToken;

const A: ParticipantId = ParticipantId(1);
const B: ParticipantId = ParticipantId(2);

/// Start a relay-service instance on an ephemeral port; returns its base URL.
async fn spawn_relay() -> String {
    let state = AppState::new(Arc::new(MessageStore::new(50)));
    let app = router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn relay_config(relay_url: &str) -> Config {
    Config {
        channel: "relay-test".to_string(),
        relay_url: relay_url.to_string(),
        relay_poll_interval: Duration::from_millis(100),
        relay_timeout: Duration::from_secs(2),
        relay_max_attempts: 2,
        relay_backoff_base: Duration::from_millis(50),
        relay_backoff_max: Duration::from_millis(200),
        ..Config::default()
    }
}

struct Node {
    handle: CoordinatorActorHandle,
    metrics: Arc<CoordinatorMetrics>,
}

fn spawn_node(self_id: ParticipantId, config: &Config, cancel_token: &CancellationToken) -> Node {
    let metrics = CoordinatorMetrics::new();
    let relay = RelayTransport::new(config).unwrap();
    let transports: Vec<Arc<dyn Transport>> = vec![Arc::new(relay)];

    let (handle, _task) = CoordinatorActor::spawn(
        self_id,
        config.clone(),
        transports,
        None,
        None,
        None,
        Arc::clone(&metrics),
        cancel_token.child_token(),
    );
    spawn_relay_poll(config, self_id, handle.clone(), handle.child_token()).unwrap();

    Node { handle, metrics }
}

/// Poll `get_state` until `predicate` holds, up to ~10 seconds of real time.
async fn wait_for_state<F>(handle: &CoordinatorActorHandle, predicate: F) -> StateSnapshot
where
    F: Fn(&StateSnapshot) -> bool,
{
    let mut last = handle.get_state().await.unwrap();
    for _ in 0..400 {
        if predicate(&last) {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        last = handle.get_state().await.unwrap();
    }
    panic!("state predicate never satisfied; last snapshot: {last:?}");
}

#[tokio::test]
async fn test_two_devices_reconcile_through_the_relay() {
    let relay_url = spawn_relay().await;
    let config = relay_config(&relay_url);
    let cancel_token = CancellationToken::new();

    let node_a = spawn_node(A, &config, &cancel_token);
    let node_b = spawn_node(B, &config, &cancel_token);

    node_a.handle.connect().await.unwrap();
    node_b.handle.connect().await.unwrap();

    // Membership comes from the media session; the relay only carries state.
    node_a
        .handle
        .media_event(MediaEvent::ParticipantJoined(B))
        .await
        .unwrap();
    node_b
        .handle
        .media_event(MediaEvent::ParticipantJoined(A))
        .await
        .unwrap();

    wait_for_state(&node_a.handle, |s| s.stats.total_participants == 2).await;
    wait_for_state(&node_b.handle, |s| s.stats.total_participants == 2).await;

    // B pairs with A; the start envelope reaches A only via relay polling.
    let outcome = node_b.handle.request_pairing(None).await.unwrap();
    let PairingOutcome::Paired(conversation) = outcome else {
        panic!("expected Paired, got {outcome:?}");
    };
    assert_eq!(conversation.participant_low, A);
    assert_eq!(conversation.participant_high, B);

    let state_a = wait_for_state(&node_a.handle, |s| s.partner == Some(B)).await;
    assert_eq!(state_a.status, Some(PresenceStatus::InConversation));
    assert_eq!(state_a.current_conversation, Some(conversation.id));

    // Envelopes actually flowed over the relay transport.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        node_a
            .metrics
            .envelopes_via(coordinator::transport::TransportId::Relay)
            > 0
    );

    // B ends; A is released through the same path.
    node_b.handle.end_conversation().await.unwrap();

    let state_a = wait_for_state(&node_a.handle, |s| {
        s.status == Some(PresenceStatus::Available)
    })
    .await;
    assert_eq!(state_a.partner, None);
    assert_eq!(state_a.current_conversation, None);

    cancel_token.cancel();
}

#[tokio::test]
async fn test_pairing_does_not_wait_for_transport_acknowledgment() {
    // Relay pointed at a dead port: every send fails after bounded retries.
    let mut config = relay_config("http://127.0.0.1:9");
    config.relay_timeout = Duration::from_millis(500);
    config.relay_max_attempts = 1;
    config.relay_backoff_base = Duration::from_millis(10);
    let cancel_token = CancellationToken::new();
    let node = spawn_node(A, &config, &cancel_token);

    node.handle.connect().await.unwrap();
    node.handle
        .media_event(MediaEvent::ParticipantJoined(B))
        .await
        .unwrap();
    wait_for_state(&node.handle, |s| s.stats.total_participants == 2).await;

    // The local mutation is immediate: "I am now in a conversation" holds
    // even though no transport can deliver anything.
    let outcome = node.handle.request_pairing(Some(B)).await.unwrap();
    assert!(matches!(outcome, PairingOutcome::Paired(_)));

    let state = node.handle.get_state().await.unwrap();
    assert_eq!(state.status, Some(PresenceStatus::InConversation));
    assert_eq!(state.partner, Some(B));

    // The failed fan-out is eventually recorded as a total failure.
    let mut failed = false;
    for _ in 0..200 {
        if node.metrics.snapshot().fanout_total_failures > 0 {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(failed, "fan-out failure was never recorded");

    cancel_token.cancel();
}
