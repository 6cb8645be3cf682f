//! Coordinator node
//!
//! Headless Parley coordinator: joins a channel through the relay and the
//! in-process bus, announces presence, accepts pairing, and reconciles state
//! until shutdown. The media-client seam stays empty here - an embedding
//! application supplies a real client and gains the realtime transport.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Build the local bus and the relay transport
//! 3. Spawn the coordinator actor
//! 4. Spawn the local pump and the relay poll loop
//! 5. Announce presence
//! 6. Wait for shutdown signal, then disconnect and cancel

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use common::types::ParticipantId;
use coordinator::actors::{CoordinatorActor, CoordinatorMetrics};
use coordinator::config::Config;
use coordinator::transport::local::{spawn_local_pump, LocalBus};
use coordinator::transport::relay::{spawn_relay_poll, RelayTransport};
use coordinator::transport::Transport;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Parley coordinator");

    let config = Config::from_env();
    let self_id = config
        .participant_id
        .map_or_else(ParticipantId::generate, ParticipantId);

    info!(
        participant_id = %self_id,
        channel = %config.channel,
        relay_url = %config.relay_url,
        relay_poll_interval_ms = config.relay_poll_interval.as_millis(),
        presence_horizon_secs = config.presence_horizon.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "Configuration loaded"
    );

    let cancel_token = CancellationToken::new();

    // Transports: local bus (fast path for co-located nodes) + relay.
    let bus = LocalBus::new();
    let relay = RelayTransport::new(&config).map_err(|e| {
        error!(error = %e, "Failed to build relay transport");
        e
    })?;
    let transports: Vec<Arc<dyn Transport>> = vec![Arc::new(bus.transport()), Arc::new(relay)];

    let metrics = CoordinatorMetrics::new();

    let (handle, actor_task) = CoordinatorActor::spawn(
        self_id,
        config.clone(),
        transports,
        None,
        None,
        None,
        Arc::clone(&metrics),
        cancel_token.clone(),
    );
    info!("Coordinator actor started");

    let local_pump = spawn_local_pump(&bus, self_id, handle.clone(), handle.child_token());
    let relay_poll = spawn_relay_poll(&config, self_id, handle.clone(), handle.child_token())
        .map_err(|e| {
            error!(error = %e, "Failed to start relay poll loop");
            e
        })?;
    info!("Transport pumps started");

    handle.connect().await.map_err(|e| {
        error!(error = %e, "Failed to announce presence");
        e
    })?;
    info!("Presence announced, coordinator running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, disconnecting...");

    if let Err(e) = handle.disconnect().await {
        warn!(error = %e, "Disconnect failed during shutdown");
    }

    // Give the teardown emissions a moment on the wire before cancelling.
    tokio::time::sleep(Duration::from_millis(250)).await;
    cancel_token.cancel();

    let _ = actor_task.await;
    let _ = local_pump.await;
    let _ = relay_poll.await;

    let snapshot = metrics.snapshot();
    info!(
        envelopes_received = snapshot.envelopes_received,
        envelopes_deduplicated = snapshot.envelopes_deduplicated,
        sync_conflicts = snapshot.sync_conflicts,
        conversations_started = snapshot.conversations_started,
        "Coordinator shutdown complete"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; without them the process
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
