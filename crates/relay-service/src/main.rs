//! Relay service
//!
//! HTTP relay for Parley envelopes: submit + poll against a bounded
//! in-memory store, with periodic retention pruning.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Build the store and router
//! 3. Bind the listener (fail fast on bind errors)
//! 4. Spawn the prune task
//! 5. Serve until shutdown signal, then drain and stop

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use relay_service::config::Config;
use relay_service::routes::{router, AppState};
use relay_service::store::MessageStore;
use relay_service::tasks::start_store_prune;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Parley relay service");

    let config = Config::from_env();
    info!(
        bind_address = %config.bind_address,
        max_messages_per_target = config.max_messages_per_target,
        retention_seconds = config.retention_seconds,
        prune_interval_seconds = config.prune_interval_seconds,
        "Configuration loaded"
    );

    let store = Arc::new(MessageStore::new(config.max_messages_per_target));
    let state = AppState::new(Arc::clone(&store));
    let app = router(Arc::clone(&state));

    let shutdown_token = CancellationToken::new();

    // Bind before spawning anything to fail fast on bind errors.
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind relay listener");
            e
        })?;
    info!(addr = %config.bind_address, "Relay listener bound");

    let prune_token = shutdown_token.child_token();
    let prune_task = tokio::spawn(start_store_prune(
        Arc::clone(&store),
        Duration::from_secs(config.prune_interval_seconds),
        config.retention_ms(),
        prune_token,
    ));

    let serve_token = shutdown_token.child_token();
    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            serve_token.cancelled().await;
            info!("Relay server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Relay server failed");
        }
    });

    info!("Relay service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, draining...");
    state.set_not_ready();
    shutdown_token.cancel();

    let _ = prune_task.await;
    let _ = server_task.await;

    info!("Relay service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; without them the service
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
