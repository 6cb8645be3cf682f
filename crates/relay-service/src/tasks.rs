//! Store pruning background task.
//!
//! Periodically drops stored envelopes older than the retention horizon.
//! Supports graceful shutdown via a cancellation token: when cancelled the
//! task finishes its current iteration and exits cleanly.

use crate::store::MessageStore;
use common::clock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Start the prune background task.
///
/// Runs until the cancellation token fires.
#[instrument(skip_all, name = "relay.task.prune")]
pub async fn start_store_prune(
    store: Arc<MessageStore>,
    prune_interval: Duration,
    retention_ms: i64,
    cancel_token: CancellationToken,
) {
    info!(
        target: "relay.task.prune",
        prune_interval_secs = prune_interval.as_secs(),
        retention_ms,
        "Starting store prune task"
    );

    let mut interval = tokio::time::interval(prune_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_prune(&store, clock::now_ms(), retention_ms);
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "relay.task.prune",
                    "Store prune task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "relay.task.prune", "Store prune task stopped");
}

/// Run a single prune iteration. Separated from the loop for direct testing.
pub(crate) fn run_prune(store: &MessageStore, now_ms: i64, retention_ms: i64) {
    let removed = store.prune(now_ms, retention_ms);
    if removed > 0 {
        info!(
            target: "relay.task.prune",
            removed,
            remaining = store.len(),
            "Pruned expired envelopes"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::envelope::{Envelope, EnvelopePayload, PresenceStatus, PresenceUpdate};
    use common::types::ParticipantId;

    fn envelope() -> Envelope {
        Envelope::new(
            ParticipantId(1),
            0,
            EnvelopePayload::Presence(PresenceUpdate {
                participant: ParticipantId(1),
                status: PresenceStatus::Available,
                partner: None,
                joined_at_ms: 0,
            }),
        )
    }

    #[test]
    fn test_run_prune_drops_expired_only() {
        let store = MessageStore::new(50);
        store.submit(ParticipantId(2), envelope(), 0);
        store.submit(ParticipantId(2), envelope(), 900);

        run_prune(&store, 1000, 500);

        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_task_stops_on_cancellation() {
        let store = Arc::new(MessageStore::new(50));
        let cancel_token = CancellationToken::new();

        let task = tokio::spawn(start_store_prune(
            Arc::clone(&store),
            Duration::from_secs(60),
            500,
            cancel_token.clone(),
        ));

        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        cancel_token.cancel();
        task.await.unwrap();
    }
}
