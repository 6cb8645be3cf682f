//! Local broadcast adapter.
//!
//! Fans envelopes out to every coordinator in the same process group over a
//! `tokio::sync::broadcast` bus. Near-zero latency, used as a fast path when
//! available, never relied upon exclusively.

use super::{DeliveryOutcome, Transport, TransportId};
use crate::actors::CoordinatorActorHandle;
use common::envelope::Envelope;
use common::types::ParticipantId;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default bus capacity; slow subscribers past this lag and drop.
pub const LOCAL_BUS_CAPACITY: usize = 256;

/// The shared in-process bus.
///
/// One bus per process group; every coordinator sharing it gets a transport
/// and a pump.
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(LOCAL_BUS_CAPACITY)
    }

    /// Create a bus with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A transport adapter publishing to this bus.
    #[must_use]
    pub fn transport(&self) -> LocalBroadcastTransport {
        LocalBroadcastTransport {
            sender: self.sender.clone(),
        }
    }

    /// Subscribe to the bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter publishing envelopes onto a [`LocalBus`].
pub struct LocalBroadcastTransport {
    sender: broadcast::Sender<Envelope>,
}

#[async_trait::async_trait]
impl Transport for LocalBroadcastTransport {
    fn id(&self) -> TransportId {
        TransportId::LocalBroadcast
    }

    async fn send(&self, envelope: &Envelope, _targets: &[ParticipantId]) -> DeliveryOutcome {
        // A send error means nobody is subscribed: nobody local to reach.
        match self.sender.send(*envelope) {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(_) => DeliveryOutcome::Unavailable,
        }
    }
}

/// Pump envelopes from the bus into the coordinator actor.
///
/// Our own envelopes come back on the bus; they are filtered here so the
/// mailbox never sees them. Runs until cancelled or the bus closes.
pub fn spawn_local_pump(
    bus: &LocalBus,
    self_id: ParticipantId,
    handle: CoordinatorActorHandle,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!(
                        target: "coordinator.transport.local",
                        "Local pump cancelled"
                    );
                    break;
                }
                received = receiver.recv() => {
                    match received {
                        Ok(envelope) => {
                            if envelope.sender == self_id {
                                continue;
                            }
                            if handle
                                .deliver_envelope(envelope, TransportId::LocalBroadcast)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Dropped envelopes resurface via the other
                            // transports or the next heartbeat.
                            warn!(
                                target: "coordinator.transport.local",
                                skipped,
                                "Local pump lagged behind the bus"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::envelope::{EnvelopePayload, PresenceStatus, PresenceUpdate};

    fn envelope(sender: ParticipantId) -> Envelope {
        Envelope::new(
            sender,
            100,
            EnvelopePayload::Presence(PresenceUpdate {
                participant: sender,
                status: PresenceStatus::Available,
                partner: None,
                joined_at_ms: 0,
            }),
        )
    }

    #[tokio::test]
    async fn test_send_without_subscribers_is_unavailable() {
        let bus = LocalBus::new();
        let transport = bus.transport();

        let outcome = transport.send(&envelope(ParticipantId(1)), &[]).await;

        assert_eq!(outcome, DeliveryOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_envelopes() {
        let bus = LocalBus::new();
        let transport = bus.transport();
        let mut receiver = bus.subscribe();

        let env = envelope(ParticipantId(1));
        let outcome = transport.send(&env, &[]).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(receiver.recv().await.unwrap(), env);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_receive() {
        let bus = LocalBus::new();
        let transport = bus.transport();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let env = envelope(ParticipantId(2));
        transport.send(&env, &[]).await;

        assert_eq!(first.recv().await.unwrap(), env);
        assert_eq!(second.recv().await.unwrap(), env);
    }
}
