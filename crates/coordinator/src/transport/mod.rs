//! Transport adapters.
//!
//! Three redundant, unordered, at-least-once channels carry every envelope:
//! the media client's signaling (fast, drops when the recipient is not
//! attached), the HTTP relay (durable, polled, works across disjoint
//! devices), and an in-process broadcast bus (near-zero latency, same host
//! only). Redundancy is the correctness mechanism that substitutes for a
//! missing authoritative coordinator: outbound events are fanned out to
//! every adapter, and the reconciliation engine deduplicates on receive.
//!
//! `send` never errors for ordinary delivery failure - unavailability is an
//! expected condition, reported as an outcome.

pub mod local;
pub mod realtime;
pub mod relay;

use common::envelope::Envelope;
use common::types::ParticipantId;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which adapter carried (or failed to carry) an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportId {
    /// The media client's signaling channel.
    Realtime,
    /// The HTTP relay.
    Relay,
    /// The in-process broadcast bus.
    LocalBroadcast,
}

impl TransportId {
    /// Stable label, for logging and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportId::Realtime => "realtime",
            TransportId::Relay => "relay",
            TransportId::LocalBroadcast => "local_broadcast",
        }
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a send attempt. Unavailability is expected, not exceptional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The adapter accepted the envelope.
    Delivered,
    /// The adapter could not deliver; redundant adapters cover it.
    Unavailable,
}

/// Uniform adapter contract.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Which adapter this is.
    fn id(&self) -> TransportId;

    /// Submit an envelope for the given targets.
    ///
    /// Broadcast adapters ignore `targets`; the point-to-point relay sends
    /// one copy per target.
    async fn send(&self, envelope: &Envelope, targets: &[ParticipantId]) -> DeliveryOutcome;
}

/// Result of fanning an envelope out over every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Adapters that accepted the envelope.
    pub delivered: usize,
    /// Adapters that reported unavailability.
    pub unavailable: usize,
}

impl FanoutReport {
    /// Whether no adapter accepted the envelope.
    #[must_use]
    pub fn all_unavailable(&self) -> bool {
        self.delivered == 0 && self.unavailable > 0
    }
}

/// Submit one envelope to every adapter.
///
/// Failure of individual adapters is absorbed; only a total failure is worth
/// surfacing (and even then local state is already updated - the event may
/// still reach peers through later heartbeats).
pub async fn fan_out(
    transports: &[Arc<dyn Transport>],
    envelope: &Envelope,
    targets: &[ParticipantId],
) -> FanoutReport {
    let mut report = FanoutReport {
        delivered: 0,
        unavailable: 0,
    };

    for transport in transports {
        match transport.send(envelope, targets).await {
            DeliveryOutcome::Delivered => {
                report.delivered += 1;
                debug!(
                    target: "coordinator.transport",
                    transport = %transport.id(),
                    kind = envelope.kind(),
                    message_id = %envelope.message_id,
                    "Envelope delivered"
                );
            }
            DeliveryOutcome::Unavailable => {
                report.unavailable += 1;
                debug!(
                    target: "coordinator.transport",
                    transport = %transport.id(),
                    kind = envelope.kind(),
                    message_id = %envelope.message_id,
                    "Transport unavailable"
                );
            }
        }
    }

    if report.all_unavailable() {
        warn!(
            target: "coordinator.transport",
            kind = envelope.kind(),
            message_id = %envelope.message_id,
            "All transports unavailable for envelope"
        );
    }

    report
}

/// Mock transport for testing.
pub mod mock {
    use super::{DeliveryOutcome, Envelope, ParticipantId, Transport, TransportId};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Mock transport that records every envelope it is asked to send.
    pub struct MockTransport {
        id: TransportId,
        unavailable: AtomicBool,
        sent: Mutex<Vec<(Envelope, Vec<ParticipantId>)>>,
    }

    impl MockTransport {
        /// Create a delivering mock with the given identity.
        #[must_use]
        pub fn new(id: TransportId) -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self {
                id,
                unavailable: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            })
        }

        /// Toggle unavailability.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Envelopes submitted so far.
        pub fn sent(&self) -> Vec<Envelope> {
            self.sent
                .lock()
                .map(|s| s.iter().map(|(e, _)| *e).collect())
                .unwrap_or_default()
        }

        /// Envelopes with the targets they were submitted for.
        pub fn sent_with_targets(&self) -> Vec<(Envelope, Vec<ParticipantId>)> {
            self.sent.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        fn id(&self) -> TransportId {
            self.id
        }

        async fn send(&self, envelope: &Envelope, targets: &[ParticipantId]) -> DeliveryOutcome {
            if self.unavailable.load(Ordering::SeqCst) {
                return DeliveryOutcome::Unavailable;
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((*envelope, targets.to_vec()));
            }
            DeliveryOutcome::Delivered
        }
    }
}
