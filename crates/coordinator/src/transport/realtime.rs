//! Realtime-event adapter.
//!
//! Rides the media client's own signaling channel. Fastest of the three
//! transports, but delivery silently drops when the recipient's client is
//! not attached to the media session - the relay and the local bus cover
//! that case.

use super::{DeliveryOutcome, Transport, TransportId};
use crate::media::MediaClient;
use common::envelope::Envelope;
use common::types::ParticipantId;
use std::sync::Arc;
use tracing::debug;

/// Adapter submitting envelopes over media-client signaling.
pub struct RealtimeTransport {
    media: Arc<dyn MediaClient>,
}

impl RealtimeTransport {
    /// Wrap a media client as a transport.
    #[must_use]
    pub fn new(media: Arc<dyn MediaClient>) -> Self {
        Self { media }
    }
}

#[async_trait::async_trait]
impl Transport for RealtimeTransport {
    fn id(&self) -> TransportId {
        TransportId::Realtime
    }

    async fn send(&self, envelope: &Envelope, _targets: &[ParticipantId]) -> DeliveryOutcome {
        match self.media.send_signal(envelope).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(error) => {
                debug!(
                    target: "coordinator.transport.realtime",
                    error = %error,
                    kind = envelope.kind(),
                    "Signaling send failed"
                );
                DeliveryOutcome::Unavailable
            }
        }
    }
}
