//! Relay wire contract.
//!
//! Request/response bodies for the relay service's single endpoint, shared by
//! the relay service and the coordinator's relay adapter. The relay stamps
//! every stored envelope with its own arrival time; pollers advance their
//! `since_ms` watermark on that arrival time, not on the sender's clock.

use crate::envelope::Envelope;
use crate::types::{MessageId, ParticipantId};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// The participant this envelope is addressed to.
    pub target: ParticipantId,
    /// The envelope to store.
    pub envelope: Envelope,
}

/// Acknowledgment for a stored envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Message id of the stored envelope.
    pub message_id: MessageId,
}

/// Query parameters of `GET /api/v1/messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollQuery {
    /// Participant whose mailbox is being polled.
    pub participant_id: ParticipantId,
    /// Only return envelopes that arrived strictly after this time.
    #[serde(default)]
    pub since_ms: i64,
}

/// One stored envelope with its relay arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    /// When the relay accepted this envelope.
    pub received_at_ms: i64,
    /// The stored envelope.
    pub envelope: Envelope,
}

/// Body of the poll response, ordered by arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Stored envelopes addressed to the polled participant.
    pub messages: Vec<StoredEnvelope>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopePayload, PresenceStatus, PresenceUpdate};

    #[test]
    fn test_submit_request_roundtrip() {
        let request = SubmitRequest {
            target: ParticipantId(2),
            envelope: Envelope::new(
                ParticipantId(1),
                500,
                EnvelopePayload::Presence(PresenceUpdate {
                    participant: ParticipantId(1),
                    status: PresenceStatus::Waiting,
                    partner: None,
                    joined_at_ms: 100,
                }),
            ),
        };

        let json = serde_json::to_string(&request).unwrap();
        let back: SubmitRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_poll_query_since_defaults_to_zero() {
        let query: PollQuery = serde_json::from_str(r#"{"participant_id": 7}"#).unwrap();
        assert_eq!(query.participant_id, ParticipantId(7));
        assert_eq!(query.since_ms, 0);
    }
}
