//! Envelope wire types.
//!
//! An [`Envelope`] is the only unit that crosses a transport boundary: every
//! presence change and every conversation start/end travels as one envelope,
//! fanned out redundantly over all transports. The sender generates the
//! `message_id` once per logical event and reuses it on every transport, so a
//! receiver can collapse cross-transport duplicates with a single bounded
//! recently-seen set.
//!
//! Serialized as JSON with a `kind` tag:
//!
//! ```json
//! {
//!   "message_id": "…",
//!   "sender": 17395018234561234,
//!   "timestamp_ms": 1720000000000,
//!   "kind": "conversation_start",
//!   "payload": { "conversation_id": "…", "participant_low": 1, … }
//! }
//! ```

use crate::types::{ConversationId, MessageId, ParticipantId};
use serde::{Deserialize, Serialize};

/// Presence status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Idle and open to being paired.
    Available,
    /// Asked for a conversation but no candidate was available.
    Waiting,
    /// Currently in a two-party conversation.
    InConversation,
}

/// A presence announcement for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// The participant this update describes.
    pub participant: ParticipantId,
    /// Announced status.
    pub status: PresenceStatus,
    /// Conversation partner, only meaningful when `status` is `in_conversation`.
    pub partner: Option<ParticipantId>,
    /// When the participant first joined the channel.
    pub joined_at_ms: i64,
}

/// The canonical record of a conversation between two participants.
///
/// The pair is always stored as `(min, max)` so both sides compute an
/// identical record without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAnnouncement {
    /// Conversation identifier, generated by the initiating side.
    pub conversation_id: ConversationId,
    /// Smaller member id of the pair.
    pub participant_low: ParticipantId,
    /// Larger member id of the pair.
    pub participant_high: ParticipantId,
    /// When the conversation started.
    pub started_at_ms: i64,
}

impl ConversationAnnouncement {
    /// Build an announcement with the pair in canonical order.
    #[must_use]
    pub fn new(
        conversation_id: ConversationId,
        a: ParticipantId,
        b: ParticipantId,
        started_at_ms: i64,
    ) -> Self {
        let (participant_low, participant_high) = canonical_pair(a, b);
        Self {
            conversation_id,
            participant_low,
            participant_high,
            started_at_ms,
        }
    }

    /// Whether the given participant is one of the two members.
    #[must_use]
    pub fn involves(&self, participant: ParticipantId) -> bool {
        self.participant_low == participant || self.participant_high == participant
    }

    /// The other member of the pair, if `participant` is a member.
    #[must_use]
    pub fn partner_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        if participant == self.participant_low {
            Some(self.participant_high)
        } else if participant == self.participant_high {
            Some(self.participant_low)
        } else {
            None
        }
    }
}

/// Order an unordered pair canonically as `(min, max)`.
#[must_use]
pub fn canonical_pair(a: ParticipantId, b: ParticipantId) -> (ParticipantId, ParticipantId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Kind-specific envelope payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EnvelopePayload {
    /// A participant's presence changed.
    Presence(PresenceUpdate),
    /// A conversation was started between two participants.
    ConversationStart(ConversationAnnouncement),
    /// A conversation was ended by one of its members.
    ConversationEnd(ConversationAnnouncement),
}

impl EnvelopePayload {
    /// Stable kind label, for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            EnvelopePayload::Presence(_) => "presence",
            EnvelopePayload::ConversationStart(_) => "conversation_start",
            EnvelopePayload::ConversationEnd(_) => "conversation_end",
        }
    }
}

/// The unit exchanged on every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per logical event; identical across all transports carrying it.
    pub message_id: MessageId,
    /// The participant that emitted this envelope.
    pub sender: ParticipantId,
    /// Sender's wall clock at emission time.
    pub timestamp_ms: i64,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub payload: EnvelopePayload,
}

impl Envelope {
    /// Construct a new envelope with a fresh message id.
    #[must_use]
    pub fn new(sender: ParticipantId, timestamp_ms: i64, payload: EnvelopePayload) -> Self {
        Self {
            message_id: MessageId::new(),
            sender,
            timestamp_ms,
            payload,
        }
    }

    /// Stable kind label of the payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pair_is_order_independent() {
        let a = ParticipantId(42);
        let b = ParticipantId(7);
        assert_eq!(canonical_pair(a, b), canonical_pair(b, a));
        assert_eq!(canonical_pair(a, b), (ParticipantId(7), ParticipantId(42)));
    }

    #[test]
    fn test_announcement_orders_pair_canonically() {
        let conv = ConversationId::new();
        let forward = ConversationAnnouncement::new(conv, ParticipantId(2), ParticipantId(1), 100);
        let reverse = ConversationAnnouncement::new(conv, ParticipantId(1), ParticipantId(2), 100);
        assert_eq!(forward, reverse);
        assert_eq!(forward.participant_low, ParticipantId(1));
        assert_eq!(forward.participant_high, ParticipantId(2));
    }

    #[test]
    fn test_partner_of() {
        let conv = ConversationId::new();
        let ann = ConversationAnnouncement::new(conv, ParticipantId(1), ParticipantId(2), 0);
        assert_eq!(ann.partner_of(ParticipantId(1)), Some(ParticipantId(2)));
        assert_eq!(ann.partner_of(ParticipantId(2)), Some(ParticipantId(1)));
        assert_eq!(ann.partner_of(ParticipantId(3)), None);
    }

    #[test]
    fn test_envelope_kind_tags_on_the_wire() {
        let env = Envelope::new(
            ParticipantId(5),
            1000,
            EnvelopePayload::Presence(PresenceUpdate {
                participant: ParticipantId(5),
                status: PresenceStatus::Available,
                partner: None,
                joined_at_ms: 900,
            }),
        );

        let json = serde_json::to_value(env).unwrap();
        assert_eq!(json["kind"], "presence");
        assert_eq!(json["payload"]["status"], "available");
        assert_eq!(json["sender"], 5);

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_conversation_start_roundtrip() {
        let ann =
            ConversationAnnouncement::new(ConversationId::new(), ParticipantId(9), ParticipantId(3), 50);
        let env = Envelope::new(ParticipantId(9), 60, EnvelopePayload::ConversationStart(ann));

        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "conversation_start");
        assert_eq!(back, env);
    }
}
