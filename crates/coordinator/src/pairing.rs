//! Pairing Engine - decides which two participants join a conversation.
//!
//! Candidate selection is deterministic: the oldest waiter wins (smallest
//! `joined_at_ms`, ties broken by smaller id), so a test suite can assert the
//! outcome. Establishing a pair first retires any lingering active record for
//! the same unordered pair, keeping the at-most-one-active invariant even
//! across races with a previous pairing attempt.

use crate::conversations::{Conversation, ConversationTable};
use crate::registry::PresenceRegistry;
use common::envelope::PresenceStatus;
use common::types::{ConversationId, ParticipantId};

/// Outcome of a local pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    /// A partner was selected and the conversation established locally.
    Paired(Conversation),
    /// No candidate was available; the requester is now `Waiting`.
    Waiting,
    /// The requester is already in a conversation; nothing changed.
    AlreadyInConversation,
    /// The explicitly requested target is not `Available`; nothing changed.
    TargetUnavailable,
    /// The requester has no presence record (not connected); nothing changed.
    NotConnected,
}

/// Pick the pairing candidate for `self_id`: the `Available` participant with
/// the smallest `joined_at_ms`, excluding the requester.
#[must_use]
pub fn select_candidate(
    registry: &PresenceRegistry,
    self_id: ParticipantId,
) -> Option<ParticipantId> {
    registry
        .list_by_status(PresenceStatus::Available)
        .into_iter()
        .filter(|p| p.id != self_id)
        .min_by_key(|p| (p.joined_at_ms, p.id))
        .map(|p| p.id)
}

/// Bind `self_id` and `partner` into a new conversation.
///
/// Retires any pre-existing active record for the pair, marks both
/// participants `InConversation` with each other, and inserts the canonical
/// conversation record. The mutation is immediate and local; it never waits
/// for transport acknowledgment.
pub fn establish(
    registry: &mut PresenceRegistry,
    table: &mut ConversationTable,
    self_id: ParticipantId,
    partner: ParticipantId,
    now_ms: i64,
) -> Conversation {
    table.retire_pair(self_id, partner, now_ms);

    registry.set_status(self_id, PresenceStatus::InConversation, Some(partner), now_ms);
    registry.set_status(partner, PresenceStatus::InConversation, Some(self_id), now_ms);

    let conversation = Conversation::new(ConversationId::new(), self_id, partner, now_ms);
    table.insert(conversation);
    conversation
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::conversations::ConversationStatus;

    const P1: ParticipantId = ParticipantId(1);
    const P2: ParticipantId = ParticipantId(2);
    const P3: ParticipantId = ParticipantId(3);

    fn registry_with(available: &[(ParticipantId, i64)]) -> PresenceRegistry {
        let mut registry = PresenceRegistry::new();
        for &(id, joined_at) in available {
            registry.insert(id, PresenceStatus::Available, joined_at);
        }
        registry
    }

    #[test]
    fn test_select_candidate_prefers_oldest_waiter() {
        let registry = registry_with(&[(P1, 0), (P2, 100), (P3, 50)]);
        assert_eq!(select_candidate(&registry, P2), Some(P1));
        assert_eq!(select_candidate(&registry, P1), Some(P3));
    }

    #[test]
    fn test_select_candidate_excludes_self_and_busy() {
        let mut registry = registry_with(&[(P1, 0), (P2, 100)]);
        registry.set_status(P1, PresenceStatus::InConversation, Some(P3), 200);

        assert_eq!(select_candidate(&registry, P2), None);
    }

    #[test]
    fn test_select_candidate_tie_breaks_by_id() {
        let registry = registry_with(&[(P3, 10), (P2, 10)]);
        assert_eq!(select_candidate(&registry, P1), Some(P2));
    }

    #[test]
    fn test_establish_is_canonical_regardless_of_initiator() {
        let mut registry_a = registry_with(&[(P1, 0), (P2, 100)]);
        let mut table_a = ConversationTable::new();
        let from_p2 = establish(&mut registry_a, &mut table_a, P2, P1, 200);

        let mut registry_b = registry_with(&[(P1, 0), (P2, 100)]);
        let mut table_b = ConversationTable::new();
        let from_p1 = establish(&mut registry_b, &mut table_b, P1, P2, 200);

        assert_eq!(from_p2.participant_low, P1);
        assert_eq!(from_p2.participant_high, P2);
        assert_eq!(
            (from_p1.participant_low, from_p1.participant_high),
            (from_p2.participant_low, from_p2.participant_high)
        );
    }

    #[test]
    fn test_establish_binds_both_sides_symmetrically() {
        let mut registry = registry_with(&[(P1, 0), (P2, 100)]);
        let mut table = ConversationTable::new();

        establish(&mut registry, &mut table, P2, P1, 200);

        assert_eq!(registry.get(P1).unwrap().partner, Some(P2));
        assert_eq!(registry.get(P2).unwrap().partner, Some(P1));
        assert_eq!(
            registry.get(P1).unwrap().status,
            PresenceStatus::InConversation
        );
    }

    #[test]
    fn test_establish_retires_existing_active_record() {
        let mut registry = registry_with(&[(P1, 0), (P2, 100)]);
        let mut table = ConversationTable::new();

        let first = establish(&mut registry, &mut table, P1, P2, 200);
        let second = establish(&mut registry, &mut table, P2, P1, 300);

        assert_eq!(table.active_count(), 1);
        assert_eq!(table.active_for_pair(P1, P2).unwrap().id, second.id);
        assert_eq!(
            table.get(first.id).unwrap().status,
            ConversationStatus::Ended
        );
    }
}
