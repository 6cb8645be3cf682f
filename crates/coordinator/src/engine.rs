//! Reconciliation Engine - the idempotent state machine at the core.
//!
//! The engine owns the Presence Registry and the Conversation Table and is
//! the only code that mutates them. It consumes envelopes from any transport
//! plus local user actions, applies the transition rules, and returns the
//! side effects ([`Effect`]) the caller must execute: envelopes to fan out
//! over every transport, and recording commands for the external recording
//! collaborator.
//!
//! The engine is synchronous and takes every timestamp as an argument, so
//! the properties that matter - idempotence, order-independence, canonical
//! pairing - are tested directly against it without any async machinery.
//!
//! Transition rules, in order:
//! 1. Envelopes from ourselves, or presence claims about ourselves, are
//!    ignored; each side is authoritative for its own record.
//! 2. A bounded recently-seen set drops repeated `message_id`s before they
//!    reach the transition table.
//! 3. Remaining applications are last-write-wins on strictly newer
//!    timestamps, per record.
//! 4. A `conversation_start` that disagrees with the locally computed
//!    canonical pair, or with an active conversation we are already in, is
//!    discarded as a sync conflict; local state stays authoritative.

use crate::conversations::ConversationTable;
use crate::dedup::RecentlySeen;
use crate::pairing::{self, PairingOutcome};
use crate::registry::{Participant, PresenceRegistry, RemoteApply};
use common::envelope::{
    canonical_pair, ConversationAnnouncement, Envelope, EnvelopePayload, PresenceStatus,
    PresenceUpdate,
};
use common::types::{ConversationId, ParticipantId};
use tracing::debug;

/// A side effect the caller must execute after a transition.
///
/// Recording effects always precede emission effects in the returned list:
/// recording start must not race with the remote side also starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fan this envelope out on every transport adapter.
    Emit(Envelope),
    /// Tell the recording collaborator to begin capturing.
    StartRecording(ConversationId),
    /// Tell the recording collaborator to stop capturing.
    StopRecording(ConversationId),
}

/// How an incoming envelope was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The envelope changed (or idempotently confirmed) local state.
    Applied,
    /// Dropped by the recently-seen set.
    Duplicate,
    /// Dropped by last-write-wins; not strictly newer than local state.
    Stale,
    /// Disagreed with local canonical state; discarded.
    Conflict,
    /// From ourselves, or a presence claim about ourselves.
    SelfEcho,
}

/// Outcome of a local end-conversation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// The conversation was ended.
    Ended(ConversationId),
    /// There was no conversation to end; nothing changed.
    NotInConversation,
}

/// Channel-wide counts for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Total known participants.
    pub total_participants: usize,
    /// Participants currently `Available`.
    pub available: usize,
    /// Participants currently `Waiting`.
    pub waiting: usize,
    /// Participants currently `InConversation`.
    pub in_conversation: usize,
    /// Active conversation records.
    pub active_conversations: usize,
}

/// Point-in-time view of the engine's state.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Our participant id.
    pub self_id: ParticipantId,
    /// Our status, if we have announced presence.
    pub status: Option<PresenceStatus>,
    /// Our conversation partner, if any.
    pub partner: Option<ParticipantId>,
    /// The conversation we are currently in, if any.
    pub current_conversation: Option<ConversationId>,
    /// Channel-wide counts.
    pub stats: ChannelStats,
    /// All known participant records.
    pub participants: Vec<Participant>,
}

/// Report of one garbage-collection sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Participants removed for staleness.
    pub removed_participants: Vec<ParticipantId>,
    /// Partners released back to `Available` by those removals.
    pub released_participants: Vec<ParticipantId>,
    /// Conversation records removed.
    pub removed_conversations: usize,
}

/// The reconciliation state machine for one participant process.
#[derive(Debug)]
pub struct Reconciler {
    self_id: ParticipantId,
    registry: PresenceRegistry,
    conversations: ConversationTable,
    seen: RecentlySeen,
    current_conversation: Option<ConversationId>,
}

impl Reconciler {
    /// Create an engine for `self_id` with the given dedup bounds.
    #[must_use]
    pub fn new(self_id: ParticipantId, dedup_capacity: usize, dedup_ttl_ms: i64) -> Self {
        Self {
            self_id,
            registry: PresenceRegistry::new(),
            conversations: ConversationTable::new(),
            seen: RecentlySeen::new(dedup_capacity, dedup_ttl_ms),
            current_conversation: None,
        }
    }

    /// Our participant id.
    #[must_use]
    pub fn self_id(&self) -> ParticipantId {
        self.self_id
    }

    /// All known participant ids except ourselves (fan-out targets).
    #[must_use]
    pub fn peers(&self) -> Vec<ParticipantId> {
        self.registry.peers_of(self.self_id)
    }

    /// The conversation we are currently in, if any.
    #[must_use]
    pub fn current_conversation(&self) -> Option<ConversationId> {
        self.current_conversation
    }

    // ------------------------------------------------------------------
    // Local actions
    // ------------------------------------------------------------------

    /// Announce ourselves on the channel as `Available`.
    pub fn connect(&mut self, now_ms: i64) -> Vec<Effect> {
        self.registry
            .insert(self.self_id, PresenceStatus::Available, now_ms);
        self.presence_effects(&[self.self_id], now_ms)
    }

    /// Leave the channel: end any active conversation and drop our record.
    ///
    /// Peers learn of the departure through the media client's left event or,
    /// for relay-only peers, through the staleness sweep.
    pub fn disconnect(&mut self, now_ms: i64) -> Vec<Effect> {
        let mut effects = match self.end_conversation(now_ms) {
            (EndOutcome::Ended(_), effects) => effects,
            (EndOutcome::NotInConversation, _) => Vec::new(),
        };
        // Announcing our own presence on the way out would be misleading;
        // drop it and keep the conversation-end and partner announcements.
        effects.retain(|e| match e {
            Effect::Emit(envelope) => match &envelope.payload {
                EnvelopePayload::Presence(update) => update.participant != self.self_id,
                _ => true,
            },
            _ => true,
        });
        self.registry.remove(self.self_id, now_ms);
        effects
    }

    /// Request a conversation, optionally with a specific target.
    ///
    /// Idempotent guard: a request while already `InConversation` is a no-op.
    /// A specific target that is not `Available` is rejected without side
    /// effects.
    pub fn request_pairing(
        &mut self,
        target: Option<ParticipantId>,
        now_ms: i64,
    ) -> (PairingOutcome, Vec<Effect>) {
        let Some(own) = self.registry.get(self.self_id) else {
            return (PairingOutcome::NotConnected, Vec::new());
        };
        if own.status == PresenceStatus::InConversation {
            return (PairingOutcome::AlreadyInConversation, Vec::new());
        }

        let partner = match target {
            Some(requested) => {
                let available = requested != self.self_id
                    && self
                        .registry
                        .get(requested)
                        .is_some_and(|p| p.status == PresenceStatus::Available);
                if !available {
                    return (PairingOutcome::TargetUnavailable, Vec::new());
                }
                requested
            }
            None => match pairing::select_candidate(&self.registry, self.self_id) {
                Some(candidate) => candidate,
                None => {
                    self.registry
                        .set_status(self.self_id, PresenceStatus::Waiting, None, now_ms);
                    let effects = self.presence_effects(&[self.self_id], now_ms);
                    return (PairingOutcome::Waiting, effects);
                }
            },
        };

        let conversation = pairing::establish(
            &mut self.registry,
            &mut self.conversations,
            self.self_id,
            partner,
            now_ms,
        );
        self.current_conversation = Some(conversation.id);

        let mut effects = vec![Effect::StartRecording(conversation.id)];
        effects.push(Effect::Emit(Envelope::new(
            self.self_id,
            now_ms,
            EnvelopePayload::ConversationStart(conversation.to_announcement()),
        )));
        effects.extend(self.presence_effects(&[self.self_id, partner], now_ms));

        (PairingOutcome::Paired(conversation), effects)
    }

    /// End the conversation we are currently in.
    pub fn end_conversation(&mut self, now_ms: i64) -> (EndOutcome, Vec<Effect>) {
        let Some(conversation_id) = self.current_conversation.take() else {
            return (EndOutcome::NotInConversation, Vec::new());
        };
        let Some(conversation) = self.conversations.get(conversation_id).copied() else {
            return (EndOutcome::NotInConversation, Vec::new());
        };

        self.conversations.end(conversation_id, now_ms);
        let partner = conversation.partner_of(self.self_id);

        self.registry
            .set_status(self.self_id, PresenceStatus::Available, None, now_ms);
        let mut announce = vec![self.self_id];
        if let Some(partner_id) = partner {
            if self
                .registry
                .get(partner_id)
                .is_some_and(|p| p.partner == Some(self.self_id))
            {
                self.registry
                    .set_status(partner_id, PresenceStatus::Available, None, now_ms);
                announce.push(partner_id);
            }
        }

        let mut effects = vec![Effect::StopRecording(conversation_id)];
        effects.push(Effect::Emit(Envelope::new(
            self.self_id,
            now_ms,
            EnvelopePayload::ConversationEnd(conversation.to_announcement()),
        )));
        effects.extend(self.presence_effects(&announce, now_ms));

        (EndOutcome::Ended(conversation_id), effects)
    }

    /// Refresh and re-announce our own presence.
    ///
    /// Keeps a live node clear of its peers' staleness horizons.
    pub fn heartbeat(&mut self, now_ms: i64) -> Vec<Effect> {
        if self.registry.get(self.self_id).is_none() {
            return Vec::new();
        }
        self.registry.touch(self.self_id, now_ms);
        self.presence_effects(&[self.self_id], now_ms)
    }

    /// A participant joined the media channel.
    ///
    /// The newcomer is recorded as `Available`, and we re-announce our own
    /// presence so the newcomer learns our status. If we were `Waiting`, we
    /// flip back to `Available` - pairing stays an explicit request.
    pub fn peer_joined(&mut self, participant: ParticipantId, now_ms: i64) -> Vec<Effect> {
        if participant == self.self_id {
            return Vec::new();
        }
        if self.registry.get(participant).is_none() {
            self.registry
                .insert(participant, PresenceStatus::Available, now_ms);
        }
        if self
            .registry
            .get(self.self_id)
            .is_some_and(|own| own.status == PresenceStatus::Waiting)
        {
            self.registry
                .set_status(self.self_id, PresenceStatus::Available, None, now_ms);
        }
        self.presence_effects(&[self.self_id], now_ms)
    }

    /// A participant left the media channel.
    ///
    /// If it was our partner, the conversation ends (with fan-out so slower
    /// channels still learn of it); either way the record is removed with the
    /// usual partner cascade.
    pub fn peer_left(&mut self, participant: ParticipantId, now_ms: i64) -> Vec<Effect> {
        if participant == self.self_id {
            return Vec::new();
        }

        let partner_left = self
            .current_conversation
            .and_then(|id| self.conversations.get(id))
            .is_some_and(|c| c.involves(participant));

        let effects = if partner_left {
            match self.end_conversation(now_ms) {
                (EndOutcome::Ended(_), effects) => effects,
                (EndOutcome::NotInConversation, _) => Vec::new(),
            }
        } else {
            Vec::new()
        };

        self.registry.remove(participant, now_ms);
        effects
    }

    // ------------------------------------------------------------------
    // Envelope application
    // ------------------------------------------------------------------

    /// Apply one incoming envelope.
    ///
    /// Total over every (state, envelope) combination; never leaves the
    /// registry or table violating their invariants.
    pub fn apply_envelope(&mut self, envelope: &Envelope, now_ms: i64) -> (Disposition, Vec<Effect>) {
        if envelope.sender == self.self_id {
            return (Disposition::SelfEcho, Vec::new());
        }
        if !self.seen.observe(envelope.message_id, now_ms) {
            return (Disposition::Duplicate, Vec::new());
        }

        match &envelope.payload {
            EnvelopePayload::Presence(update) => self.apply_presence(update, envelope.timestamp_ms),
            EnvelopePayload::ConversationStart(announcement) => {
                self.apply_conversation_start(announcement, envelope, now_ms)
            }
            EnvelopePayload::ConversationEnd(announcement) => {
                self.apply_conversation_end(announcement, envelope.timestamp_ms, now_ms)
            }
        }
    }

    fn apply_presence(
        &mut self,
        update: &PresenceUpdate,
        timestamp_ms: i64,
    ) -> (Disposition, Vec<Effect>) {
        if update.participant == self.self_id {
            // We are authoritative for our own record.
            return (Disposition::SelfEcho, Vec::new());
        }
        match self.registry.apply_remote(update, timestamp_ms) {
            RemoteApply::Stale => (Disposition::Stale, Vec::new()),
            RemoteApply::Inserted | RemoteApply::Updated => (Disposition::Applied, Vec::new()),
        }
    }

    fn apply_conversation_start(
        &mut self,
        announcement: &ConversationAnnouncement,
        envelope: &Envelope,
        now_ms: i64,
    ) -> (Disposition, Vec<Effect>) {
        let timestamp_ms = envelope.timestamp_ms;

        if !announcement.involves(self.self_id) {
            // Third-party conversation: cache the record and both members'
            // statuses, last-write-wins.
            if self.conversations.apply_remote_start(announcement, timestamp_ms)
                == RemoteApply::Stale
            {
                return (Disposition::Stale, Vec::new());
            }
            self.cache_member_status(
                announcement.participant_low,
                PresenceStatus::InConversation,
                Some(announcement.participant_high),
                timestamp_ms,
            );
            self.cache_member_status(
                announcement.participant_high,
                PresenceStatus::InConversation,
                Some(announcement.participant_low),
                timestamp_ms,
            );
            return (Disposition::Applied, Vec::new());
        }

        // A start naming us must match the canonical pair computed locally
        // from ourselves and the sender.
        let expected = canonical_pair(self.self_id, envelope.sender);
        if (announcement.participant_low, announcement.participant_high) != expected {
            return (Disposition::Conflict, Vec::new());
        }

        if self.current_conversation == Some(announcement.conversation_id) {
            // Idempotent re-delivery of the conversation we are already in.
            let _ = self.conversations.apply_remote_start(announcement, timestamp_ms);
            return (Disposition::Applied, Vec::new());
        }
        if self.current_conversation.is_some() {
            // Never overwrite an active conversation with a different one.
            return (Disposition::Conflict, Vec::new());
        }

        if self.conversations.apply_remote_start(announcement, timestamp_ms) == RemoteApply::Stale {
            return (Disposition::Stale, Vec::new());
        }
        self.conversations.retire_pair_except(
            announcement.participant_low,
            announcement.participant_high,
            announcement.conversation_id,
            now_ms,
        );

        let partner = envelope.sender;
        if self.registry.get(partner).is_none() {
            self.registry
                .insert(partner, PresenceStatus::Available, timestamp_ms);
        }
        self.registry.set_status(
            self.self_id,
            PresenceStatus::InConversation,
            Some(partner),
            now_ms,
        );
        self.registry.set_status(
            partner,
            PresenceStatus::InConversation,
            Some(self.self_id),
            timestamp_ms,
        );
        self.current_conversation = Some(announcement.conversation_id);

        debug!(
            target: "coordinator.engine",
            conversation_id = %announcement.conversation_id,
            partner = %partner,
            "Accepted remote conversation start"
        );

        let mut effects = vec![Effect::StartRecording(announcement.conversation_id)];
        effects.extend(self.presence_effects(&[self.self_id], now_ms));
        (Disposition::Applied, effects)
    }

    fn apply_conversation_end(
        &mut self,
        announcement: &ConversationAnnouncement,
        timestamp_ms: i64,
        now_ms: i64,
    ) -> (Disposition, Vec<Effect>) {
        if self.conversations.apply_remote_end(announcement, timestamp_ms) == RemoteApply::Stale {
            return (Disposition::Stale, Vec::new());
        }

        if announcement.involves(self.self_id)
            && self.current_conversation == Some(announcement.conversation_id)
        {
            self.current_conversation = None;
            self.registry
                .set_status(self.self_id, PresenceStatus::Available, None, now_ms);
            if let Some(partner) = announcement.partner_of(self.self_id) {
                if self
                    .registry
                    .get(partner)
                    .is_some_and(|p| p.partner == Some(self.self_id))
                {
                    self.registry
                        .set_status(partner, PresenceStatus::Available, None, timestamp_ms);
                }
            }

            let mut effects = vec![Effect::StopRecording(announcement.conversation_id)];
            effects.extend(self.presence_effects(&[self.self_id], now_ms));
            return (Disposition::Applied, effects);
        }

        // Not our current conversation: cache both members as released,
        // last-write-wins (a member in a newer conversation keeps it).
        for member in [announcement.participant_low, announcement.participant_high] {
            self.cache_member_status(member, PresenceStatus::Available, None, timestamp_ms);
        }
        (Disposition::Applied, Vec::new())
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Expire stale presence and conversation records.
    pub fn sweep(
        &mut self,
        now_ms: i64,
        presence_horizon_ms: i64,
        conversation_horizon_ms: i64,
    ) -> (SweepReport, Vec<Effect>) {
        let presence = self.registry.sweep(now_ms, presence_horizon_ms);
        let mut effects = Vec::new();

        // If our partner aged out, we were released: end our conversation
        // and let the slower channels know.
        if presence.released.contains(&self.self_id) {
            if let Some(conversation_id) = self.current_conversation.take() {
                if let Some(conversation) = self.conversations.get(conversation_id).copied() {
                    self.conversations.end(conversation_id, now_ms);
                    effects.push(Effect::StopRecording(conversation_id));
                    effects.push(Effect::Emit(Envelope::new(
                        self.self_id,
                        now_ms,
                        EnvelopePayload::ConversationEnd(conversation.to_announcement()),
                    )));
                    effects.extend(self.presence_effects(&[self.self_id], now_ms));
                }
            }
        }

        let removed_conversations = self.conversations.sweep(now_ms, conversation_horizon_ms);

        // An aged-out record for the conversation we are in releases us too.
        if let Some(conversation_id) = self.current_conversation {
            if removed_conversations.iter().any(|c| c.id == conversation_id) {
                self.current_conversation = None;
                self.registry
                    .set_status(self.self_id, PresenceStatus::Available, None, now_ms);
                effects.push(Effect::StopRecording(conversation_id));
                effects.extend(self.presence_effects(&[self.self_id], now_ms));
            }
        }

        let report = SweepReport {
            removed_participants: presence.removed,
            released_participants: presence.released,
            removed_conversations: removed_conversations.len(),
        };
        (report, effects)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Point-in-time snapshot of the engine's state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let own = self.registry.get(self.self_id);
        StateSnapshot {
            self_id: self.self_id,
            status: own.map(|p| p.status),
            partner: own.and_then(|p| p.partner),
            current_conversation: self.current_conversation,
            stats: ChannelStats {
                total_participants: self.registry.len(),
                available: self.registry.list_by_status(PresenceStatus::Available).len(),
                waiting: self.registry.list_by_status(PresenceStatus::Waiting).len(),
                in_conversation: self
                    .registry
                    .list_by_status(PresenceStatus::InConversation)
                    .len(),
                active_conversations: self.conversations.active_count(),
            },
            participants: self.registry.iter().copied().collect(),
        }
    }

    /// Direct access to the registry (read-only).
    #[must_use]
    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Direct access to the conversation table (read-only).
    #[must_use]
    pub fn conversations(&self) -> &ConversationTable {
        &self.conversations
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Presence emissions for the given participants' current records.
    fn presence_effects(&self, participants: &[ParticipantId], now_ms: i64) -> Vec<Effect> {
        participants
            .iter()
            .filter_map(|&id| self.registry.get(id))
            .map(|record| {
                Effect::Emit(Envelope::new(
                    self.self_id,
                    now_ms,
                    EnvelopePayload::Presence(record.to_update()),
                ))
            })
            .collect()
    }

    /// Cache a member's status derived from a conversation envelope,
    /// last-write-wins, never touching our own record.
    fn cache_member_status(
        &mut self,
        member: ParticipantId,
        status: PresenceStatus,
        partner: Option<ParticipantId>,
        timestamp_ms: i64,
    ) {
        if member == self.self_id {
            return;
        }
        let joined_at_ms = self
            .registry
            .get(member)
            .map_or(timestamp_ms, |p| p.joined_at_ms);
        let update = PresenceUpdate {
            participant: member,
            status,
            partner,
            joined_at_ms,
        };
        let _ = self.registry.apply_remote(&update, timestamp_ms);
    }
}
