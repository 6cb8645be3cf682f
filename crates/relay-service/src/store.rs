//! In-memory envelope store.
//!
//! One bounded queue of stored envelopes per target participant. The store
//! keeps only the most recent `max_per_target` entries per target, and the
//! prune task drops anything older than the retention horizon - short-lived
//! shared state, not a database.

use common::envelope::Envelope;
use common::relay::StoredEnvelope;
use common::types::{MessageId, ParticipantId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Per-target bounded envelope store.
#[derive(Debug)]
pub struct MessageStore {
    inner: Mutex<HashMap<ParticipantId, VecDeque<StoredEnvelope>>>,
    max_per_target: usize,
}

impl MessageStore {
    /// Create a store keeping at most `max_per_target` envelopes per target.
    #[must_use]
    pub fn new(max_per_target: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_per_target: max_per_target.max(1),
        }
    }

    /// Store an envelope for a target, stamped with its arrival time.
    ///
    /// Returns the stored envelope's message id as the acknowledgment.
    pub fn submit(
        &self,
        target: ParticipantId,
        envelope: Envelope,
        received_at_ms: i64,
    ) -> MessageId {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = inner.entry(target).or_default();
        queue.push_back(StoredEnvelope {
            received_at_ms,
            envelope,
        });
        while queue.len() > self.max_per_target {
            queue.pop_front();
        }
        envelope.message_id
    }

    /// Envelopes for `target` that arrived strictly after `since_ms`,
    /// in arrival order.
    #[must_use]
    pub fn poll(&self, target: ParticipantId, since_ms: i64) -> Vec<StoredEnvelope> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .get(&target)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|stored| stored.received_at_ms > since_ms)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop envelopes older than the retention horizon.
    ///
    /// Returns how many were removed. Empty targets are removed entirely so
    /// departed participants do not leak map entries.
    pub fn prune(&self, now_ms: i64, retention_ms: i64) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        inner.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|stored| now_ms - stored.received_at_ms <= retention_ms);
            removed += before - queue.len();
            !queue.is_empty()
        });
        removed
    }

    /// Total stored envelopes across all targets.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.values().map(VecDeque::len).sum()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::envelope::{EnvelopePayload, PresenceStatus, PresenceUpdate};

    const TARGET: ParticipantId = ParticipantId(9);

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

    #[test]
    fn test_submit_then_poll_in_arrival_order() {
        let store = MessageStore::new(50);
        let first = envelope(ParticipantId(1));
        let second = envelope(ParticipantId(2));

        store.submit(TARGET, first, 10);
        store.submit(TARGET, second, 20);

        let polled = store.poll(TARGET, 0);
        assert_eq!(polled.len(), 2);
        assert_eq!(polled.first().unwrap().envelope, first);
        assert_eq!(polled.get(1).unwrap().envelope, second);
    }

    #[test]
    fn test_poll_filters_strictly_after_since() {
        let store = MessageStore::new(50);
        store.submit(TARGET, envelope(ParticipantId(1)), 10);
        store.submit(TARGET, envelope(ParticipantId(2)), 20);

        let polled = store.poll(TARGET, 10);
        assert_eq!(polled.len(), 1);
        assert_eq!(polled.first().unwrap().received_at_ms, 20);
    }

    #[test]
    fn test_poll_unknown_target_is_empty() {
        let store = MessageStore::new(50);
        assert!(store.poll(TARGET, 0).is_empty());
    }

    #[test]
    fn test_per_target_cap_drops_oldest() {
        let store = MessageStore::new(3);
        for i in 0..5 {
            store.submit(TARGET, envelope(ParticipantId(i)), i as i64);
        }

        let polled = store.poll(TARGET, -1);
        assert_eq!(polled.len(), 3);
        // The two oldest were dropped.
        assert_eq!(polled.first().unwrap().received_at_ms, 2);
    }

    #[test]
    fn test_prune_drops_old_envelopes_and_empty_targets() {
        let store = MessageStore::new(50);
        store.submit(TARGET, envelope(ParticipantId(1)), 0);
        store.submit(ParticipantId(8), envelope(ParticipantId(2)), 900);

        let removed = store.prune(1000, 500);

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.poll(TARGET, 0).is_empty());
        assert_eq!(store.poll(ParticipantId(8), 0).len(), 1);
    }
}
