//! Lightweight coordinator metrics.
//!
//! Atomic counters shared between the actor and its tasks; cheap enough to
//! bump on every envelope. Exposed through snapshots for logging and state
//! queries.

use crate::transport::TransportId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared coordinator counters.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    envelopes_received: AtomicU64,
    envelopes_realtime: AtomicU64,
    envelopes_relay: AtomicU64,
    envelopes_local: AtomicU64,
    envelopes_deduplicated: AtomicU64,
    envelopes_stale: AtomicU64,
    sync_conflicts: AtomicU64,
    conversations_started: AtomicU64,
    conversations_ended: AtomicU64,
    fanout_total_failures: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Envelopes received across all transports.
    pub envelopes_received: u64,
    /// Envelopes dropped by the recently-seen set.
    pub envelopes_deduplicated: u64,
    /// Envelopes dropped by last-write-wins.
    pub envelopes_stale: u64,
    /// Envelopes discarded as sync conflicts.
    pub sync_conflicts: u64,
    /// Conversations started (local or accepted remote).
    pub conversations_started: u64,
    /// Conversations ended (local, remote, or swept).
    pub conversations_ended: u64,
    /// Emissions for which every transport was unavailable.
    pub fanout_total_failures: u64,
}

impl CoordinatorMetrics {
    /// Create shared metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record an envelope received on a transport.
    pub fn record_envelope(&self, via: TransportId) {
        self.envelopes_received.fetch_add(1, Ordering::Relaxed);
        let counter = match via {
            TransportId::Realtime => &self.envelopes_realtime,
            TransportId::Relay => &self.envelopes_relay,
            TransportId::LocalBroadcast => &self.envelopes_local,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate dropped by the recently-seen set.
    pub fn record_duplicate(&self) {
        self.envelopes_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope dropped by last-write-wins.
    pub fn record_stale(&self) {
        self.envelopes_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a discarded sync conflict.
    pub fn record_conflict(&self) {
        self.sync_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conversation start.
    pub fn record_conversation_started(&self) {
        self.conversations_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conversation end.
    pub fn record_conversation_ended(&self) {
        self.conversations_ended.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an emission no transport accepted.
    pub fn record_fanout_failure(&self) {
        self.fanout_total_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Envelopes received on a specific transport.
    #[must_use]
    pub fn envelopes_via(&self, via: TransportId) -> u64 {
        let counter = match via {
            TransportId::Realtime => &self.envelopes_realtime,
            TransportId::Relay => &self.envelopes_relay,
            TransportId::LocalBroadcast => &self.envelopes_local,
        };
        counter.load(Ordering::Relaxed)
    }

    /// Copy the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            envelopes_received: self.envelopes_received.load(Ordering::Relaxed),
            envelopes_deduplicated: self.envelopes_deduplicated.load(Ordering::Relaxed),
            envelopes_stale: self.envelopes_stale.load(Ordering::Relaxed),
            sync_conflicts: self.sync_conflicts.load(Ordering::Relaxed),
            conversations_started: self.conversations_started.load(Ordering::Relaxed),
            conversations_ended: self.conversations_ended.load(Ordering::Relaxed),
            fanout_total_failures: self.fanout_total_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = CoordinatorMetrics::new();

        metrics.record_envelope(TransportId::Relay);
        metrics.record_envelope(TransportId::Relay);
        metrics.record_envelope(TransportId::Realtime);
        metrics.record_duplicate();
        metrics.record_conflict();
        metrics.record_conversation_started();
        metrics.record_conversation_ended();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.envelopes_received, 3);
        assert_eq!(snapshot.envelopes_deduplicated, 1);
        assert_eq!(snapshot.sync_conflicts, 1);
        assert_eq!(snapshot.conversations_started, 1);
        assert_eq!(snapshot.conversations_ended, 1);
        assert_eq!(metrics.envelopes_via(TransportId::Relay), 2);
        assert_eq!(metrics.envelopes_via(TransportId::Realtime), 1);
        assert_eq!(metrics.envelopes_via(TransportId::LocalBroadcast), 0);
    }

    #[test]
    fn test_snapshot_is_stable_copy() {
        let metrics = CoordinatorMetrics::new();
        metrics.record_stale();

        let before = metrics.snapshot();
        metrics.record_stale();
        let after = metrics.snapshot();

        assert_eq!(before.envelopes_stale, 1);
        assert_eq!(after.envelopes_stale, 2);
    }
}
