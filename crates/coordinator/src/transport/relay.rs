//! Relay adapter.
//!
//! The out-of-band path: envelopes are pushed to the relay service over HTTP
//! and pulled back by polling. Durable and queryable, works across fully
//! disjoint devices; higher latency because the receiving side polls on an
//! interval.
//!
//! Sends retry with exponential backoff up to a bounded attempt count, then
//! the event is abandoned on this transport - it is still considered sent
//! for local purposes, since the redundant transports may have succeeded.
//! Every request runs under a bounded timeout so a wedged relay never blocks
//! the caller.

use super::{DeliveryOutcome, Transport, TransportId};
use crate::actors::CoordinatorActorHandle;
use crate::config::Config;
use crate::errors::CoordError;
use common::envelope::Envelope;
use common::relay::{PollResponse, SubmitRequest};
use common::types::ParticipantId;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded retry-with-backoff policy for relay sends.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per target before the send is abandoned.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff delay after the given 1-based attempt number.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// HTTP client for the relay service.
pub struct RelayTransport {
    client: reqwest::Client,
    messages_url: String,
    retry: RetryPolicy,
}

impl RelayTransport {
    /// Build a relay transport from coordinator configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoordError::Relay` if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self, CoordError> {
        let client = reqwest::Client::builder()
            .timeout(config.relay_timeout)
            .build()
            .map_err(|e| CoordError::Relay(format!("failed to build relay client: {e}")))?;

        Ok(Self {
            client,
            messages_url: messages_url(&config.relay_url),
            retry: RetryPolicy {
                max_attempts: config.relay_max_attempts.max(1),
                base_delay: config.relay_backoff_base,
                max_delay: config.relay_backoff_max,
            },
        })
    }

    /// Submit one envelope to one target, retrying with backoff.
    async fn submit_to(&self, envelope: &Envelope, target: ParticipantId) -> DeliveryOutcome {
        let request = SubmitRequest {
            target,
            envelope: *envelope,
        };

        for attempt in 1..=self.retry.max_attempts {
            let result = self
                .client
                .post(&self.messages_url)
                .json(&request)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return DeliveryOutcome::Delivered;
                }
                Ok(response) => {
                    debug!(
                        target: "coordinator.transport.relay",
                        status = %response.status(),
                        attempt,
                        target_participant = %target,
                        "Relay rejected submit"
                    );
                }
                Err(error) => {
                    debug!(
                        target: "coordinator.transport.relay",
                        error = %error,
                        attempt,
                        target_participant = %target,
                        "Relay submit failed"
                    );
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay_after(attempt)).await;
            }
        }

        warn!(
            target: "coordinator.transport.relay",
            target_participant = %target,
            attempts = self.retry.max_attempts,
            "Relay submit abandoned after bounded retries"
        );
        DeliveryOutcome::Unavailable
    }
}

#[async_trait::async_trait]
impl Transport for RelayTransport {
    fn id(&self) -> TransportId {
        TransportId::Relay
    }

    async fn send(&self, envelope: &Envelope, targets: &[ParticipantId]) -> DeliveryOutcome {
        if targets.is_empty() {
            // Nobody to address; the relay is point-to-point.
            return DeliveryOutcome::Delivered;
        }

        let mut delivered = 0usize;
        for &target in targets {
            if self.submit_to(envelope, target).await == DeliveryOutcome::Delivered {
                delivered += 1;
            }
        }

        if delivered > 0 {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Unavailable
        }
    }
}

/// Spawn the relay poll loop for a participant.
///
/// Polls on a fixed interval, watermarked by relay arrival time, and feeds
/// received envelopes into the coordinator actor. Poll failures are expected
/// (the relay may be transiently unreachable) and logged at debug level.
/// Runs until cancelled.
pub fn spawn_relay_poll(
    config: &Config,
    participant_id: ParticipantId,
    handle: CoordinatorActorHandle,
    cancel_token: CancellationToken,
) -> Result<JoinHandle<()>, CoordError> {
    let client = reqwest::Client::builder()
        .timeout(config.relay_timeout)
        .build()
        .map_err(|e| CoordError::Relay(format!("failed to build relay poll client: {e}")))?;
    let url = messages_url(&config.relay_url);
    let poll_interval = config.relay_poll_interval;

    Ok(tokio::spawn(async move {
        // Polls run one millisecond behind the watermark: a message arriving
        // in the same millisecond as the previous poll would otherwise be
        // filtered out forever. The dedup set absorbs the overlap.
        let mut watermark: i64 = 0;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            target: "coordinator.transport.relay",
            participant_id = %participant_id,
            poll_interval_ms = poll_interval.as_millis(),
            "Relay poll loop started"
        );

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(
                        target: "coordinator.transport.relay",
                        participant_id = %participant_id,
                        "Relay poll loop stopped"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    let result = client
                        .get(&url)
                        .query(&[
                            ("participant_id", participant_id.0.to_string()),
                            ("since_ms", watermark.saturating_sub(1).to_string()),
                        ])
                        .send()
                        .await;

                    let response = match result {
                        Ok(response) if response.status().is_success() => response,
                        Ok(response) => {
                            debug!(
                                target: "coordinator.transport.relay",
                                status = %response.status(),
                                "Relay poll rejected"
                            );
                            continue;
                        }
                        Err(error) => {
                            debug!(
                                target: "coordinator.transport.relay",
                                error = %error,
                                "Relay poll failed"
                            );
                            continue;
                        }
                    };

                    let poll: PollResponse = match response.json().await {
                        Ok(poll) => poll,
                        Err(error) => {
                            debug!(
                                target: "coordinator.transport.relay",
                                error = %error,
                                "Relay poll body unreadable"
                            );
                            continue;
                        }
                    };

                    for stored in poll.messages {
                        watermark = watermark.max(stored.received_at_ms);
                        if handle
                            .deliver_envelope(stored.envelope, TransportId::Relay)
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
        }
    }))
}

fn messages_url(base_url: &str) -> String {
    format!("{}/api/v1/messages", base_url.trim_end_matches('/'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3_000),
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(3_000));
        assert_eq!(policy.delay_after(10), Duration::from_millis(3_000));
    }

    #[test]
    fn test_messages_url_normalizes_trailing_slash() {
        assert_eq!(
            messages_url("http://localhost:8090/"),
            "http://localhost:8090/api/v1/messages"
        );
        assert_eq!(
            messages_url("http://localhost:8090"),
            "http://localhost:8090/api/v1/messages"
        );
    }

    #[tokio::test]
    async fn test_send_with_no_targets_is_trivially_delivered() {
        let config = Config::default();
        let transport = RelayTransport::new(&config).unwrap();

        let envelope = Envelope::new(
            ParticipantId(1),
            0,
            common::envelope::EnvelopePayload::Presence(common::envelope::PresenceUpdate {
                participant: ParticipantId(1),
                status: common::envelope::PresenceStatus::Available,
                partner: None,
                joined_at_ms: 0,
            }),
        );

        assert_eq!(
            transport.send(&envelope, &[]).await,
            DeliveryOutcome::Delivered
        );
    }
}
