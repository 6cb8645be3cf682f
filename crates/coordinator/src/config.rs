//! Coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults;
//! nothing is required, so a bare `coordinator` binary comes up against a
//! local relay.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Default channel name.
pub const DEFAULT_CHANNEL: &str = "parley";

/// Default relay base URL.
pub const DEFAULT_RELAY_URL: &str = "http://localhost:8090";

/// Default relay poll interval in milliseconds.
pub const DEFAULT_RELAY_POLL_INTERVAL_MS: u64 = 750;

/// Default per-request relay timeout in milliseconds.
pub const DEFAULT_RELAY_TIMEOUT_MS: u64 = 10_000;

/// Default maximum relay send attempts.
pub const DEFAULT_RELAY_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for relay send backoff in milliseconds.
pub const DEFAULT_RELAY_BACKOFF_BASE_MS: u64 = 500;

/// Default maximum relay send backoff in milliseconds.
pub const DEFAULT_RELAY_BACKOFF_MAX_MS: u64 = 8_000;

/// Default presence staleness horizon in seconds.
pub const DEFAULT_PRESENCE_HORIZON_SECONDS: u64 = 60;

/// Default conversation staleness horizon in seconds (longer than presence:
/// defends against a partner disappearing without an end event).
pub const DEFAULT_CONVERSATION_HORIZON_SECONDS: u64 = 3_600;

/// Default garbage-collection sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Default presence heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 20;

/// Default dedup set capacity.
pub const DEFAULT_DEDUP_CAPACITY: usize = 512;

/// Default dedup entry lifetime in seconds.
pub const DEFAULT_DEDUP_TTL_SECONDS: u64 = 30;

/// Default maximum media reconnect attempts.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for media reconnect backoff in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 2_000;

/// Coordinator configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Channel of participants this coordinator belongs to.
    pub channel: String,

    /// Fixed participant id; generated when absent.
    pub participant_id: Option<u64>,

    /// Relay service base URL.
    pub relay_url: String,

    /// Relay poll interval.
    pub relay_poll_interval: Duration,

    /// Per-request relay timeout.
    pub relay_timeout: Duration,

    /// Maximum relay send attempts before the event is abandoned on that
    /// transport (redundant transports cover it).
    pub relay_max_attempts: u32,

    /// Base delay for relay send backoff (doubles per attempt).
    pub relay_backoff_base: Duration,

    /// Ceiling for relay send backoff.
    pub relay_backoff_max: Duration,

    /// Presence staleness horizon.
    pub presence_horizon: Duration,

    /// Conversation staleness horizon.
    pub conversation_horizon: Duration,

    /// Garbage-collection sweep interval.
    pub sweep_interval: Duration,

    /// Presence heartbeat interval.
    pub heartbeat_interval: Duration,

    /// Dedup set capacity.
    pub dedup_capacity: usize,

    /// Dedup entry lifetime.
    pub dedup_ttl: Duration,

    /// Maximum media reconnect attempts.
    pub reconnect_max_attempts: u32,

    /// Base delay for media reconnect backoff (doubles per attempt).
    pub reconnect_base_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            participant_id: None,
            relay_url: DEFAULT_RELAY_URL.to_string(),
            relay_poll_interval: Duration::from_millis(DEFAULT_RELAY_POLL_INTERVAL_MS),
            relay_timeout: Duration::from_millis(DEFAULT_RELAY_TIMEOUT_MS),
            relay_max_attempts: DEFAULT_RELAY_MAX_ATTEMPTS,
            relay_backoff_base: Duration::from_millis(DEFAULT_RELAY_BACKOFF_BASE_MS),
            relay_backoff_max: Duration::from_millis(DEFAULT_RELAY_BACKOFF_MAX_MS),
            presence_horizon: Duration::from_secs(DEFAULT_PRESENCE_HORIZON_SECONDS),
            conversation_horizon: Duration::from_secs(DEFAULT_CONVERSATION_HORIZON_SECONDS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECONDS),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            dedup_ttl: Duration::from_secs(DEFAULT_DEDUP_TTL_SECONDS),
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let get_u64 = |key: &str, fallback: u64| -> u64 {
            vars.get(key).and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };
        let get_u32 = |key: &str, fallback: u32| -> u32 {
            vars.get(key).and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };

        Self {
            channel: vars
                .get("COORD_CHANNEL")
                .cloned()
                .unwrap_or(defaults.channel),
            participant_id: vars
                .get("COORD_PARTICIPANT_ID")
                .and_then(|s| s.parse().ok()),
            relay_url: vars
                .get("COORD_RELAY_URL")
                .cloned()
                .unwrap_or(defaults.relay_url),
            relay_poll_interval: Duration::from_millis(get_u64(
                "COORD_RELAY_POLL_INTERVAL_MS",
                DEFAULT_RELAY_POLL_INTERVAL_MS,
            )),
            relay_timeout: Duration::from_millis(get_u64(
                "COORD_RELAY_TIMEOUT_MS",
                DEFAULT_RELAY_TIMEOUT_MS,
            )),
            relay_max_attempts: get_u32("COORD_RELAY_MAX_ATTEMPTS", DEFAULT_RELAY_MAX_ATTEMPTS),
            relay_backoff_base: Duration::from_millis(get_u64(
                "COORD_RELAY_BACKOFF_BASE_MS",
                DEFAULT_RELAY_BACKOFF_BASE_MS,
            )),
            relay_backoff_max: Duration::from_millis(get_u64(
                "COORD_RELAY_BACKOFF_MAX_MS",
                DEFAULT_RELAY_BACKOFF_MAX_MS,
            )),
            presence_horizon: Duration::from_secs(get_u64(
                "COORD_PRESENCE_HORIZON_SECONDS",
                DEFAULT_PRESENCE_HORIZON_SECONDS,
            )),
            conversation_horizon: Duration::from_secs(get_u64(
                "COORD_CONVERSATION_HORIZON_SECONDS",
                DEFAULT_CONVERSATION_HORIZON_SECONDS,
            )),
            sweep_interval: Duration::from_secs(get_u64(
                "COORD_SWEEP_INTERVAL_SECONDS",
                DEFAULT_SWEEP_INTERVAL_SECONDS,
            )),
            heartbeat_interval: Duration::from_secs(get_u64(
                "COORD_HEARTBEAT_INTERVAL_SECONDS",
                DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            )),
            dedup_capacity: vars
                .get("COORD_DEDUP_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DEDUP_CAPACITY),
            dedup_ttl: Duration::from_secs(get_u64(
                "COORD_DEDUP_TTL_SECONDS",
                DEFAULT_DEDUP_TTL_SECONDS,
            )),
            reconnect_max_attempts: get_u32(
                "COORD_RECONNECT_MAX_ATTEMPTS",
                DEFAULT_RECONNECT_MAX_ATTEMPTS,
            ),
            reconnect_base_delay: Duration::from_millis(get_u64(
                "COORD_RECONNECT_BASE_DELAY_MS",
                DEFAULT_RECONNECT_BASE_DELAY_MS,
            )),
        }
    }

    /// Presence staleness horizon in milliseconds, for the engine.
    #[must_use]
    pub fn presence_horizon_ms(&self) -> i64 {
        i64::try_from(self.presence_horizon.as_millis()).unwrap_or(i64::MAX)
    }

    /// Conversation staleness horizon in milliseconds, for the engine.
    #[must_use]
    pub fn conversation_horizon_ms(&self) -> i64 {
        i64::try_from(self.conversation_horizon.as_millis()).unwrap_or(i64::MAX)
    }

    /// Dedup entry lifetime in milliseconds, for the engine.
    #[must_use]
    pub fn dedup_ttl_ms(&self) -> i64 {
        i64::try_from(self.dedup_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}
