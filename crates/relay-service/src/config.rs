//! Relay service configuration.
//!
//! Loaded from environment variables with defaults suitable for local
//! development.

use std::collections::HashMap;
use std::env;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default cap on stored envelopes per target.
pub const DEFAULT_MAX_MESSAGES_PER_TARGET: usize = 50;

/// Default retention horizon in seconds.
pub const DEFAULT_RETENTION_SECONDS: u64 = 300;

/// Default prune interval in seconds.
pub const DEFAULT_PRUNE_INTERVAL_SECONDS: u64 = 60;

/// Relay service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address.
    pub bind_address: String,

    /// Most recent envelopes kept per target, to bound memory.
    pub max_messages_per_target: usize,

    /// Stored envelopes older than this are pruned.
    pub retention_seconds: u64,

    /// How often the prune task runs.
    pub prune_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            max_messages_per_target: DEFAULT_MAX_MESSAGES_PER_TARGET,
            retention_seconds: DEFAULT_RETENTION_SECONDS,
            prune_interval_seconds: DEFAULT_PRUNE_INTERVAL_SECONDS,
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

        Self {
            bind_address: vars
                .get("RELAY_BIND_ADDRESS")
                .cloned()
                .unwrap_or(defaults.bind_address),
            max_messages_per_target: vars
                .get("RELAY_MAX_MESSAGES_PER_TARGET")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_MESSAGES_PER_TARGET),
            retention_seconds: vars
                .get("RELAY_RETENTION_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETENTION_SECONDS),
            prune_interval_seconds: vars
                .get("RELAY_PRUNE_INTERVAL_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PRUNE_INTERVAL_SECONDS),
        }
    }

    /// Retention horizon in milliseconds, for the store.
    #[must_use]
    pub fn retention_ms(&self) -> i64 {
        i64::try_from(self.retention_seconds)
            .unwrap_or(i64::MAX / 1_000)
            .saturating_mul(1_000)
    }
}
