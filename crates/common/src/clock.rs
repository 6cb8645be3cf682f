//! Wall-clock helpers.
//!
//! All timestamps in Parley are unix epoch milliseconds (`i64`), matching the
//! relay wire contract. State-machine code takes timestamps as arguments so it
//! stays deterministic under test; only the edges call [`now_ms`].

/// Current wall-clock time as unix epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
