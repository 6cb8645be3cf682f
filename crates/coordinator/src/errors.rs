//! Coordinator error types.
//!
//! The taxonomy mirrors how failures are handled, not just where they come
//! from: transport unavailability and stale/duplicate envelopes are absorbed
//! inside the reconciliation core and never become errors; invalid local
//! actions are typed no-op outcomes. Only collaborator failures and plumbing
//! breakage surface here.

use crate::media::{MediaError, RecordingError};
use thiserror::Error;

/// Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The actor mailbox or a reply channel is gone (shutdown or crash).
    #[error("coordinator unavailable: {0}")]
    Mailbox(String),

    /// The media client rejected a command.
    #[error("media client error: {0}")]
    Media(#[from] MediaError),

    /// The recording subsystem rejected a command.
    #[error("recording error: {0}")]
    Recording(#[from] RecordingError),

    /// The relay client could not be constructed.
    #[error("relay error: {0}")]
    Relay(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", CoordError::Mailbox("channel closed".to_string())),
            "coordinator unavailable: channel closed"
        );
        assert_eq!(
            format!("{}", CoordError::Relay("bad url".to_string())),
            "relay error: bad url"
        );
    }

    #[test]
    fn test_media_error_conversion() {
        let err: CoordError = MediaError::NotJoined.into();
        assert!(matches!(err, CoordError::Media(MediaError::NotJoined)));
        assert_eq!(
            err.to_string(),
            "media client error: not joined to a media channel"
        );
    }

    #[test]
    fn test_recording_error_conversion() {
        let err: CoordError = RecordingError::Failed("upload queue full".to_string()).into();
        assert!(matches!(err, CoordError::Recording(_)));
    }
}
