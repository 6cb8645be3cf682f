//! Collaborator seams: the real-time media client and the recording
//! subsystem.
//!
//! Both are black boxes to the coordinator. The media client owns audio
//! capture and transmission; the coordinator only issues join/leave/publish
//! commands, consumes membership and connection events, and rides the
//! client's signaling channel as its realtime transport. The recording
//! subsystem receives fire-and-forget start/stop commands keyed by
//! conversation id; retry is owned by that subsystem.

use common::envelope::Envelope;
use common::types::{ConversationId, ParticipantId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Media connection state, as reported by the media client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attached to the media session.
    Connected,
    /// Detached; signaling and membership events will not flow.
    Disconnected,
}

/// Events emitted by the media client.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// A participant joined the media channel.
    ParticipantJoined(ParticipantId),
    /// A participant left the media channel.
    ParticipantLeft(ParticipantId),
    /// A remote participant's audio became available. Media-quality detail;
    /// the coordinator ignores it.
    RemoteAudioAvailable(ParticipantId),
    /// The media connection state changed.
    ConnectionStateChanged(ConnectionState),
    /// An envelope arrived over the client's signaling channel.
    SignalReceived(Envelope),
}

/// Media client failure.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The media session is unreachable or rejected the command.
    #[error("media channel unavailable: {0}")]
    Unavailable(String),
    /// A command requires an active session and there is none.
    #[error("not joined to a media channel")]
    NotJoined,
}

/// Recording subsystem failure. Reported upward; never rolls back presence
/// state.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// The recording command could not be issued.
    #[error("recording command failed: {0}")]
    Failed(String),
}

/// The real-time media client collaborator.
#[async_trait::async_trait]
pub trait MediaClient: Send + Sync {
    /// Join the named channel as `participant`.
    async fn join(&self, channel: &str, participant: ParticipantId) -> Result<(), MediaError>;

    /// Leave the current channel.
    async fn leave(&self) -> Result<(), MediaError>;

    /// Start publishing the local audio track.
    async fn publish_local_audio(&self) -> Result<(), MediaError>;

    /// Mute or unmute the local audio track.
    async fn set_muted(&self, muted: bool) -> Result<(), MediaError>;

    /// Send an envelope over the client's signaling channel.
    ///
    /// Best-effort: delivery silently drops for recipients that are not
    /// attached to the session.
    async fn send_signal(&self, envelope: &Envelope) -> Result<(), MediaError>;
}

/// The recording subsystem collaborator.
#[async_trait::async_trait]
pub trait RecordingClient: Send + Sync {
    /// Begin capturing, correlated by conversation id.
    async fn start_recording(&self, conversation: ConversationId) -> Result<(), RecordingError>;

    /// Stop capturing for the given conversation id.
    async fn stop_recording(&self, conversation: ConversationId) -> Result<(), RecordingError>;
}

/// Channel capacity for media event streams.
pub const MEDIA_EVENT_BUFFER: usize = 256;

/// Create a media event channel with the standard capacity.
#[must_use]
pub fn media_event_channel() -> (mpsc::Sender<MediaEvent>, mpsc::Receiver<MediaEvent>) {
    mpsc::channel(MEDIA_EVENT_BUFFER)
}

/// Mock collaborators for testing.
pub mod mock {
    use super::{
        ConversationId, Envelope, MediaClient, MediaError, MediaEvent, ParticipantId,
        RecordingClient, RecordingError,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Mock media client that records every command.
    pub struct MockMediaClient {
        joined: AtomicBool,
        join_calls: AtomicUsize,
        leave_calls: AtomicUsize,
        publish_calls: AtomicUsize,
        muted: AtomicBool,
        signals: Mutex<Vec<Envelope>>,
        fail_signaling: AtomicBool,
        events: mpsc::Sender<MediaEvent>,
    }

    impl MockMediaClient {
        /// Create a mock plus the event receiver to hand to the actor.
        #[must_use]
        pub fn new() -> (std::sync::Arc<Self>, mpsc::Receiver<MediaEvent>) {
            let (events, receiver) = super::media_event_channel();
            let client = std::sync::Arc::new(Self {
                joined: AtomicBool::new(false),
                join_calls: AtomicUsize::new(0),
                leave_calls: AtomicUsize::new(0),
                publish_calls: AtomicUsize::new(0),
                muted: AtomicBool::new(false),
                signals: Mutex::new(Vec::new()),
                fail_signaling: AtomicBool::new(false),
                events,
            });
            (client, receiver)
        }

        /// Emit an event as if the media session produced it.
        pub async fn emit(&self, event: MediaEvent) {
            let _ = self.events.send(event).await;
        }

        /// Make subsequent `send_signal` calls fail.
        pub fn fail_signaling(&self, fail: bool) {
            self.fail_signaling.store(fail, Ordering::SeqCst);
        }

        /// Signals sent through this client so far.
        pub fn sent_signals(&self) -> Vec<Envelope> {
            self.signals.lock().map(|s| s.clone()).unwrap_or_default()
        }

        /// Whether `join` has been called without a later `leave`.
        pub fn is_joined(&self) -> bool {
            self.joined.load(Ordering::SeqCst)
        }

        /// Number of `join` calls.
        pub fn join_calls(&self) -> usize {
            self.join_calls.load(Ordering::SeqCst)
        }

        /// Number of `publish_local_audio` calls.
        pub fn publish_calls(&self) -> usize {
            self.publish_calls.load(Ordering::SeqCst)
        }

        /// Current mute flag.
        pub fn is_muted(&self) -> bool {
            self.muted.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MediaClient for MockMediaClient {
        async fn join(
            &self,
            _channel: &str,
            _participant: ParticipantId,
        ) -> Result<(), MediaError> {
            self.join_calls.fetch_add(1, Ordering::SeqCst);
            self.joined.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn leave(&self) -> Result<(), MediaError> {
            self.leave_calls.fetch_add(1, Ordering::SeqCst);
            self.joined.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn publish_local_audio(&self) -> Result<(), MediaError> {
            self.publish_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn set_muted(&self, muted: bool) -> Result<(), MediaError> {
            self.muted.store(muted, Ordering::SeqCst);
            Ok(())
        }

        async fn send_signal(&self, envelope: &Envelope) -> Result<(), MediaError> {
            if self.fail_signaling.load(Ordering::SeqCst) {
                return Err(MediaError::Unavailable("mock signaling failure".into()));
            }
            if let Ok(mut signals) = self.signals.lock() {
                signals.push(*envelope);
            }
            Ok(())
        }
    }

    /// Mock recorder that records start/stop commands.
    #[derive(Default)]
    pub struct MockRecorder {
        started: Mutex<Vec<ConversationId>>,
        stopped: Mutex<Vec<ConversationId>>,
        fail: AtomicBool,
    }

    impl MockRecorder {
        /// Create a mock recorder.
        #[must_use]
        pub fn new() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self::default())
        }

        /// Make subsequent commands fail.
        pub fn fail_commands(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Conversations for which recording was started.
        pub fn started(&self) -> Vec<ConversationId> {
            self.started.lock().map(|s| s.clone()).unwrap_or_default()
        }

        /// Conversations for which recording was stopped.
        pub fn stopped(&self) -> Vec<ConversationId> {
            self.stopped.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl RecordingClient for MockRecorder {
        async fn start_recording(
            &self,
            conversation: ConversationId,
        ) -> Result<(), RecordingError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RecordingError::Failed("mock recorder failure".into()));
            }
            if let Ok(mut started) = self.started.lock() {
                started.push(conversation);
            }
            Ok(())
        }

        async fn stop_recording(
            &self,
            conversation: ConversationId,
        ) -> Result<(), RecordingError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RecordingError::Failed("mock recorder failure".into()));
            }
            if let Ok(mut stopped) = self.stopped.lock() {
                stopped.push(conversation);
            }
            Ok(())
        }
    }
}
