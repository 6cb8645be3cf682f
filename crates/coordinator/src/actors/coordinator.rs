//! `CoordinatorActor` - the single logical actor owning one participant's
//! state.
//!
//! Each participant process runs exactly one coordinator actor. It:
//! - Owns the Reconciliation Engine (Presence Registry + Conversation Table)
//! - Serializes every mutation: adapter pumps, media events, local actions,
//!   the heartbeat tick, and the garbage-collection tick all flow through
//!   one mailbox
//! - Executes the engine's effects: recording commands inline (they must
//!   precede emissions), envelope fan-out on detached tasks (relay retries
//!   must never block the mailbox)
//! - Reattaches to the media session with bounded backoff after a
//!   connection loss

use super::messages::CoordinatorMessage;
use super::metrics::CoordinatorMetrics;
use crate::config::Config;
use crate::engine::{Disposition, Effect, EndOutcome, Reconciler, StateSnapshot};
use crate::errors::CoordError;
use crate::media::{ConnectionState, MediaClient, MediaEvent, RecordingClient};
use crate::pairing::PairingOutcome;
use crate::transport::{fan_out, Transport, TransportId};
use common::clock;
use common::envelope::Envelope;
use common::types::ParticipantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 500;

/// Handle to a coordinator actor.
#[derive(Clone)]
pub struct CoordinatorActorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    self_id: ParticipantId,
}

impl CoordinatorActorHandle {
    /// Our participant id.
    #[must_use]
    pub fn self_id(&self) -> ParticipantId {
        self.self_id
    }

    /// Join the channel and announce presence.
    pub async fn connect(&self) -> Result<(), CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Connect { respond_to: tx })
            .await?;
        self.receive(rx).await?
    }

    /// Leave the channel.
    pub async fn disconnect(&self) -> Result<(), CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Disconnect { respond_to: tx })
            .await?;
        self.receive(rx).await?
    }

    /// Request a conversation, optionally with a specific participant.
    pub async fn request_pairing(
        &self,
        target: Option<ParticipantId>,
    ) -> Result<PairingOutcome, CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::RequestPairing {
            target,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await
    }

    /// End the conversation we are currently in.
    pub async fn end_conversation(&self) -> Result<EndOutcome, CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::EndConversation { respond_to: tx })
            .await?;
        self.receive(rx).await
    }

    /// Mute or unmute the local audio track.
    pub async fn set_muted(&self, muted: bool) -> Result<(), CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::SetMuted {
            muted,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Get a snapshot of the coordinator's state.
    pub async fn get_state(&self) -> Result<StateSnapshot, CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetState { respond_to: tx })
            .await?;
        self.receive(rx).await
    }

    /// Deliver an envelope received on a transport (used by adapter pumps).
    pub async fn deliver_envelope(
        &self,
        envelope: Envelope,
        via: TransportId,
    ) -> Result<(), CoordError> {
        self.send(CoordinatorMessage::EnvelopeReceived { envelope, via })
            .await
    }

    /// Deliver a media client event (used by the media pump).
    pub async fn media_event(&self, event: MediaEvent) -> Result<(), CoordError> {
        self.send(CoordinatorMessage::Media(event)).await
    }

    /// Cancel the actor and everything running under its token.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the actor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for tasks that must die with the actor.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn send(&self, message: CoordinatorMessage) -> Result<(), CoordError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CoordError::Mailbox(format!("mailbox send failed: {e}")))
    }

    async fn receive<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, CoordError> {
        rx.await
            .map_err(|e| CoordError::Mailbox(format!("response receive failed: {e}")))
    }
}

/// The coordinator actor implementation.
pub struct CoordinatorActor {
    self_id: ParticipantId,
    config: Config,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    engine: Reconciler,
    transports: Vec<Arc<dyn Transport>>,
    media: Option<Arc<dyn MediaClient>>,
    recorder: Option<Arc<dyn RecordingClient>>,
    metrics: Arc<CoordinatorMetrics>,
    connected: bool,
}

impl CoordinatorActor {
    /// Spawn a coordinator actor.
    ///
    /// Returns a handle and the task join handle. A `media_events` receiver,
    /// when present, is pumped into the mailbox by a task owned by the actor.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        self_id: ParticipantId,
        config: Config,
        transports: Vec<Arc<dyn Transport>>,
        media: Option<Arc<dyn MediaClient>>,
        media_events: Option<mpsc::Receiver<MediaEvent>>,
        recorder: Option<Arc<dyn RecordingClient>>,
        metrics: Arc<CoordinatorMetrics>,
        cancel_token: CancellationToken,
    ) -> (CoordinatorActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let engine = Reconciler::new(self_id, config.dedup_capacity, config.dedup_ttl_ms());

        if let Some(events) = media_events {
            spawn_media_pump(events, sender.clone(), cancel_token.child_token());
        }

        let actor = Self {
            self_id,
            config,
            receiver,
            sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            engine,
            transports,
            media,
            recorder,
            metrics,
            connected: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CoordinatorActorHandle {
            sender,
            cancel_token,
            self_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "coordinator.actor", fields(participant_id = %self.self_id))]
    async fn run(mut self) {
        info!(
            target: "coordinator.actor",
            participant_id = %self.self_id,
            channel = %self.config.channel,
            "Coordinator actor started"
        );

        let mut sweep_ticker = tokio::time::interval(self.config.sweep_interval);
        sweep_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut heartbeat_ticker = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "coordinator.actor",
                        participant_id = %self.self_id,
                        "Coordinator actor received cancellation signal"
                    );
                    break;
                }

                _ = sweep_ticker.tick() => {
                    self.handle_sweep().await;
                }

                _ = heartbeat_ticker.tick() => {
                    let effects = self.engine.heartbeat(clock::now_ms());
                    self.execute_effects(effects).await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "coordinator.actor",
                                participant_id = %self.self_id,
                                "Coordinator mailbox closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "coordinator.actor",
            participant_id = %self.self_id,
            "Coordinator actor stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Connect { respond_to } => {
                let result = self.handle_connect().await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Disconnect { respond_to } => {
                let result = self.handle_disconnect().await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::RequestPairing { target, respond_to } => {
                let (outcome, effects) = self.engine.request_pairing(target, clock::now_ms());
                self.execute_effects(effects).await;
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::EndConversation { respond_to } => {
                let (outcome, effects) = self.engine.end_conversation(clock::now_ms());
                self.execute_effects(effects).await;
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::SetMuted { muted, respond_to } => {
                let result = match &self.media {
                    Some(media) => media.set_muted(muted).await.map_err(CoordError::from),
                    None => Err(CoordError::Media(crate::media::MediaError::NotJoined)),
                };
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::EnvelopeReceived { envelope, via } => {
                self.handle_envelope(envelope, via).await;
            }

            CoordinatorMessage::Media(event) => {
                self.handle_media_event(event).await;
            }

            CoordinatorMessage::AttemptReconnect { attempt } => {
                self.handle_reconnect_attempt(attempt).await;
            }

            CoordinatorMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.engine.snapshot());
            }
        }
    }

    async fn handle_connect(&mut self) -> Result<(), CoordError> {
        if self.connected {
            return Ok(());
        }

        if let Some(media) = &self.media {
            media.join(&self.config.channel, self.self_id).await?;
            // Publish failure does not roll back the join; presence must not
            // desynchronize over an audio problem.
            if let Err(error) = media.publish_local_audio().await {
                warn!(
                    target: "coordinator.actor",
                    error = %error,
                    "Failed to publish local audio"
                );
            }
        }

        self.connected = true;
        let effects = self.engine.connect(clock::now_ms());
        self.execute_effects(effects).await;

        info!(
            target: "coordinator.actor",
            participant_id = %self.self_id,
            channel = %self.config.channel,
            "Connected to channel"
        );
        Ok(())
    }

    async fn handle_disconnect(&mut self) -> Result<(), CoordError> {
        // Emit conversation teardown while transports are still up.
        let effects = self.engine.disconnect(clock::now_ms());
        self.execute_effects(effects).await;

        if let Some(media) = &self.media {
            if let Err(error) = media.leave().await {
                warn!(
                    target: "coordinator.actor",
                    error = %error,
                    "Media leave failed during disconnect"
                );
            }
        }

        self.connected = false;
        info!(
            target: "coordinator.actor",
            participant_id = %self.self_id,
            "Disconnected from channel"
        );
        Ok(())
    }

    async fn handle_envelope(&mut self, envelope: Envelope, via: TransportId) {
        self.metrics.record_envelope(via);
        let (disposition, effects) = self.engine.apply_envelope(&envelope, clock::now_ms());

        match disposition {
            Disposition::Applied => {
                debug!(
                    target: "coordinator.actor",
                    kind = envelope.kind(),
                    via = %via,
                    sender = %envelope.sender,
                    "Envelope applied"
                );
            }
            Disposition::Duplicate => {
                self.metrics.record_duplicate();
                debug!(
                    target: "coordinator.actor",
                    message_id = %envelope.message_id,
                    via = %via,
                    "Duplicate envelope dropped"
                );
            }
            Disposition::Stale => {
                self.metrics.record_stale();
                debug!(
                    target: "coordinator.actor",
                    message_id = %envelope.message_id,
                    via = %via,
                    "Stale envelope dropped"
                );
            }
            Disposition::Conflict => {
                self.metrics.record_conflict();
                warn!(
                    target: "coordinator.actor",
                    kind = envelope.kind(),
                    sender = %envelope.sender,
                    "Sync conflict: envelope disagrees with local canonical state, discarded"
                );
            }
            Disposition::SelfEcho => {}
        }

        self.execute_effects(effects).await;
    }

    async fn handle_media_event(&mut self, event: MediaEvent) {
        let now_ms = clock::now_ms();
        match event {
            MediaEvent::ParticipantJoined(participant) => {
                debug!(
                    target: "coordinator.actor",
                    participant = %participant,
                    "Participant joined media channel"
                );
                let effects = self.engine.peer_joined(participant, now_ms);
                self.execute_effects(effects).await;
            }

            MediaEvent::ParticipantLeft(participant) => {
                debug!(
                    target: "coordinator.actor",
                    participant = %participant,
                    "Participant left media channel"
                );
                let effects = self.engine.peer_left(participant, now_ms);
                self.execute_effects(effects).await;
            }

            MediaEvent::RemoteAudioAvailable(participant) => {
                debug!(
                    target: "coordinator.actor",
                    participant = %participant,
                    "Remote audio available"
                );
            }

            MediaEvent::ConnectionStateChanged(ConnectionState::Connected) => {
                info!(target: "coordinator.actor", "Media connection established");
                self.connected = true;
            }

            MediaEvent::ConnectionStateChanged(ConnectionState::Disconnected) => {
                warn!(target: "coordinator.actor", "Media connection lost");
                self.connected = false;
                if self.media.is_some() && self.config.reconnect_max_attempts > 0 {
                    self.schedule_reconnect(1);
                }
            }

            MediaEvent::SignalReceived(envelope) => {
                self.handle_envelope(envelope, TransportId::Realtime).await;
            }
        }
    }

    async fn handle_reconnect_attempt(&mut self, attempt: u32) {
        if self.connected {
            return;
        }
        let Some(media) = self.media.clone() else {
            return;
        };

        match media.join(&self.config.channel, self.self_id).await {
            Ok(()) => {
                if let Err(error) = media.publish_local_audio().await {
                    warn!(
                        target: "coordinator.actor",
                        error = %error,
                        "Failed to republish local audio after reconnect"
                    );
                }
                self.connected = true;
                info!(
                    target: "coordinator.actor",
                    attempt,
                    "Media reconnect succeeded"
                );
                // Re-announce so peers refresh our record promptly.
                let effects = self.engine.heartbeat(clock::now_ms());
                self.execute_effects(effects).await;
            }
            Err(error) => {
                if attempt < self.config.reconnect_max_attempts {
                    warn!(
                        target: "coordinator.actor",
                        error = %error,
                        attempt,
                        "Media reconnect failed, will retry"
                    );
                    self.schedule_reconnect(attempt + 1);
                } else {
                    error!(
                        target: "coordinator.actor",
                        error = %error,
                        attempts = attempt,
                        "Media reconnect abandoned after bounded retries"
                    );
                }
            }
        }
    }

    fn schedule_reconnect(&self, attempt: u32) {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .reconnect_base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        let sender = self.sender.clone();
        let cancel_token = self.cancel_token.child_token();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = sender
                        .send(CoordinatorMessage::AttemptReconnect { attempt })
                        .await;
                }
            }
        });
    }

    async fn handle_sweep(&mut self) {
        let (report, effects) = self.engine.sweep(
            clock::now_ms(),
            self.config.presence_horizon_ms(),
            self.config.conversation_horizon_ms(),
        );

        if !report.removed_participants.is_empty() || report.removed_conversations > 0 {
            info!(
                target: "coordinator.actor",
                removed_participants = report.removed_participants.len(),
                released_participants = report.released_participants.len(),
                removed_conversations = report.removed_conversations,
                "Staleness sweep"
            );
        }

        self.execute_effects(effects).await;
    }

    /// Execute engine effects.
    ///
    /// Recording commands run inline, in order, so they complete before the
    /// emissions that follow them in the effect list. Fan-out runs on
    /// detached tasks: relay retries with backoff must never block the
    /// mailbox.
    async fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartRecording(conversation) => {
                    self.metrics.record_conversation_started();
                    if let Some(recorder) = &self.recorder {
                        if let Err(error) = recorder.start_recording(conversation).await {
                            // Reported upward, never rolls back presence state.
                            warn!(
                                target: "coordinator.actor",
                                error = %error,
                                conversation_id = %conversation,
                                "Failed to start recording"
                            );
                        }
                    }
                }

                Effect::StopRecording(conversation) => {
                    self.metrics.record_conversation_ended();
                    if let Some(recorder) = &self.recorder {
                        if let Err(error) = recorder.stop_recording(conversation).await {
                            warn!(
                                target: "coordinator.actor",
                                error = %error,
                                conversation_id = %conversation,
                                "Failed to stop recording"
                            );
                        }
                    }
                }

                Effect::Emit(envelope) => {
                    let targets = self.engine.peers();
                    let transports = self.transports.clone();
                    let metrics = Arc::clone(&self.metrics);
                    tokio::spawn(async move {
                        let report = fan_out(&transports, &envelope, &targets).await;
                        if report.all_unavailable() {
                            metrics.record_fanout_failure();
                        }
                    });
                }
            }
        }
    }
}

/// Pump media events into the coordinator mailbox until cancelled.
fn spawn_media_pump(
    mut events: mpsc::Receiver<MediaEvent>,
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if sender.send(CoordinatorMessage::Media(event)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    })
}
