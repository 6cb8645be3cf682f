//! Message types for the coordinator actor.
//!
//! All communication with the actor uses strongly-typed message passing via
//! `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`. Adapter
//! pumps, media events, local actions, and timer ticks all serialize through
//! this one mailbox - the actor is the sole mutator of the Presence Registry
//! and the Conversation Table.

use crate::engine::{EndOutcome, StateSnapshot};
use crate::errors::CoordError;
use crate::media::MediaEvent;
use crate::pairing::PairingOutcome;
use crate::transport::TransportId;
use common::envelope::Envelope;
use common::types::ParticipantId;
use tokio::sync::oneshot;

/// Messages sent to the coordinator actor.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Join the channel: attach the media client and announce presence.
    Connect {
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },

    /// Leave the channel: end any conversation, detach, drop our record.
    Disconnect {
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },

    /// Request a conversation, optionally with a specific participant.
    RequestPairing {
        /// Specific target, or `None` to pick the oldest available waiter.
        target: Option<ParticipantId>,
        /// Response channel for the pairing outcome.
        respond_to: oneshot::Sender<PairingOutcome>,
    },

    /// End the conversation we are currently in.
    EndConversation {
        /// Response channel for the outcome.
        respond_to: oneshot::Sender<EndOutcome>,
    },

    /// Mute or unmute the local audio track.
    SetMuted {
        muted: bool,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },

    /// An envelope arrived on a transport adapter.
    EnvelopeReceived {
        envelope: Envelope,
        via: TransportId,
    },

    /// An event from the media client.
    Media(MediaEvent),

    /// Retry attaching to the media session after a connection loss.
    AttemptReconnect {
        /// 1-based attempt number.
        attempt: u32,
    },

    /// Get a snapshot of the coordinator's state.
    GetState {
        /// Response channel for the snapshot.
        respond_to: oneshot::Sender<StateSnapshot>,
    },
}
