//! Relay HTTP surface.
//!
//! One endpoint, two operations:
//!
//! - `POST /api/v1/messages` - store an envelope for a target; responds with
//!   the stored envelope's message id as acknowledgment
//! - `GET /api/v1/messages?participant_id=..&since_ms=..` - arrival-ordered
//!   envelopes for a target that arrived strictly after `since_ms`
//!
//! Plus Kubernetes-style `/health` and `/ready` probes.

use crate::store::MessageStore;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::clock;
use common::relay::{PollQuery, PollResponse, SubmitRequest, SubmitResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Relay request error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The request body could not be parsed.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
        }
    }
}

/// Shared state for the relay router.
#[derive(Debug)]
pub struct AppState {
    /// The envelope store, shared with the prune task.
    pub store: Arc<MessageStore>,
    /// Readiness flag, cleared during shutdown.
    ready: AtomicBool,
}

impl AppState {
    /// Create state around a store.
    #[must_use]
    pub fn new(store: Arc<MessageStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            ready: AtomicBool::new(true),
        })
    }

    /// Mark the service as draining; `/ready` starts returning 503.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Whether the service is ready to serve traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Build the relay router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/messages", get(poll_messages).post(submit_message))
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for `POST /api/v1/messages`.
///
/// The body is deserialized manually so malformed JSON returns 400 rather
/// than Axum's default 422.
async fn submit_message(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), RelayError> {
    let request: SubmitRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(target: "relay.routes", error = %e, "Invalid submit body");
        RelayError::BadRequest("invalid request body".to_string())
    })?;

    let received_at_ms = clock::now_ms();
    let message_id = state
        .store
        .submit(request.target, request.envelope, received_at_ms);

    debug!(
        target: "relay.routes",
        target_participant = %request.target,
        sender = %request.envelope.sender,
        kind = request.envelope.kind(),
        "Envelope stored"
    );

    Ok((StatusCode::OK, Json(SubmitResponse { message_id })))
}

/// Handler for `GET /api/v1/messages`.
async fn poll_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PollQuery>,
) -> Json<PollResponse> {
    let messages = state.store.poll(query.participant_id, query.since_ms);
    Json(PollResponse { messages })
}

/// Liveness probe handler.
async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe handler.
async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use common::envelope::{Envelope, EnvelopePayload, PresenceStatus, PresenceUpdate};
    use common::types::ParticipantId;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn app() -> (Arc<AppState>, Router) {
        let state = AppState::new(Arc::new(MessageStore::new(50)));
        let router = router(Arc::clone(&state));
        (state, router)
    }

    fn presence_envelope(sender: ParticipantId) -> Envelope {
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

    async fn submit(router: Router, request: &SubmitRequest) -> Response {
        let body = serde_json::to_vec(request).unwrap();
        router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_acknowledges_with_message_id() {
        let (_state, router) = app();
        let envelope = presence_envelope(ParticipantId(1));
        let request = SubmitRequest {
            target: ParticipantId(2),
            envelope,
        };

        let response = submit(router, &request).await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let ack: SubmitResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(ack.message_id, envelope.message_id);
    }

    #[tokio::test]
    async fn test_submit_then_poll_roundtrip() {
        let (state, submit_router) = app();
        let envelope = presence_envelope(ParticipantId(1));
        let request = SubmitRequest {
            target: ParticipantId(2),
            envelope,
        };
        submit(submit_router, &request).await;

        let poll_router = super::router(Arc::clone(&state));
        let response = poll_router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/messages?participant_id=2&since_ms=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let poll: PollResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(poll.messages.len(), 1);
        assert_eq!(poll.messages.first().unwrap().envelope, envelope);
    }

    #[tokio::test]
    async fn test_poll_for_other_participant_is_empty() {
        let (state, _) = app();
        state
            .store
            .submit(ParticipantId(2), presence_envelope(ParticipantId(1)), 10);
        let router = super::router(Arc::clone(&state));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/messages?participant_id=3&since_ms=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let poll: PollResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(poll.messages.is_empty());
    }

    #[tokio::test]
    async fn test_submit_with_malformed_body_returns_400() {
        let (_state, router) = app();

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_poll_without_participant_id_is_rejected() {
        let (_state, router) = app();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let (state, router) = app();

        let health = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let ready = router
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        state.set_not_ready();
        let draining = router
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(draining.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
