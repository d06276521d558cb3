//! HTTP intake endpoint — `POST /send_message` with an already-canonical
//! JSON body. Shares the fire-and-forget policy with the SMTP intake:
//! the caller sees success once the message reached the dispatcher.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::message::CanonicalMessage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live configuration. Each request clones one consistent snapshot, so
    /// out-of-band config replacement is observed by the HTTP path.
    pub config: Arc<RwLock<RelayConfig>>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Inbound send request. Both fields are required strings; anything else
/// is rejected by deserialization before a dispatch is attempted.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub subject: String,
    pub message: String,
}

/// Build the axum router for the API surface.
pub fn api_routes(config: Arc<RwLock<RelayConfig>>, dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState { config, dispatcher };

    Router::new()
        .route("/send_message", post(send_message))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> impl IntoResponse {
    debug!(subject = %request.subject, "send_message request");

    let message = CanonicalMessage::new(request.subject, request.message);
    let snapshot = state.config.read().await.clone();
    state.dispatcher.dispatch(&message, &snapshot).await;

    Json(serde_json::json!({ "success": true }))
}
