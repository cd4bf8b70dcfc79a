//! Axum handlers.
//!
//! Failures map to `{"error": "<generic text>"}`; the underlying error is
//! logged and never leaves the process.

use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::AppState;
use crate::chat::ChatError;

const CHAT_FAILED: &str = "Failed to process chat request";
const STREAM_FAILED: &str = "Failed to process streaming chat request";
const HISTORY_FAILED: &str = "Failed to fetch messages";
const WORKOUTS_FAILED: &str = "Failed to fetch workouts";
const FOOD_LOGS_FAILED: &str = "Failed to fetch food logs";

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

/// Map a turn failure to a response; `generic` is the 500 body text.
fn error_response(err: ChatError, generic: &str) -> Response {
    match err {
        ChatError::Validation(msg) => {
            warn!(error = %msg, "rejected chat request");
            json_error(StatusCode::BAD_REQUEST, &msg)
        }
        other => {
            error!(error = %other, "{generic}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, generic)
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        error_response(self, CHAT_FAILED)
    }
}

/// Pull the message text out of the request body, rejecting malformed JSON
/// and a missing or empty `message`.
fn message_from(body: Result<Json<ChatRequest>, JsonRejection>) -> Result<String, Response> {
    let Json(req) = body.map_err(|rejection| {
        warn!(error = %rejection, "malformed chat request body");
        json_error(StatusCode::BAD_REQUEST, "Invalid request body")
    })?;
    match req.message {
        Some(message) if !message.is_empty() => Ok(message),
        _ => Err(error_response(ChatError::Validation("Message is required".into()), CHAT_FAILED)),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /health
pub(super) async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /chat
pub(super) async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let message = match message_from(body) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match state.chat.buffered_turn(&message).await {
        Ok(reply) => Json(json!({ "message": reply })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /chat/stream: raw token fragments as they arrive.
///
/// Errors before the first byte get a JSON error body; after that the body
/// stream is aborted instead.
pub(super) async fn chat_stream(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let message = match message_from(body) {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match state.chat.streaming_turn(&message).await {
        Ok(reply) => (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache, no-transform"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            Body::from_stream(reply),
        )
            .into_response(),
        Err(e) => error_response(e, STREAM_FAILED),
    }
}

/// GET /messages
pub(super) async fn messages(State(state): State<AppState>) -> Response {
    match state.chat.history().await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(e, HISTORY_FAILED),
    }
}

/// GET /workouts
pub(super) async fn workouts(State(state): State<AppState>) -> Response {
    match state.chat.workouts().await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(e, WORKOUTS_FAILED),
    }
}

/// GET /food-logs
pub(super) async fn food_logs(State(state): State<AppState>) -> Response {
    match state.chat.food_logs().await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(e, FOOD_LOGS_FAILED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::llm::ProviderError;

    #[test]
    fn validation_maps_to_400() {
        let resp = ChatError::Validation("Message is required".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_failures_map_to_500() {
        let gen_err = ChatError::Generation(ProviderError::Status { status: 502, body: "x".into() });
        assert_eq!(gen_err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let store_err = ChatError::Persistence(AppError::Storage("disk full".into()));
        assert_eq!(store_err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
