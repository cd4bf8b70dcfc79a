//! HTTP surface: axum router, shared state and the server loop.
//!
//! ```text
//! GET  /health
//! POST /chat           {message} → {message}
//! POST /chat/stream    {message} → text/plain token stream
//! GET  /messages       conversation history, oldest first
//! GET  /workouts
//! GET  /food-logs
//! ```
//!
//! Shutdown is driven by a [`CancellationToken`] wired to axum's graceful
//! shutdown.

mod api;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chat::ChatService;
use crate::error::AppError;

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        Self { chat: Arc::new(chat) }
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health",      get(api::health))
        .route("/chat",        post(api::chat))
        .route("/chat/stream", post(api::chat_stream))
        .route("/messages",    get(api::messages))
        .route("/workouts",    get(api::workouts))
        .route("/food-logs",   get(api::food_logs))
        .with_state(state)
}

// ── Server loop ───────────────────────────────────────────────────────────────

/// Bind `bind_addr` and serve until `shutdown` is cancelled.
pub async fn serve(
    bind_addr: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Http(format!("bind failed on {bind_addr}: {e}")))?;

    let local = listener
        .local_addr()
        .map_err(|e| AppError::Http(format!("no local address: {e}")))?;
    info!(%local, "http server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Http(format!("server error: {e}")))?;

    info!("http server shut down");
    Ok(())
}
