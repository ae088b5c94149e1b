//! HTTP surface: axum router serving the live MJPEG stream.
//!
//! - `GET /stream.mjpg`: `multipart/x-mixed-replace` stream of the latest frame
//! - `GET /health`: capture mode and publish counters

pub mod mjpeg;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::{Json, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;
use crate::pipeline::{FrameSlot, ModeProbe};

/// Everything a request handler needs, injected at router construction.
#[derive(Clone)]
pub struct AppState {
    slot: Arc<FrameSlot>,
    mode: ModeProbe,
    empty_backoff: Duration,
}

impl AppState {
    pub fn new(slot: Arc<FrameSlot>, mode: ModeProbe, empty_backoff: Duration) -> Self {
        Self {
            slot,
            mode,
            empty_backoff,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream.mjpg", get(stream))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until the listener fails. Open streams are never drained, so
/// callers shut down by dropping this future.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    info!("Streaming on http://{}/stream.mjpg", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn stream(State(state): State<AppState>) -> Response {
    mjpeg::response(Arc::clone(&state.slot), state.empty_backoff)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "mode": state.mode.get(),
        "frames_published": state.slot.published(),
        "has_frame": !state.slot.is_empty(),
    }))
}
