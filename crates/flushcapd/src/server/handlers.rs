//! Request handlers.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use super::websocket::split_socket;
use super::{AppState, TERMINATING_BODY};

fn terminating() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, TERMINATING_BODY).into_response()
}

/// `GET /`
pub(crate) async fn serve_home(State(state): State<AppState>) -> Response {
    if state.hub.is_terminating() {
        return terminating();
    }
    Html(state.home_page.to_string()).into_response()
}

/// `GET /api/sensors`
pub(crate) async fn serve_sensors(State(state): State<AppState>) -> Response {
    match state.hub.snapshot_sensors().await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            debug!(error = %e, "Rejecting sensor snapshot");
            terminating()
        }
    }
}

/// `GET /changes`
pub(crate) async fn serve_changes(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if state.hub.is_terminating() {
        return terminating();
    }

    upgrade
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (sink, stream) = split_socket(socket);
            // A refused registration closes the socket
            if let Err(e) = state.hub.register_connection(sink, stream).await {
                debug!(error = %e, "Connection refused by hub");
            }
        })
}
