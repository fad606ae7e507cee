//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the SAUC relay router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade; requires the `X-User-ID` header
///
/// # Protocol
///
/// Binary SAUC frames are relayed verbatim to the recognition service and
/// back. After the client's final audio packet and the service's final
/// result, the server sends a task-complete frame (message type `0xa`,
/// JSON payload) and closes once the client answers with a client-ack
/// frame (message type `0xb`).
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
