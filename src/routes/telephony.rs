//! Telephony WebSocket route configuration.
//!
//! # Endpoint
//!
//! `GET /call-stream` - WebSocket upgrade for a call's media stream
//!
//! # Protocol
//!
//! The telephony platform carries call metadata in the query string
//! (`from`, `to`, `call_id`, `assistant_id`, `number_id`) and then speaks
//! the JSON media-stream vocabulary over the socket:
//!
//! ```json
//! {"event":"start","start":{"streamSid":"S1","callSid":"C1"}}
//! {"event":"media","media":{"payload":"<base64 u-law>"},"timestamp":500}
//! {"event":"stop"}
//! ```
//!
//! The gateway answers with `media`, `mark` and `clear` events on the
//! same socket.
//!
//! # Authentication
//!
//! When a telephony auth secret is configured, the signature middleware
//! validates the platform's request signature before the upgrade.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::telephony::call_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the telephony WebSocket router.
pub fn create_telephony_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/call-stream", get(call_stream_handler))
        .layer(TraceLayer::new_for_http())
}
