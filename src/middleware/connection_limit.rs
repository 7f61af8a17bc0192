//! Connection limit middleware for WebSocket connections.
//!
//! Enforces a global cap and a per-IP cap on WebSocket upgrades. Requests
//! that are not upgrades pass through untouched. The handler releases the
//! slot when the socket closes, using the [`ClientIp`] extension injected
//! here.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::errors::AppError;
use crate::state::{AppState, ConnectionLimitError};

/// Extension carrying the client IP through to the handler so it can
/// release the connection slot when done.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub IpAddr);

/// Middleware enforcing WebSocket connection limits.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // Only apply limits to WebSocket upgrade requests
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(%client_ip, "Global WebSocket connection limit reached");
            AppError::ServiceUnavailable("Connection capacity reached".to_string()).into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(%client_ip, "Per-IP WebSocket connection limit reached");
            AppError::TooManyConnections("Too many connections from this address".to_string())
                .into_response()
        }
    }
}
