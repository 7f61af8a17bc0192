//! HTTP middleware for the telephony surface.
//!
//! - `signature` - HMAC validation of the telephony platform's request
//!   signature before the WebSocket upgrade
//! - `connection_limit` - global and per-IP WebSocket connection caps

pub mod connection_limit;
pub mod signature;

pub use connection_limit::{ClientIp, connection_limit_middleware};
pub use signature::signature_middleware;
