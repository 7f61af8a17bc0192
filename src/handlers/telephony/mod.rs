//! Telephony media-stream WebSocket handler.
//!
//! The wire vocabulary lives in [`crate::core::telephony`]; this module
//! owns the HTTP surface: upgrade, admission, the forward-only listener,
//! and handoff to the relay engine.

mod handler;

pub use handler::{CallStreamParams, LoggingHooks, call_stream_handler, forward_only_listener};
