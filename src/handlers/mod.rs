//! HTTP and WebSocket request handlers.
//!
//! - `api` - Health check endpoint
//! - `telephony` - The media-stream WebSocket: admission, forward-only
//!   listening, and relay handoff

pub mod api;
pub mod telephony;

// Re-export commonly used handlers for convenient access
pub use telephony::call_stream_handler;
