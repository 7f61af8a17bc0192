//! OpenAI Realtime API module.
//!
//! Provider leg for AI-handled calls: a WebSocket client plus the typed
//! client/server event vocabulary of OpenAI's Realtime API.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Audio Format
//!
//! The telephony path configures G.711 u-law at 8kHz for both directions,
//! so caller audio and synthesized audio pass through the relay untouched.

mod client;
mod config;
mod messages;

pub use client::{OpenAiRealtime, build_session_config};
pub use config::{
    OPENAI_REALTIME_URL, OpenAiRealtimeAudioFormat, OpenAiRealtimeModel, OpenAiRealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, ResponseInfo, ServerEvent, SessionConfig,
    SessionInfo, ToolDef,
};
