//! Realtime model-provider module.
//!
//! Abstractions and the OpenAI implementation for the provider side of a
//! call: configuration types, the wire event vocabulary, and the per-call
//! WebSocket client.
//!
//! Inbound provider events are consumed through a channel rather than
//! registered callbacks — all per-call state lives in the relay's single
//! control loop, and the channel keeps it that way.

mod base;
pub mod openai;

pub use base::{
    FunctionDefinition, InputTranscriptionConfig, RealtimeConfig, RealtimeError, RealtimeResult,
    ToolDefinition, TranscriptLine, TranscriptRole, TurnDetectionConfig,
};
pub use openai::{
    ClientEvent, ConversationItem, OpenAiRealtime, OpenAiRealtimeAudioFormat, OpenAiRealtimeModel,
    OpenAiRealtimeVoice, ServerEvent, SessionConfig, build_session_config,
};
