//! Telephony media-stream wire vocabulary.
//!
//! The client leg is a JSON-framed WebSocket from the telephony platform,
//! one event per frame with an `event` discriminator. The relay reacts to
//! a small fixed vocabulary and is silent on anything else.
//!
//! Inbound: `connected`, `start`, `media`, `mark`, `stop`.
//! Outbound: `media`, `mark`, `clear`.

use serde::{Deserialize, Serialize};

// =============================================================================
// Inbound Events (telephony platform -> relay)
// =============================================================================

/// Inbound media-stream events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInbound {
    /// Socket-level handshake; carries nothing the relay needs
    Connected,

    /// Stream metadata; the first event with call identity
    Start {
        /// Stream metadata
        start: StartMeta,
    },

    /// One frame of caller audio
    Media {
        /// Audio payload
        media: MediaFrame,
        /// Media clock timestamp in milliseconds
        #[serde(default)]
        timestamp: Option<u64>,
    },

    /// Playback-progress echo for a mark the relay sent earlier
    Mark {
        /// Mark metadata
        mark: MarkFrame,
    },

    /// The stream is over
    Stop,

    /// Anything the relay does not react to
    #[serde(other)]
    Unsupported,
}

/// Metadata of the client's start event.
#[derive(Debug, Clone, Deserialize)]
pub struct StartMeta {
    /// Media stream id
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    /// Telephony platform call id
    #[serde(rename = "callSid")]
    pub call_sid: String,
}

/// Base64 audio payload of a media event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFrame {
    /// Base64-encoded G.711 u-law audio
    pub payload: String,
}

/// Name of a mark event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkFrame {
    /// Mark name, chosen by the relay
    pub name: String,
}

// =============================================================================
// Outbound Events (relay -> telephony platform)
// =============================================================================

/// Outbound media-stream events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    /// One frame of synthesized audio
    Media {
        /// Stream this frame belongs to
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Audio payload
        media: MediaFrame,
    },

    /// Flow-control echo request: the client reports back when playback
    /// reaches this point
    Mark {
        /// Stream the mark belongs to
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Mark metadata
        mark: MarkFrame,
    },

    /// Drop all buffered playback immediately (barge-in)
    Clear {
        /// Stream to clear
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl TelephonyOutbound {
    /// A media frame carrying base64 audio.
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.into(),
            media: MediaFrame {
                payload: payload.into(),
            },
        }
    }

    /// A mark event with the given name.
    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        TelephonyOutbound::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkFrame { name: name.into() },
        }
    }

    /// A clear-playback instruction.
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        TelephonyOutbound::Clear {
            stream_sid: stream_sid.into(),
        }
    }
}

/// Message routing for the client-leg writer task.
pub enum ClientMessageRoute {
    /// JSON event for the telephony platform
    Outgoing(TelephonyOutbound),
    /// Close the socket
    Close,
}

// =============================================================================
// Tests
// =============================================================================
