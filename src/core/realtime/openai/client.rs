//! OpenAI Realtime API client implementation.
//!
//! A per-call WebSocket client for the provider leg. One instance owns one
//! socket for the duration of a call: outbound [`ClientEvent`]s are queued
//! on an mpsc channel and written by the connection task, inbound frames
//! are parsed into [`ServerEvent`]s and handed to the caller through the
//! receiver returned by [`OpenAiRealtime::connect`].
//!
//! There is no reconnection: a dropped call is not resumable, so a closed
//! socket simply ends the event stream and the relay tears the session
//! down.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::config::{OPENAI_REALTIME_URL, OpenAiRealtimeModel, OpenAiRealtimeVoice};
use super::messages::{ClientEvent, ServerEvent, SessionConfig, ToolDef};
use crate::core::realtime::base::{RealtimeConfig, RealtimeError, RealtimeResult};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for inbound server events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Handle to a live provider connection.
///
/// Dropping the handle (or cancelling the session token) ends the
/// connection task; the event receiver then yields `None`.
pub struct OpenAiRealtime {
    sender: mpsc::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

impl OpenAiRealtime {
    /// Connect to the provider and start the duplex pump.
    ///
    /// Returns the connection handle and the inbound event stream. The
    /// initial `session.update` built from `config` is queued before this
    /// returns, so the provider is configured before any audio is appended.
    pub async fn connect(
        config: &RealtimeConfig,
        api_key: &str,
        cancel: CancellationToken,
    ) -> RealtimeResult<(Self, mpsc::Receiver<ServerEvent>)> {
        if api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = OpenAiRealtimeModel::from_str_or_default(&config.model);
        let url = url::Url::parse_with_params(OPENAI_REALTIME_URL, &[("model", model.as_str())])
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let request = http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {api_key}"))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Sec-WebSocket-Protocol", "realtime")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", "api.openai.com")
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::info!(model = %model, "Connected to OpenAI Realtime API");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Outgoing events
                    maybe_event = rx.recv() => {
                        let Some(event) = maybe_event else { break };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize provider event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send provider message: {}", e);
                            break;
                        }
                    }

                    // Incoming frames
                    maybe_msg = ws_source.next() => {
                        match maybe_msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if event_tx.send(event).await.is_err() {
                                            // Consumer gone, session is over
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse provider event: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                tracing::info!("Provider socket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("Provider socket error: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }

                    _ = cancel.cancelled() => {
                        tracing::debug!("Provider connection cancelled");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            // Dropping event_tx ends the consumer's stream
            tracing::info!("Provider connection task ended");
        });

        let client = Self { sender: tx, task };

        // Configure the session before any audio flows
        client
            .send(ClientEvent::SessionUpdate {
                session: build_session_config(config),
            })
            .await?;

        Ok((client, event_rx))
    }

    /// Queue an event for the provider.
    pub async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// A clone of the outbound event sender.
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.sender.clone()
    }

    /// Tear the connection down without waiting for the server.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Build the wire-level session configuration from a [`RealtimeConfig`].
///
/// A language hint, when present, is folded into the instructions rather
/// than sent as a separate field — the provider has no language parameter.
pub fn build_session_config(config: &RealtimeConfig) -> SessionConfig {
    let instructions = match (&config.instructions, &config.language) {
        (Some(prompt), Some(lang)) => Some(format!("{prompt}\n\nAlways answer in {lang}.")),
        (Some(prompt), None) => Some(prompt.clone()),
        (None, Some(lang)) => Some(format!("Always answer in {lang}.")),
        (None, None) => None,
    };

    SessionConfig {
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions,
        voice: Some(
            OpenAiRealtimeVoice::from_str_or_default(config.voice.as_deref().unwrap_or_default())
                .as_str()
                .to_string(),
        ),
        input_audio_format: config.input_audio_format.clone(),
        output_audio_format: config.output_audio_format.clone(),
        input_audio_transcription: config.input_audio_transcription.clone(),
        input_audio_noise_reduction: config.noise_reduction.clone(),
        turn_detection: config.turn_detection.clone(),
        tools: config.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| ToolDef {
                    tool_type: t.tool_type.clone(),
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                })
                .collect()
        }),
        tool_choice: config.tool_choice.clone(),
        temperature: config.temperature,
    }
}

// =============================================================================
// Tests
// =============================================================================
