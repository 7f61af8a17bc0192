//! Relay session control loop and socket wiring.
//!
//! [`RelaySession`] is the pure event-handling core: it owns the runtime
//! state and translates between the two protocols through mpsc sinks, so
//! tests can drive it without any sockets. [`RelayEngine::run`] wires a
//! live client socket and a provider connection to a session and runs the
//! control loop to completion.

use axum::extract::ws::{Message, WebSocket};
use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::functions::{CallSnapshot, FunctionCall, FunctionOutcome, FunctionRegistry};
use super::runtime::RelayRuntimeState;
use super::RelayError;
use crate::core::audio::CallRecorder;
use crate::core::directory::CallContext;
use crate::core::realtime::{
    ClientEvent, ConversationItem, OpenAiRealtime, ServerEvent, TranscriptLine, TranscriptRole,
};
use crate::core::session::RelaySessionConfig;
use crate::core::telephony::{ClientMessageRoute, TelephonyInbound, TelephonyOutbound};
use crate::jobs::{Job, JobKind, JobQueue};

/// Buffer size for the merged event channel.
const EVENT_CHANNEL_SIZE: usize = 1024;

/// Buffer size for the client writer channel.
const CLIENT_CHANNEL_SIZE: usize = 1024;

// =============================================================================
// Events
// =============================================================================

/// Everything the control loop reacts to, merged into one stream.
pub enum RelayEvent {
    /// A parsed frame from the telephony leg
    Client(TelephonyInbound),
    /// A parsed frame from the provider leg
    Provider(ServerEvent),
    /// A suspend/resume side computation finished (success or failure)
    SideTaskFinished {
        /// Function call the computation belongs to
        call_id: String,
        /// Synthesized u-law audio, or why there is none
        result: Result<Bytes, String>,
    },
    /// The telephony socket closed
    ClientClosed,
    /// The provider socket closed
    ProviderClosed,
}

/// Whether the control loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep pumping
    Continue,
    /// Tear the session down
    Stop,
}

/// Outbound sinks of one session.
pub struct RelayChannels {
    /// Writer channel of the telephony leg
    pub client: mpsc::Sender<ClientMessageRoute>,
    /// Outbound event channel of the provider leg
    pub provider: mpsc::Sender<ClientEvent>,
    /// The control loop's own event channel, for side-task completions
    pub events: mpsc::Sender<RelayEvent>,
}

/// Shared collaborators a session needs.
pub struct RelayDeps {
    /// Background job submission
    pub jobs: Arc<dyn JobQueue>,
    /// Function-call handler table
    pub functions: Arc<FunctionRegistry>,
    /// Hold clip injected during suspend/resume handling (u-law)
    pub hold_clip: Option<Bytes>,
    /// Where call recordings land
    pub recording_dir: PathBuf,
}

// =============================================================================
// Session
// =============================================================================

/// The event-handling core of one call.
///
/// Owns all mutable per-call state; must only ever be driven from one
/// task. The interruption sequence is atomic because nothing else can
/// observe or mutate the state mid-protocol.
pub struct RelaySession {
    ctx: CallContext,
    config: RelaySessionConfig,
    state: RelayRuntimeState,
    recorder: CallRecorder,
    transcripts: Vec<TranscriptLine>,
    channels: RelayChannels,
    deps: RelayDeps,
    idle_injections: u32,
    cancel: CancellationToken,
}

impl RelaySession {
    /// Build a session over the given sinks.
    pub fn new(
        ctx: CallContext,
        config: RelaySessionConfig,
        channels: RelayChannels,
        deps: RelayDeps,
        cancel: CancellationToken,
    ) -> Self {
        let recorder = CallRecorder::new(config.recording);
        Self {
            ctx,
            config,
            state: RelayRuntimeState::default(),
            recorder,
            transcripts: Vec::new(),
            channels,
            deps,
            idle_injections: 0,
            cancel,
        }
    }

    /// The per-call context.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// The runtime state, for inspection.
    pub fn state(&self) -> &RelayRuntimeState {
        &self.state
    }

    /// The idle timeout, when follow-ups are configured.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.config
            .idle
            .as_ref()
            .map(|p| Duration::from_secs(p.timeout_secs))
    }

    /// Whether all idle follow-ups have been spent.
    pub fn idle_exhausted(&self) -> bool {
        match &self.config.idle {
            Some(policy) => self.idle_injections >= policy.max_injections,
            None => true,
        }
    }

    async fn send_client(&self, event: TelephonyOutbound) -> Result<(), RelayError> {
        self.channels
            .client
            .send(ClientMessageRoute::Outgoing(event))
            .await
            .map_err(|_| RelayError::Closed)
    }

    async fn send_provider(&self, event: ClientEvent) -> Result<(), RelayError> {
        self.channels
            .provider
            .send(event)
            .await
            .map_err(|_| RelayError::Closed)
    }

    /// Dispatch one merged event.
    pub async fn handle_event(&mut self, event: RelayEvent) -> Result<Flow, RelayError> {
        match event {
            RelayEvent::Client(inbound) => self.handle_client(inbound).await,
            RelayEvent::Provider(inbound) => self.handle_provider(inbound).await,
            RelayEvent::SideTaskFinished { call_id, result } => {
                self.handle_side_task_finished(&call_id, result).await?;
                Ok(Flow::Continue)
            }
            RelayEvent::ClientClosed => {
                tracing::info!(call_id = %self.ctx.call_id, "Client socket closed");
                Ok(Flow::Stop)
            }
            RelayEvent::ProviderClosed => {
                tracing::info!(call_id = %self.ctx.call_id, "Provider socket closed");
                Ok(Flow::Stop)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Client leg
    // -------------------------------------------------------------------------

    async fn handle_client(&mut self, event: TelephonyInbound) -> Result<Flow, RelayError> {
        match event {
            TelephonyInbound::Connected => {
                tracing::debug!("Telephony socket connected");
            }

            TelephonyInbound::Start { start } => {
                tracing::info!(
                    call_sid = %start.call_sid,
                    stream_sid = %start.stream_sid,
                    "Media stream started"
                );
                self.state.begin_stream(&start.stream_sid);
                self.ctx.stream_id = start.stream_sid.clone();
                if self.ctx.call_id.is_empty() {
                    self.ctx.call_id = start.call_sid.clone();
                }
                self.config
                    .hooks
                    .client_started(&start.call_sid, &start.stream_sid)
                    .await;

                if self.config.recording {
                    let job = Job::immediate(
                        JobKind::StartRecording,
                        serde_json::json!({ "call_id": self.ctx.call_id }),
                    );
                    if let Err(e) = self.deps.jobs.submit(job).await {
                        tracing::warn!("Failed to trigger recording: {}", e);
                    }
                }
            }

            TelephonyInbound::Media { media, timestamp } => {
                self.state.note_media(timestamp);
                if self.state.audio_forwarding_suspended {
                    // Dropped, not buffered
                    tracing::trace!("Audio forwarding suspended, dropping media frame");
                    return Ok(Flow::Continue);
                }
                match BASE64_STANDARD.decode(&media.payload) {
                    Ok(bytes) => self.recorder.push_caller(&bytes),
                    Err(e) => tracing::warn!("Undecodable media payload: {}", e),
                }
                self.send_provider(ClientEvent::InputAudioBufferAppend {
                    audio: media.payload,
                })
                .await?;
            }

            TelephonyInbound::Mark { .. } => {
                self.state.pop_mark();
            }

            TelephonyInbound::Stop => {
                tracing::info!(call_id = %self.ctx.call_id, "Media stream stopped");
                return Ok(Flow::Stop);
            }

            TelephonyInbound::Unsupported => {
                tracing::trace!("Ignoring unsupported telephony event");
            }
        }
        Ok(Flow::Continue)
    }

    // -------------------------------------------------------------------------
    // Provider leg
    // -------------------------------------------------------------------------

    async fn handle_provider(&mut self, event: ServerEvent) -> Result<Flow, RelayError> {
        match event {
            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                tracing::debug!(session_id = %session.id, "Provider session ready");
                self.config.hooks.session_ready(&self.ctx).await;
                self.maybe_send_greeting().await?;
            }

            ServerEvent::Error { error } => {
                tracing::warn!(
                    error_type = %error.error_type,
                    "Provider error: {}",
                    error.message
                );
            }

            ServerEvent::SpeechStarted { .. } => {
                self.handle_barge_in().await?;
            }

            ServerEvent::SpeechStopped { .. } => {}

            ServerEvent::AudioDelta { delta, item_id, .. } => {
                self.send_client(TelephonyOutbound::media(
                    self.state.stream_id.clone(),
                    delta.clone(),
                ))
                .await?;
                self.state.note_audio_delta(item_id.as_deref());

                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(bytes) => self.recorder.push_assistant(&bytes),
                    Err(e) => tracing::warn!("Undecodable audio delta: {}", e),
                }

                // Flow-control echo so the client can report playback progress
                let mark = self.state.push_mark();
                self.send_client(TelephonyOutbound::mark(self.state.stream_id.clone(), mark))
                    .await?;
            }

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                self.transcripts.push(TranscriptLine {
                    role: TranscriptRole::User,
                    text: transcript,
                });
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.transcripts.push(TranscriptLine {
                    role: TranscriptRole::Assistant,
                    text: transcript,
                });
            }

            ServerEvent::ResponseDone { response } => {
                let calls: Vec<FunctionCall> = response
                    .output
                    .iter()
                    .filter(|item| item.item_type == "function_call")
                    .map(|item| FunctionCall {
                        call_id: item.call_id.clone().unwrap_or_default(),
                        name: item.name.clone().unwrap_or_default(),
                        arguments: item.arguments.clone().unwrap_or_else(|| "{}".to_string()),
                    })
                    .collect();
                for call in calls {
                    self.dispatch_function(call).await?;
                }
            }

            ServerEvent::Unhandled => {
                tracing::trace!("Ignoring unhandled provider event");
            }
        }
        Ok(Flow::Continue)
    }

    /// One-shot greeting, sent on the first provider-ready signal.
    async fn maybe_send_greeting(&mut self) -> Result<(), RelayError> {
        if self.state.greeting_sent {
            return Ok(());
        }
        let Some(greeting) = self.config.greeting.clone() else {
            return Ok(());
        };
        self.state.greeting_sent = true;
        self.send_provider(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(format!("Greet the caller with: \"{greeting}\"")),
        })
        .await?;
        self.send_provider(ClientEvent::ResponseCreate {}).await
    }

    // -------------------------------------------------------------------------
    // Interruption protocol
    // -------------------------------------------------------------------------

    /// Caller started talking while the assistant may still be playing.
    ///
    /// The whole sequence runs inside the control loop: compute the cut
    /// point, truncate the provider item, clear the client's playback
    /// buffer, reset the bookkeeping.
    async fn handle_barge_in(&mut self) -> Result<(), RelayError> {
        let Some(truncation) = self.state.begin_interruption() else {
            return Ok(());
        };
        tracing::debug!(
            item_id = %truncation.item_id,
            audio_end_ms = truncation.audio_end_ms,
            "Caller barge-in, truncating response"
        );
        self.send_provider(ClientEvent::ConversationItemTruncate {
            item_id: truncation.item_id,
            content_index: 0,
            audio_end_ms: truncation.audio_end_ms,
        })
        .await?;
        self.send_client(TelephonyOutbound::clear(self.state.stream_id.clone()))
            .await
    }

    // -------------------------------------------------------------------------
    // Function dispatch
    // -------------------------------------------------------------------------

    async fn dispatch_function(&mut self, call: FunctionCall) -> Result<(), RelayError> {
        self.config
            .hooks
            .function_call(&call.name, &call.arguments)
            .await;

        let Some(handler) = self.deps.functions.get(&call.name) else {
            tracing::debug!(name = %call.name, "Unknown function, ignoring");
            return Ok(());
        };

        let snapshot = CallSnapshot {
            caller_audio: Bytes::copy_from_slice(self.recorder.caller_audio()),
        };

        match handler.invoke(&call, &self.ctx, &snapshot).await {
            Ok(FunctionOutcome::Reply { text, transferred }) => {
                if transferred {
                    self.ctx.is_transferred = true;
                }
                self.send_provider(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::function_output(call.call_id, text),
                })
                .await?;
                self.send_provider(ClientEvent::ResponseCreate {}).await?;
            }
            Ok(FunctionOutcome::Suspend(task)) => {
                self.begin_suspension(call.call_id, task).await?;
            }
            Err(e) => {
                // The function simply yields no result
                tracing::warn!(name = %call.name, "Function handler failed: {}", e);
            }
        }
        Ok(())
    }

    /// Pause caller-audio forwarding, play the hold clip, and run the
    /// side computation off the control loop. Its completion re-enters the
    /// loop as [`RelayEvent::SideTaskFinished`] whether it succeeded or
    /// not, so the suspension always clears.
    async fn begin_suspension(
        &mut self,
        call_id: String,
        task: super::functions::SuspendFuture,
    ) -> Result<(), RelayError> {
        self.state.audio_forwarding_suspended = true;

        if let Some(clip) = &self.deps.hold_clip {
            self.send_client(TelephonyOutbound::media(
                self.state.stream_id.clone(),
                BASE64_STANDARD.encode(clip),
            ))
            .await?;
        }

        let events = self.channels.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Session is being torn down; nothing left to resume
                }
                result = task => {
                    let _ = events
                        .send(RelayEvent::SideTaskFinished {
                            call_id,
                            result: result.map_err(|e| e.to_string()),
                        })
                        .await;
                }
            }
        });
        Ok(())
    }

    async fn handle_side_task_finished(
        &mut self,
        call_id: &str,
        result: Result<Bytes, String>,
    ) -> Result<(), RelayError> {
        // Resume forwarding first; cleanup is unconditional
        self.state.audio_forwarding_suspended = false;

        match result {
            Ok(audio) => {
                self.recorder.push_assistant(&audio);
                self.send_client(TelephonyOutbound::media(
                    self.state.stream_id.clone(),
                    BASE64_STANDARD.encode(&audio),
                ))
                .await?;
                self.send_provider(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::function_output(
                        call_id,
                        "The order summary was played back to the caller.",
                    ),
                })
                .await?;
                self.send_provider(ClientEvent::ResponseCreate {}).await?;
            }
            Err(e) => {
                tracing::warn!("Suspend handler side computation failed: {}", e);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Idle follow-up
    // -------------------------------------------------------------------------

    /// Inject the configured follow-up message as a new user turn.
    pub async fn handle_idle(&mut self) -> Result<(), RelayError> {
        let Some(policy) = self.config.idle.clone() else {
            return Ok(());
        };
        if self.idle_injections >= policy.max_injections {
            return Ok(());
        }
        self.idle_injections += 1;
        tracing::debug!(
            injection = self.idle_injections,
            max = policy.max_injections,
            "Injecting idle follow-up"
        );
        self.send_provider(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(policy.message),
        })
        .await?;
        self.send_provider(ClientEvent::ResponseCreate {}).await
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Fire the finalize callbacks with whatever was accumulated and
    /// submit the post-call job. Idempotent.
    pub async fn finalize(&mut self) {
        if self.state.closed {
            return;
        }
        self.state.closed = true;

        let artifact = match self
            .recorder
            .finalize(&self.deps.recording_dir, &self.ctx.call_id)
        {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!("Recording finalize failed: {}", e);
                None
            }
        };
        self.config.hooks.recording_complete(artifact.as_ref()).await;
        self.config
            .hooks
            .transcription_completed(&self.transcripts)
            .await;

        let job = Job::immediate(
            JobKind::FinalizeCall,
            serde_json::json!({
                "call_id": self.ctx.call_id,
                "transferred": self.ctx.is_transferred,
                "recording": artifact.as_ref().map(|a| a.path.display().to_string()),
            }),
        );
        if let Err(e) = self.deps.jobs.submit(job).await {
            tracing::warn!("Failed to submit finalize job: {}", e);
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Socket wiring and the control loop for one live call.
pub struct RelayEngine;

impl RelayEngine {
    /// Run one AI-handled call to completion.
    ///
    /// Owns the client socket and the provider connection for the whole
    /// call. Returns once either leg closes or the session faults; the
    /// finalize callbacks have fired by then.
    pub async fn run(
        socket: WebSocket,
        ctx: CallContext,
        config: RelaySessionConfig,
        api_key: &str,
        deps: RelayDeps,
    ) -> Result<(), RelayError> {
        let session_id = uuid::Uuid::new_v4();
        tracing::info!(%session_id, call_id = %ctx.call_id, "Relay session starting");

        let cancel = CancellationToken::new();
        let (events_tx, mut events_rx) = mpsc::channel::<RelayEvent>(EVENT_CHANNEL_SIZE);

        // Client writer task
        let (client_tx, mut client_rx) = mpsc::channel::<ClientMessageRoute>(CLIENT_CHANNEL_SIZE);
        let (mut ws_sink, mut ws_source) = socket.split();
        let writer = tokio::spawn(async move {
            while let Some(route) = client_rx.recv().await {
                match route {
                    ClientMessageRoute::Outgoing(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize client event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::warn!("Failed to send client message: {}", e);
                            break;
                        }
                    }
                    ClientMessageRoute::Close => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Provider connection
        let (provider, mut provider_rx) =
            OpenAiRealtime::connect(&config.provider, api_key, cancel.child_token()).await?;

        // Provider pump: typed events into the merged channel
        let provider_events = events_tx.clone();
        let provider_pump = tokio::spawn(async move {
            while let Some(event) = provider_rx.recv().await {
                if provider_events
                    .send(RelayEvent::Provider(event))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = provider_events.send(RelayEvent::ProviderClosed).await;
        });

        // Client pump: parsed frames into the merged channel
        let client_events = events_tx.clone();
        let client_pump = tokio::spawn(async move {
            while let Some(message) = ws_source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<TelephonyInbound>(&text) {
                            Ok(event) => {
                                if client_events.send(RelayEvent::Client(event)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse telephony frame: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Telephony socket error: {}", e);
                        break;
                    }
                }
            }
            let _ = client_events.send(RelayEvent::ClientClosed).await;
        });

        let mut session = RelaySession::new(
            ctx,
            config,
            RelayChannels {
                client: client_tx.clone(),
                provider: provider.sender(),
                events: events_tx.clone(),
            },
            deps,
            cancel.clone(),
        );

        // Control loop: the only task that touches session state
        let idle_timeout = session.idle_timeout();
        let mut last_activity = Instant::now();
        let outcome = loop {
            let idle_deadline =
                last_activity + idle_timeout.unwrap_or(Duration::from_secs(3600));
            tokio::select! {
                maybe_event = events_rx.recv() => {
                    let Some(event) = maybe_event else { break Ok(()) };
                    last_activity = Instant::now();
                    match session.handle_event(event).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break Ok(()),
                        Err(RelayError::Closed) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline),
                    if idle_timeout.is_some() && !session.idle_exhausted() =>
                {
                    last_activity = Instant::now();
                    if let Err(e) = session.handle_idle().await {
                        break Err(e);
                    }
                }
                _ = cancel.cancelled() => break Ok(()),
            }
        };

        // Teardown: stop both pumps and the idle timer, finalize with
        // whatever was accumulated
        cancel.cancel();
        provider.shutdown();
        session.finalize().await;
        let _ = client_tx.send(ClientMessageRoute::Close).await;

        provider_pump.abort();
        client_pump.abort();
        // Writer drains its channel and exits on Close
        let _ = writer.await;

        tracing::info!(%session_id, "Relay session ended");
        outcome
    }
}
