//! Media-stream WebSocket handling.
//!
//! Upgrades the telephony platform's media-stream connection, decides the
//! call's disposition before any audio flows, and either ends the call,
//! watches it in forward-only mode, or hands it to the relay engine.

use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::admission::{Disposition, InboundCall};
use crate::core::audio::RecordingArtifact;
use crate::core::directory::CallContext;
use crate::core::realtime::TranscriptLine;
use crate::core::relay::{RelayDeps, RelayEngine};
use crate::core::session::SessionHooks;
use crate::core::telephony::TelephonyInbound;
use crate::jobs::{Job, JobKind, JobQueue};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket frame size (1 MB; media frames are small)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Call metadata carried in the upgrade request's query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallStreamParams {
    /// Caller number
    #[serde(default)]
    pub from: String,
    /// Called number
    #[serde(default)]
    pub to: String,
    /// Telephony platform call id
    #[serde(default)]
    pub call_id: Option<String>,
    /// Explicit assistant override
    #[serde(default)]
    pub assistant_id: Option<String>,
    /// Called-number record id
    #[serde(default)]
    pub number_id: Option<String>,
}

/// Media-stream WebSocket handler.
///
/// Admission runs after the upgrade completes but before any media is
/// read, so rejected calls never open a provider socket.
pub async fn call_stream_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<CallStreamParams>,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    info!(from = %params.from, to = %params.to, "Media stream upgrade requested");

    let ip = client_ip.map(|Extension(ClientIp(ip))| ip);
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .on_upgrade(move |socket| async move {
            handle_call_socket(socket, state.clone(), params).await;
            if let Some(ip) = ip {
                state.release_connection(ip);
            }
        })
}

async fn handle_call_socket(socket: WebSocket, state: Arc<AppState>, params: CallStreamParams) {
    let call = InboundCall {
        from: params.from,
        to: params.to,
        call_id: params.call_id,
        assistant_id: params.assistant_id,
        number_id: params.number_id,
    };
    let call_id = call.call_id.clone().unwrap_or_default();

    let disposition = match state
        .admission
        .admit(call, Utc::now(), Arc::new(LoggingHooks))
        .await
    {
        Ok(disposition) => disposition,
        Err(e) => {
            error!(%call_id, "Admission failed: {}", e);
            return;
        }
    };

    match disposition {
        Disposition::Rejected(reason) => {
            // A decided outcome, not a bug: log and end the call silently
            info!(%call_id, ?reason, "Call rejected");
        }
        Disposition::ForwardOnly { number } => {
            info!(%call_id, %number, "Call forwarded, watching stream only");
            forward_only_listener(socket, state.jobs.clone(), &number).await;
        }
        Disposition::Relay(admitted) => {
            let Some(api_key) = state.config.openai_api_key.clone() else {
                error!(%call_id, "No provider API key configured, ending call");
                return;
            };
            let deps = RelayDeps {
                jobs: state.jobs.clone(),
                functions: state.functions.clone(),
                hold_clip: state.hold_clip.clone(),
                recording_dir: state.config.recording_dir.clone(),
            };
            let ctx_call_id = admitted.context.call_id.clone();
            if let Err(e) =
                RelayEngine::run(socket, admitted.context, admitted.config, &api_key, deps).await
            {
                warn!(call_id = %ctx_call_id, "Relay session ended with fault: {}", e);
            }
        }
    }
}

/// Watch a forwarded call without opening a provider socket.
///
/// Only start/stop framing matters: start triggers call recording, the
/// end of the stream posts the post-call finalize job.
pub async fn forward_only_listener(
    mut socket: WebSocket,
    jobs: Arc<dyn JobQueue>,
    forward_number: &str,
) {
    let mut call_sid = String::new();

    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<TelephonyInbound>(&text) {
                Ok(TelephonyInbound::Start { start }) => {
                    call_sid = start.call_sid.clone();
                    info!(%call_sid, "Forwarded stream started, triggering recording");
                    let job = Job::immediate(
                        JobKind::StartRecording,
                        serde_json::json!({ "call_id": call_sid }),
                    );
                    if let Err(e) = jobs.submit(job).await {
                        warn!("Failed to trigger recording: {}", e);
                    }
                }
                Ok(TelephonyInbound::Stop) => break,
                Ok(_) => {}
                Err(e) => warn!("Failed to parse telephony frame: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Telephony socket error: {}", e);
                break;
            }
        }
    }

    info!(%call_sid, "Forwarded stream ended");
    let job = Job::immediate(
        JobKind::FinalizeCall,
        serde_json::json!({
            "call_id": call_sid,
            "forwarded_to": forward_number,
        }),
    );
    if let Err(e) = jobs.submit(job).await {
        warn!("Failed to submit finalize job: {}", e);
    }
}

// =============================================================================
// Default Hooks
// =============================================================================

/// Session hooks that log lifecycle events.
pub struct LoggingHooks;

#[async_trait]
impl SessionHooks for LoggingHooks {
    async fn session_ready(&self, ctx: &CallContext) {
        info!(call_id = %ctx.call_id, agent = %ctx.agent_id, "Session ready");
    }

    async fn client_started(&self, call_id: &str, stream_id: &str) {
        info!(%call_id, %stream_id, "Client stream started");
    }

    async fn function_call(&self, name: &str, arguments: &str) {
        info!(%name, %arguments, "Function call");
    }

    async fn transcription_completed(&self, lines: &[TranscriptLine]) {
        info!(lines = lines.len(), "Transcription completed");
    }

    async fn recording_complete(&self, artifact: Option<&RecordingArtifact>) {
        match artifact {
            Some(artifact) => info!(
                path = %artifact.path.display(),
                duration_ms = artifact.duration_ms,
                "Recording complete"
            ),
            None => info!("Recording complete (nothing written)"),
        }
    }
}
