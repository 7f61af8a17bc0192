//! Per-call session configuration.
//!
//! The admission controller assembles one immutable [`RelaySessionConfig`]
//! per AI-handled call; the relay engine consumes it. Assembly is pure:
//! optional pieces (tool schemas, turn detection, noise reduction, idle
//! policy) are simply omitted when absent, never an error.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::audio::RecordingArtifact;
use crate::core::directory::{AgentRecord, CallContext, ResolvedAssistant};
use crate::core::realtime::{
    InputTranscriptionConfig, OpenAiRealtimeAudioFormat, RealtimeConfig, TranscriptLine,
};

/// Idle follow-up policy: re-engage a silent caller.
#[derive(Debug, Clone)]
pub struct IdleFollowUpPolicy {
    /// Seconds without any relayed event before a follow-up
    pub timeout_secs: u64,
    /// Message injected as a new user turn
    pub message: String,
    /// How many follow-ups before giving up
    pub max_injections: u32,
}

impl Default for IdleFollowUpPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 12,
            message: "The caller has been silent for a while. Gently ask if they are still there."
                .to_string(),
            max_injections: 2,
        }
    }
}

/// Immutable configuration for one AI-handled call.
#[derive(Clone)]
pub struct RelaySessionConfig {
    /// Provider session settings (model, voice, prompt, tools, policies)
    pub provider: RealtimeConfig,
    /// Greeting instruction, spoken once when the provider is ready
    pub greeting: Option<String>,
    /// Whether the call is recorded
    pub recording: bool,
    /// Idle follow-up policy; `None` disables follow-ups
    pub idle: Option<IdleFollowUpPolicy>,
    /// Lifecycle hooks, invoked many times per call
    pub hooks: Arc<dyn SessionHooks>,
}

// =============================================================================
// Lifecycle Hooks
// =============================================================================

/// Session lifecycle callbacks, one method per event.
///
/// Configured once per call, invoked by the relay engine as the call
/// progresses. All methods default to no-ops so implementors only write
/// the ones they care about.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// The provider session is configured and ready for audio.
    async fn session_ready(&self, _ctx: &CallContext) {}

    /// The client's start frame arrived.
    async fn client_started(&self, _call_id: &str, _stream_id: &str) {}

    /// The model invoked a function.
    async fn function_call(&self, _name: &str, _arguments: &str) {}

    /// The session ended; here is everything that was transcribed.
    async fn transcription_completed(&self, _lines: &[TranscriptLine]) {}

    /// The session ended; here is the recording, if one was written.
    async fn recording_complete(&self, _artifact: Option<&RecordingArtifact>) {}
}

/// Hooks that do nothing; useful as a default and in tests.
pub struct NoopHooks;

#[async_trait]
impl SessionHooks for NoopHooks {}

// =============================================================================
// Assembly
// =============================================================================

/// Assemble the session configuration for one admitted call.
///
/// Merges the resolved assistant, prompt and tool schemas with the
/// owning agent's recording policy. The telephony path pins G.711 u-law
/// on both provider directions.
pub fn build_session_config(
    resolved: &ResolvedAssistant,
    agent: &AgentRecord,
    hooks: Arc<dyn SessionHooks>,
) -> RelaySessionConfig {
    let assistant = &resolved.assistant;
    let ulaw = OpenAiRealtimeAudioFormat::G711Ulaw.as_str().to_string();

    let provider = RealtimeConfig {
        model: assistant.model.clone(),
        voice: assistant.voice.clone(),
        instructions: Some(resolved.prompt.clone()),
        language: assistant.language.clone(),
        temperature: assistant.temperature,
        input_audio_format: Some(ulaw.clone()),
        output_audio_format: Some(ulaw),
        input_audio_transcription: Some(InputTranscriptionConfig {
            model: "whisper-1".to_string(),
        }),
        turn_detection: assistant.turn_detection.clone(),
        noise_reduction: assistant.noise_reduction.clone(),
        tools: if resolved.function_schemas.is_empty() {
            None
        } else {
            Some(resolved.function_schemas.clone())
        },
        tool_choice: None,
    };

    let idle = assistant.idle_message.as_ref().map(|message| {
        let defaults = IdleFollowUpPolicy::default();
        IdleFollowUpPolicy {
            timeout_secs: assistant.idle_timeout_secs.unwrap_or(defaults.timeout_secs),
            message: message.clone(),
            max_injections: assistant
                .idle_max_injections
                .unwrap_or(defaults.max_injections),
        }
    });

    RelaySessionConfig {
        provider,
        greeting: assistant.greeting.clone(),
        recording: agent.recording_enabled,
        idle,
        hooks,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directory::AssistantRecord;
    use crate::core::realtime::{FunctionDefinition, ToolDefinition};

    fn resolved(assistant: AssistantRecord) -> ResolvedAssistant {
        ResolvedAssistant {
            assistant,
            prompt: "You take pizza orders.".to_string(),
            function_schemas: vec![],
        }
    }

    #[test]
    fn test_minimal_assistant_builds() {
        let config = build_session_config(
            &resolved(AssistantRecord {
                id: "a1".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                ..Default::default()
            }),
            &AgentRecord::default(),
            Arc::new(NoopHooks),
        );

        assert_eq!(config.provider.model, "gpt-4o-realtime-preview");
        assert_eq!(
            config.provider.instructions.as_deref(),
            Some("You take pizza orders.")
        );
        assert_eq!(
            config.provider.input_audio_format.as_deref(),
            Some("g711_ulaw")
        );
        // Absent optionals are omitted, never an error
        assert!(config.provider.tools.is_none());
        assert!(config.provider.turn_detection.is_none());
        assert!(config.provider.noise_reduction.is_none());
        assert!(config.idle.is_none());
        assert!(!config.recording);
    }

    #[test]
    fn test_tools_carried_when_present() {
        let mut r = resolved(AssistantRecord::default());
        r.function_schemas = vec![ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "confirm_order".to_string(),
                description: None,
                parameters: None,
            },
        }];
        let config = build_session_config(&r, &AgentRecord::default(), Arc::new(NoopHooks));
        assert_eq!(config.provider.tools.unwrap().len(), 1);
    }

    #[test]
    fn test_idle_policy_from_assistant() {
        let config = build_session_config(
            &resolved(AssistantRecord {
                idle_message: Some("Still there?".to_string()),
                idle_timeout_secs: Some(20),
                ..Default::default()
            }),
            &AgentRecord::default(),
            Arc::new(NoopHooks),
        );
        let idle = config.idle.unwrap();
        assert_eq!(idle.timeout_secs, 20);
        assert_eq!(idle.message, "Still there?");
        assert_eq!(idle.max_injections, IdleFollowUpPolicy::default().max_injections);
    }

    #[test]
    fn test_recording_follows_agent() {
        let config = build_session_config(
            &resolved(AssistantRecord::default()),
            &AgentRecord {
                recording_enabled: true,
                ..Default::default()
            },
            Arc::new(NoopHooks),
        );
        assert!(config.recording);
    }
}
