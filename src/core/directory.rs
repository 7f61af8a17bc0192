//! Call directory: agents, assistants and the resolver seam.
//!
//! Agent/assistant configuration and prompt resolution live outside this
//! system; the relay only needs the [`DirectoryResolver`] trait. A small
//! file-backed implementation is provided so the gateway runs standalone.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::core::realtime::{ToolDefinition, TurnDetectionConfig};
use crate::core::routing::{InboundRoutingRule, WeeklySchedule};

/// Errors raised by directory lookups.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The backing store could not be read
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    /// A referenced assistant does not exist
    #[error("Unknown assistant: {0}")]
    UnknownAssistant(String),
}

// =============================================================================
// Records
// =============================================================================

/// The agent owning a phone number, with its routing and hours policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent id
    pub id: String,
    /// Inactive agents reject all calls
    #[serde(default)]
    pub active: bool,
    /// Routing rules in priority order
    #[serde(default)]
    pub routing_rules: Vec<InboundRoutingRule>,
    /// Weekly service hours
    #[serde(default)]
    pub weekly_hours: WeeklySchedule,
    /// Whether calls outside hours may fall back to a human
    #[serde(default)]
    pub manual_fallback_enabled: bool,
    /// Number the assistant can transfer callers to
    #[serde(default)]
    pub transfer_number: Option<String>,
    /// Direct human contact for transfer requests
    #[serde(default)]
    pub human_contact_phone: Option<String>,
    /// Assistant used when no routing rule matches
    #[serde(default)]
    pub default_assistant_id: Option<String>,
    /// Whether calls are recorded
    #[serde(default)]
    pub recording_enabled: bool,
}

/// A configured assistant: model/voice selection plus session policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantRecord {
    /// Assistant id
    pub id: String,
    /// Provider model name
    #[serde(default)]
    pub model: String,
    /// Voice for synthesized speech
    #[serde(default)]
    pub voice: Option<String>,
    /// Conversation language hint
    #[serde(default)]
    pub language: Option<String>,
    /// Greeting spoken when the session opens
    #[serde(default)]
    pub greeting: Option<String>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Turn detection policy
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,
    /// Noise reduction policy (opaque passthrough)
    #[serde(default)]
    pub noise_reduction: Option<serde_json::Value>,
    /// Seconds of silence before an idle follow-up
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Follow-up message injected on idle
    #[serde(default)]
    pub idle_message: Option<String>,
    /// Maximum idle follow-ups per call
    #[serde(default)]
    pub idle_max_injections: Option<u32>,
}

/// Everything the knowledge/prompt layer resolves for one call.
#[derive(Debug, Clone)]
pub struct ResolvedAssistant {
    /// The assistant record
    pub assistant: AssistantRecord,
    /// The fully resolved system prompt
    pub prompt: String,
    /// Tool schemas exposed to the model
    pub function_schemas: Vec<ToolDefinition>,
}

// =============================================================================
// Call Context
// =============================================================================

/// Per-call context, owned by the admission controller until handoff and
/// by the relay engine afterwards.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Caller number (normalized)
    pub from: String,
    /// Called number (normalized)
    pub to: String,
    /// Telephony platform call id
    pub call_id: String,
    /// Media stream id; set when the client's start frame arrives
    pub stream_id: String,
    /// Assistant selected for the call
    pub assistant_id: Option<String>,
    /// Called-number record id
    pub number_id: Option<String>,
    /// Owning agent
    pub agent_id: String,
    /// Assistant chosen by a routing rule, when one matched
    pub forward_assistant_id: Option<String>,
    /// Direct human contact for transfer requests
    pub human_contact_phone: Option<String>,
    /// Number used by manual fallback
    pub transfer_number: Option<String>,
    /// Whether the call arrived within service hours
    pub is_in_service_hours: bool,
    /// Whether out-of-hours calls may reach a human
    pub manual_fallback_enabled: bool,
    /// Set once the call has been handed to a human
    pub is_transferred: bool,
    /// The resolved system prompt
    pub resolved_prompt: String,
    /// Tool schemas exposed to the model
    pub function_schemas: Vec<ToolDefinition>,
    /// In-progress order state, owned by the external order layer
    pub order_state: serde_json::Value,
    /// Caller profile from the external CRM layer
    pub caller_profile: Option<serde_json::Value>,
    /// Profile captured on the caller's previous call
    pub last_caller_profile: Option<serde_json::Value>,
}

// =============================================================================
// Resolver Seam
// =============================================================================

/// Boundary to the external knowledge/prompt layer.
#[async_trait]
pub trait DirectoryResolver: Send + Sync {
    /// Resolve the agent owning a called number, if any.
    async fn resolve_agent(&self, to: &str) -> Result<Option<AgentRecord>, DirectoryError>;

    /// Resolve the assistant, prompt and tool schemas for a call.
    async fn resolve_assistant(
        &self,
        from: &str,
        to: &str,
        assistant_id: Option<&str>,
    ) -> Result<ResolvedAssistant, DirectoryError>;
}

// =============================================================================
// Phone Numbers
// =============================================================================

static NON_DIAL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\d+]").expect("static pattern compiles"));

/// Normalize a phone number to digits with an optional leading `+`.
pub fn normalize_number(raw: &str) -> String {
    let cleaned = NON_DIAL_CHARS.replace_all(raw.trim(), "");
    match cleaned.strip_prefix('+') {
        Some(rest) => format!("+{}", rest.replace('+', "")),
        None => cleaned.replace('+', ""),
    }
}

// =============================================================================
// File-Backed Directory
// =============================================================================

/// YAML document backing [`StaticDirectoryResolver`].
#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    /// Agents keyed by called number
    #[serde(default)]
    numbers: HashMap<String, AgentRecord>,
    /// Assistants keyed by id
    #[serde(default)]
    assistants: HashMap<String, AssistantRecord>,
    /// Prompts keyed by assistant id
    #[serde(default)]
    prompts: HashMap<String, String>,
    /// Tool schemas keyed by assistant id
    #[serde(default)]
    tools: HashMap<String, Vec<ToolDefinition>>,
}

/// A directory loaded once from a YAML file.
///
/// Stands in for the external knowledge/prompt layer in standalone
/// deployments and tests.
pub struct StaticDirectoryResolver {
    file: DirectoryFile,
}

impl StaticDirectoryResolver {
    /// Load the directory from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Unavailable(format!("{}: {e}", path.display())))?;
        let file: DirectoryFile = serde_yaml::from_str(&raw)
            .map_err(|e| DirectoryError::Unavailable(format!("{}: {e}", path.display())))?;
        Ok(Self { file })
    }

    /// An empty directory; every call is rejected for lack of an agent.
    pub fn empty() -> Self {
        Self {
            file: DirectoryFile::default(),
        }
    }
}

#[async_trait]
impl DirectoryResolver for StaticDirectoryResolver {
    async fn resolve_agent(&self, to: &str) -> Result<Option<AgentRecord>, DirectoryError> {
        Ok(self.file.numbers.get(to).cloned())
    }

    async fn resolve_assistant(
        &self,
        _from: &str,
        _to: &str,
        assistant_id: Option<&str>,
    ) -> Result<ResolvedAssistant, DirectoryError> {
        let id = assistant_id.unwrap_or_default();
        let assistant = self
            .file
            .assistants
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownAssistant(id.to_string()))?;
        let prompt = self.file.prompts.get(id).cloned().unwrap_or_default();
        let function_schemas = self.file.tools.get(id).cloned().unwrap_or_default();
        Ok(ResolvedAssistant {
            assistant,
            prompt,
            function_schemas,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
