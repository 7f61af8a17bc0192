//! Mid-session function-call dispatch.
//!
//! The model invokes functions by name; the relay looks the name up in a
//! registered handler table. An unknown name is a no-op, never an error —
//! the model may invent names.
//!
//! Two handler shapes exist. Synchronous-result handlers return a short
//! instruction describing what the assistant should say next; the relay
//! feeds it back as the function output so the conversation continues
//! without touching the audio path. Suspend/resume handlers hand back a
//! side computation; the relay pauses caller-audio forwarding, plays a
//! hold clip, runs the computation off the control loop, and streams the
//! synthesized result to the caller.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::RelayError;
use crate::core::directory::CallContext;
use crate::jobs::{Job, JobKind, JobQueue, control_action_delay};

/// A function call extracted from a provider response.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    /// Provider call id, echoed back with the result
    pub call_id: String,
    /// Function name
    pub name: String,
    /// JSON arguments
    pub arguments: String,
}

impl FunctionCall {
    /// Read a string argument from the JSON payload.
    pub fn arg(&self, key: &str) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(&self.arguments)
            .ok()?
            .get(key)?
            .as_str()
            .map(str::to_string)
    }
}

/// Read-only view of session state a handler may need.
pub struct CallSnapshot {
    /// Caller audio accumulated so far (u-law)
    pub caller_audio: Bytes,
}

/// The side computation of a suspend/resume handler.
pub type SuspendFuture = Pin<Box<dyn Future<Output = Result<Bytes, RelayError>> + Send>>;

/// What a handler decided.
pub enum FunctionOutcome {
    /// Feed this instruction back as the function output
    Reply {
        /// What the assistant should say next
        text: String,
        /// Mark the call as handed to a human
        transferred: bool,
    },
    /// Pause caller audio and run this computation; its output is u-law
    /// audio streamed straight to the caller
    Suspend(SuspendFuture),
}

impl FunctionOutcome {
    /// A plain reply.
    pub fn reply(text: impl Into<String>) -> Self {
        FunctionOutcome::Reply {
            text: text.into(),
            transferred: false,
        }
    }

    /// A reply that also marks the call transferred.
    pub fn reply_transferred(text: impl Into<String>) -> Self {
        FunctionOutcome::Reply {
            text: text.into(),
            transferred: true,
        }
    }
}

/// One registered function handler.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Handle one invocation.
    async fn invoke(
        &self,
        call: &FunctionCall,
        ctx: &CallContext,
        snapshot: &CallSnapshot,
    ) -> Result<FunctionOutcome, RelayError>;
}

/// Summarizes recorded caller audio into synthesized speech. External
/// collaborator; the relay only needs this seam.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Produce a spoken order summary from accumulated caller audio.
    /// Returns u-law audio at the telephony sample rate.
    async fn summarize_order(&self, caller_audio: Bytes) -> Result<Bytes, RelayError>;
}

// =============================================================================
// Registry
// =============================================================================

/// Handler table keyed by function name.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
}

impl FunctionRegistry {
    /// An empty registry; every function call is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard handler set. The suspend/resume handler is only
    /// registered when a synthesizer is available.
    pub fn standard(
        jobs: Arc<dyn JobQueue>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register("confirm_order", Arc::new(ConfirmOrder));
        registry.register("confirm_customer_info", Arc::new(ConfirmCustomerInfo));
        registry.register("confirm_pickup_time", Arc::new(ConfirmPickupTime));
        registry.register("end_call", Arc::new(EndCall { jobs: jobs.clone() }));
        registry.register("transfer_to_human", Arc::new(TransferToHuman { jobs }));
        if let Some(synthesizer) = synthesizer {
            registry.register("repeat_order", Arc::new(RepeatOrder { synthesizer }));
        }
        registry
    }

    /// Register a handler under a function name.
    pub fn register(&mut self, name: &str, handler: Arc<dyn FunctionHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Look a handler up; `None` means "ignore the call".
    pub fn get(&self, name: &str) -> Option<Arc<dyn FunctionHandler>> {
        self.handlers.get(name).cloned()
    }
}

// =============================================================================
// Standard Handlers
// =============================================================================

/// Order confirmation: acknowledge and keep going.
struct ConfirmOrder;

#[async_trait]
impl FunctionHandler for ConfirmOrder {
    async fn invoke(
        &self,
        _call: &FunctionCall,
        _ctx: &CallContext,
        _snapshot: &CallSnapshot,
    ) -> Result<FunctionOutcome, RelayError> {
        Ok(FunctionOutcome::reply(
            "The order has been recorded. Briefly read the order back to the caller \
             and ask if anything is missing.",
        ))
    }
}

/// Customer info confirmation.
struct ConfirmCustomerInfo;

#[async_trait]
impl FunctionHandler for ConfirmCustomerInfo {
    async fn invoke(
        &self,
        call: &FunctionCall,
        _ctx: &CallContext,
        _snapshot: &CallSnapshot,
    ) -> Result<FunctionOutcome, RelayError> {
        let text = match call.arg("name") {
            Some(name) => format!(
                "Customer details are saved. Thank {name} for confirming and continue with the order."
            ),
            None => "Customer details are saved. Thank the caller and continue with the order."
                .to_string(),
        };
        Ok(FunctionOutcome::reply(text))
    }
}

/// Pickup time confirmation.
struct ConfirmPickupTime;

#[async_trait]
impl FunctionHandler for ConfirmPickupTime {
    async fn invoke(
        &self,
        call: &FunctionCall,
        _ctx: &CallContext,
        _snapshot: &CallSnapshot,
    ) -> Result<FunctionOutcome, RelayError> {
        let text = match call.arg("pickup_time") {
            Some(time) => format!(
                "The pickup time {time} works. Confirm it to the caller and wrap up the order."
            ),
            None => "The requested pickup time works. Confirm it to the caller and wrap up \
                     the order."
                .to_string(),
        };
        Ok(FunctionOutcome::reply(text))
    }
}

/// Hang the call up, after the assistant says goodbye.
struct EndCall {
    jobs: Arc<dyn JobQueue>,
}

#[async_trait]
impl FunctionHandler for EndCall {
    async fn invoke(
        &self,
        _call: &FunctionCall,
        ctx: &CallContext,
        _snapshot: &CallSnapshot,
    ) -> Result<FunctionOutcome, RelayError> {
        let job = Job::delayed(
            JobKind::EndCall,
            serde_json::json!({ "call_id": ctx.call_id }),
            control_action_delay(JobKind::EndCall),
        );
        if let Err(e) = self.jobs.submit(job).await {
            tracing::warn!("Failed to schedule hangup: {}", e);
        }
        Ok(FunctionOutcome::reply(
            "Thank the caller warmly and say goodbye. The call will end in a moment.",
        ))
    }
}

/// Transfer the call to a human, if one is configured.
struct TransferToHuman {
    jobs: Arc<dyn JobQueue>,
}

#[async_trait]
impl FunctionHandler for TransferToHuman {
    async fn invoke(
        &self,
        _call: &FunctionCall,
        ctx: &CallContext,
        _snapshot: &CallSnapshot,
    ) -> Result<FunctionOutcome, RelayError> {
        let Some(contact) = ctx
            .human_contact_phone
            .as_deref()
            .filter(|n| !n.is_empty())
        else {
            // No one to transfer to; the assistant apologizes and carries on
            return Ok(FunctionOutcome::reply(
                "Apologize to the caller: no team member is available to take the call \
                 right now, and offer to keep helping them yourself.",
            ));
        };

        let job = Job::delayed(
            JobKind::TransferToHuman,
            serde_json::json!({ "call_id": ctx.call_id, "to": contact }),
            control_action_delay(JobKind::TransferToHuman),
        );
        if let Err(e) = self.jobs.submit(job).await {
            tracing::warn!("Failed to schedule transfer: {}", e);
        }
        Ok(FunctionOutcome::reply_transferred(
            "Let the caller know you are connecting them to a team member now and ask \
             them to stay on the line.",
        ))
    }
}

/// Repeat the order back to the caller (suspend/resume).
struct RepeatOrder {
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

#[async_trait]
impl FunctionHandler for RepeatOrder {
    async fn invoke(
        &self,
        _call: &FunctionCall,
        _ctx: &CallContext,
        snapshot: &CallSnapshot,
    ) -> Result<FunctionOutcome, RelayError> {
        let synthesizer = self.synthesizer.clone();
        let audio = snapshot.caller_audio.clone();
        Ok(FunctionOutcome::Suspend(Box::pin(async move {
            synthesizer.summarize_order(audio).await
        })))
    }
}

// =============================================================================
// Tests
// =============================================================================
