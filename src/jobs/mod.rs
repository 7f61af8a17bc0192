//! Background job submission.
//!
//! Call-control side effects (recording trigger, human transfer, hangup,
//! post-call finalization) never run inline on the relay's event loop.
//! They are submitted here, fire-and-forget, optionally delayed — the
//! transfer delay is a UX timing contract: the assistant's spoken
//! acknowledgement must finish before the call control action lands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised on job submission.
#[derive(Debug, Error)]
pub enum JobError {
    /// The queue is no longer accepting jobs
    #[error("Job queue closed")]
    Closed,
}

// =============================================================================
// Jobs
// =============================================================================

/// The kinds of background work a call can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Start call recording on the telephony platform
    StartRecording,
    /// Transfer the live call to a human number
    TransferToHuman,
    /// Hang the call up
    EndCall,
    /// Persist the post-call record (transcripts, recording, outcome)
    FinalizeCall,
}

/// One submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// What to do
    pub kind: JobKind,
    /// Kind-specific payload
    pub payload: serde_json::Value,
    /// How long to wait before executing
    #[serde(default)]
    pub delay: Option<Duration>,
}

impl Job {
    /// A job with no delay.
    pub fn immediate(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            delay: None,
        }
    }

    /// A job executed after `delay`.
    pub fn delayed(kind: JobKind, payload: serde_json::Value, delay: Duration) -> Self {
        Self {
            kind,
            payload,
            delay: Some(delay),
        }
    }
}

// =============================================================================
// Delay Table
// =============================================================================

/// Delay before a call-control action triggered by a function call.
///
/// Tuned per category so the assistant's spoken line finishes first; this
/// is a deliberate timing contract, not incidental.
pub fn control_action_delay(kind: JobKind) -> Duration {
    match kind {
        JobKind::EndCall => Duration::from_secs(2),
        JobKind::TransferToHuman => Duration::from_secs(4),
        JobKind::StartRecording | JobKind::FinalizeCall => Duration::from_secs(0),
    }
}

// =============================================================================
// Queue Seam
// =============================================================================

/// Fire-and-forget job submission, safe for concurrent use by many calls.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job. Returns as soon as the job is accepted.
    async fn submit(&self, job: Job) -> Result<(), JobError>;
}

/// In-process queue backed by a tokio worker.
///
/// Delayed jobs are parked on their own timer task so one long delay
/// never holds up the queue. Execution itself belongs to the external
/// call-control collaborators; this worker logs and forwards.
pub struct TokioJobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl TokioJobQueue {
    /// Spawn the worker and return the queue handle.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job.delay {
                    Some(delay) if !delay.is_zero() => {
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            execute(job);
                        });
                    }
                    _ => execute(job),
                }
            }
        });
        Self { tx }
    }
}

impl Default for TokioJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn execute(job: Job) {
    tracing::info!(kind = ?job.kind, payload = %job.payload, "Executing background job");
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn submit(&self, job: Job) -> Result<(), JobError> {
        self.tx.send(job).map_err(|_| JobError::Closed)
    }
}

// =============================================================================
// Tests
// =============================================================================
