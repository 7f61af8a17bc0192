//! The real-time relay engine.
//!
//! One relay session owns exactly one client (telephony) socket and one
//! provider socket for the duration of a call and keeps them semantically
//! synchronized. It is a translating proxy, not a byte pipe: both legs are
//! JSON-framed event protocols with different vocabularies.
//!
//! All mutable per-call state is owned by a single control loop; the two
//! socket pumps only parse frames and push [`RelayEvent`]s into it over a
//! channel. Closing either socket cancels both pumps, the idle timer and
//! any in-flight suspend/resume side computation.

mod engine;
mod functions;
mod runtime;

pub use engine::{Flow, RelayChannels, RelayDeps, RelayEngine, RelayEvent, RelaySession};
pub use functions::{
    CallSnapshot, FunctionCall, FunctionHandler, FunctionOutcome, FunctionRegistry,
    SpeechSynthesizer, SuspendFuture,
};
pub use runtime::{RelayRuntimeState, Truncation};

use thiserror::Error;

use crate::core::realtime::RealtimeError;

/// Faults inside the relay path. Nothing here is retried — a dropped call
/// is not resumable; finalize callbacks still fire with partial data.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Either socket failed or closed unexpectedly
    #[error("Transport fault: {0}")]
    Transport(String),

    /// The provider leg failed
    #[error(transparent)]
    Provider(#[from] RealtimeError),

    /// A function-call handler failed; caught per-dispatch
    #[error("Handler fault: {0}")]
    Handler(String),

    /// The session is already torn down
    #[error("Session closed")]
    Closed,
}
