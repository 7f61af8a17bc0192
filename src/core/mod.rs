//! Core call-handling machinery.
//!
//! Leaves first: routing rules and service hours, the directory seam,
//! audio helpers, then the admission controller, session configuration,
//! and the real-time relay engine.

pub mod admission;
pub mod audio;
pub mod directory;
pub mod realtime;
pub mod relay;
pub mod routing;
pub mod session;
pub mod telephony;

// Re-export commonly used types for convenience
pub use admission::{
    AdmissionController, AdmissionError, AdmittedCall, Disposition, InboundCall, RejectReason,
};
pub use directory::{
    AgentRecord, AssistantRecord, CallContext, DirectoryError, DirectoryResolver,
    ResolvedAssistant, StaticDirectoryResolver, normalize_number,
};
pub use relay::{
    FunctionRegistry, RelayDeps, RelayEngine, RelayError, RelayEvent, RelaySession,
    SpeechSynthesizer,
};
pub use routing::{InboundRoutingRule, RouteOutcome, RuleTarget, WeeklySchedule, evaluate};
pub use session::{
    IdleFollowUpPolicy, NoopHooks, RelaySessionConfig, SessionHooks, build_session_config,
};
