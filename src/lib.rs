pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use crate::core::*;
pub use errors::{AppError, AppResult};
pub use jobs::{Job, JobKind, JobQueue, TokioJobQueue};
pub use state::AppState;
