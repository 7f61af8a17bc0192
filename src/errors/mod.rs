//! Error types for the HTTP boundary.

pub mod app_error;

pub use app_error::{AppError, AppResult};
