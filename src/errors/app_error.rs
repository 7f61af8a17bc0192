//! Application-level errors surfaced as HTTP responses.
//!
//! Everything below the HTTP boundary uses its own domain error types
//! (admission, relay, realtime); this type only exists to turn boundary
//! failures into status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type for HTTP handlers and middleware.
pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request signature missing or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Connection limits reached
    #[error("Too many connections: {0}")]
    TooManyConnections(String),

    /// Capacity exhausted
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::TooManyConnections(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let response = AppError::Unauthorized("bad signature".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = AppError::TooManyConnections("per-ip".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
