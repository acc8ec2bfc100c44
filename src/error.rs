//! # Error Handling
//!
//! This module defines the relay's error types and how they're converted to HTTP responses.
//!
//! ## Two error families:
//! - **AppError**: request-scoped failures. Every handler returns `AppResult<T>`
//!   and actix turns the error into a status code plus a JSON body.
//! - **DeliveryError**: the outcome of pushing bytes to a client connection.
//!   `Gone` and `Transient` must stay distinguishable because only `Gone`
//!   tears a session down.
//!
//! ## Status mapping:
//! | Variant              | Status |
//! |----------------------|--------|
//! | ValidationError      | 400    |
//! | MethodNotAllowed     | 405    |
//! | SessionNotFound      | 410    |
//! | BackendUnavailable   | 410    |
//! | Internal             | 500    |
//!
//! Delivery failures never reach an HTTP response: the outbound listener
//! handles them. Startup configuration failures end the process through `anyhow`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the relay.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::SessionNotFound(connection_id.to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Inbound body was not valid JSON or missed a required field
    ValidationError(String),

    /// Endpoint exists but not for this HTTP method
    MethodNotAllowed(String),

    /// No live backend session for the given connection id
    SessionNotFound(String),

    /// Dialing, handshaking with, or writing to the backend failed
    BackendUnavailable(String),

    /// Anything else that went wrong on our side
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::MethodNotAllowed(msg) => write!(f, "Method not allowed: {}", msg),
            AppError::SessionNotFound(id) => write!(f, "No session for connection {}", id),
            AppError::BackendUnavailable(msg) => write!(f, "Backend unavailable: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation_error",
            AppError::MethodNotAllowed(_) => "method_not_allowed",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// Converts relay errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "session_not_found",
///     "message": "No session for connection abc=",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::SessionNotFound(_) | AppError::BackendUnavailable(_) => StatusCode::GONE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed inbound JSON is always the caller's fault, so it maps to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("Invalid JSON: {}", err))
    }
}

/// Failure to push bytes to a client connection through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The gateway no longer knows the connection (carries the connection id)
    Gone(String),
    /// Timeout, 5xx, throttling, transport error: retrying may help
    Transient(String),
}

impl DeliveryError {
    pub fn is_gone(&self) -> bool {
        matches!(self, DeliveryError::Gone(_))
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Gone(id) => write!(f, "connection {} is gone", id),
            DeliveryError::Transient(msg) => write!(f, "transient delivery failure: {}", msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::ValidationError("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::MethodNotAllowed("x".into()).status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(AppError::SessionNotFound("x".into()).status_code(), StatusCode::GONE);
        assert_eq!(AppError::BackendUnavailable("x".into()).status_code(), StatusCode::GONE);
        assert_eq!(AppError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_json_error_is_validation() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err().into();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_error_body_names_type() {
        let response = AppError::SessionNotFound("abc".into()).error_response();
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(AppError::SessionNotFound("abc".into()).error_type(), "session_not_found");
    }

    #[test]
    fn test_delivery_error_kinds() {
        assert!(DeliveryError::Gone("abc".into()).is_gone());
        assert!(!DeliveryError::Transient("timeout".into()).is_gone());
    }
}
