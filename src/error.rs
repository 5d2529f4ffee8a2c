//! Centralized error handling module
//!
//! Provides the HTTP-facing error type with its response mapping, and the
//! ingest error type raised by the message reducers.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Faults raised while folding a broker message into state.
///
/// None of these are fatal: the message is discarded and state is left as
/// it was before the message arrived.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("no handler for topic {0}")]
    UnroutableTopic(String),

    #[error("sensor value {value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

impl IngestError {
    pub fn malformed(topic: &str, reason: impl fmt::Display) -> Self {
        IngestError::MalformedPayload {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Standardized error response format
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Unique correlation ID for tracing
    pub correlation_id: String,
    /// Error type classification
    pub error_type: String,
    /// Human-readable error message (safe for clients)
    pub message: String,
    /// HTTP status code
    pub status_code: u16,
    /// Timestamp of the error
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str, status_code: StatusCode) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            status_code: status_code.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let ingest_message;
        let (error_type, message) = match self {
            AppError::ValidationError(msg) => ("VALIDATION_ERROR", msg.as_str()),
            AppError::IngestError(err) => {
                ingest_message = err.to_string();
                ("INGEST_ERROR", ingest_message.as_str())
            }
            AppError::InternalError(msg) => {
                // Log internal errors but return safe message to client
                error!(error = %msg, "Internal server error occurred");
                ("INTERNAL_ERROR", "An internal error occurred")
            }
            AppError::NotFound(msg) => ("NOT_FOUND", msg.as_str()),
            AppError::Unavailable(msg) => ("SERVICE_UNAVAILABLE", msg.as_str()),
        };

        let status = self.status_code();
        let error_response = ErrorResponse::new(error_type, message, status);

        error!(
            correlation_id = %error_response.correlation_id,
            error_type = %error_type,
            status_code = %status.as_u16(),
            "Error response generated"
        );

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::IngestError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;
