//! # Error Handling
//!
//! This module defines custom error types and how they're converted to HTTP responses
//! and WebSocket `error` events.
//!
//! ## Error Categories:
//! - **Internal / ConfigError**: server-side problems (500 errors)
//! - **BadRequest / ValidationError**: client sent invalid data (400 errors)
//! - **Backend errors** (Transcription / Completion / Synthesis): a call to an
//!   external collaborator failed; these are reported to the WebSocket client
//!   as an `error` event and never tear down the connection
//! - **Segmentation**: a voice-activity detection pass failed; handled silently
//!   (logged, buffer cleared), never reported to the client
//!
//! ## Propagation policy:
//! Every error is contained at the narrowest boundary possible. Nothing in this
//! crate propagates an error far enough to crash the process or the event loop.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// ```
#[derive(Debug, Clone)]
pub enum AppError {
    /// Internal server errors (lock poisoning, unexpected state, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Speech-to-text backend call failed
    Transcription(String),

    /// Completion (chat/tool-calling) backend call failed
    Completion(String),

    /// Text-to-speech backend call failed
    Synthesis(String),

    /// Voice-activity detection failed while evaluating a buffer
    Segmentation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Transcription(msg) => write!(f, "Transcription error: {}", msg),
            AppError::Completion(msg) => write!(f, "Completion error: {}", msg),
            AppError::Synthesis(msg) => write!(f, "Speech synthesis error: {}", msg),
            AppError::Segmentation(msg) => write!(f, "Segmentation error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Machine-readable error tag used in HTTP bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::Transcription(_) => "transcription_error",
            AppError::Completion(_) => "completion_error",
            AppError::Synthesis(_) => "synthesis_error",
            AppError::Segmentation(_) => "segmentation_error",
        }
    }
}

/// Converts errors to HTTP responses for the REST surface.
///
/// ## HTTP Status Code Mapping:
/// - Internal / ConfigError / backend errors → 500 (Internal Server Error)
/// - BadRequest / ValidationError → 400 (Bad Request)
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let status = match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// When you use `?` with an anyhow::Error, it automatically becomes an
/// AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always due to the client sending malformed
/// data, so they become a 400, not a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
