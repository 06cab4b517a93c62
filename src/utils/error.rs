//! Error types and handling
//!
//! Common error types used across the recorder contexts.

use crate::capture::traits::StreamKind;
use crate::recorder::state::SessionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Device access refused by the user or the platform
    #[error("Permission denied for {kind}: {reason}")]
    PermissionDenied { kind: StreamKind, reason: String },

    /// A capture stream ended while the session depended on it
    #[error("Capture stream lost: {0}")]
    DeviceLost(StreamKind),

    #[error("Insufficient storage: {available} bytes free, {required} required")]
    InsufficientStorage { available: u64, required: u64 },

    /// Write attempted on a writer that was already closed
    #[error("Resource already closed: {0}")]
    ClosedResource(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    /// Missing session id or nothing registered for upload
    #[error("Session precondition failed: {0}")]
    SessionPrecondition(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition { state: SessionState, action: &'static str },

    #[error("Message bus error: {0}")]
    Bus(String),
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Transport(error.to_string())
    }
}

impl AppError {
    /// Whether the session can continue (possibly after a state change) after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AppError::ClosedResource(_))
    }
}

/// Error response for the control panel
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::PermissionDenied { .. } => "PERMISSION_DENIED",
            AppError::DeviceLost(_) => "DEVICE_LOST",
            AppError::InsufficientStorage { .. } => "INSUFFICIENT_STORAGE",
            AppError::ClosedResource(_) => "CLOSED_RESOURCE",
            AppError::Transport(_) => "TRANSPORT_FAILURE",
            AppError::SessionPrecondition(_) => "SESSION_PRECONDITION",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::Bus(_) => "BUS_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
