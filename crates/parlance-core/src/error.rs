//! Error types for the Parlance application.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire Parlance application.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ParlanceError {
    /// Error raised by the caller-supplied turn-start callback.
    ///
    /// Callback errors are never swallowed; they abort the turn and
    /// propagate to the caller.
    #[error("Callback error: {0}")]
    Callback(String),

    /// Error reported by a runner while delegating a turn.
    #[error("Runner error: {message}")]
    Runner {
        message: String,
        /// Whether retrying the same request could succeed (rate limits,
        /// transient network failures).
        is_retryable: bool,
    },

    /// Configuration error (missing credentials, malformed secret file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "JSON", "SSE", etc.
        message: String,
    },

    /// Unknown persona or tool referenced by a run
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParlanceError {
    /// Creates a Callback error
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }

    /// Creates a non-retryable Runner error
    pub fn runner(message: impl Into<String>) -> Self {
        Self::Runner {
            message: message.into(),
            is_retryable: false,
        }
    }

    /// Creates a retryable Runner error
    pub fn runner_retryable(message: impl Into<String>) -> Self {
        Self::Runner {
            message: message.into(),
            is_retryable: true,
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a Callback error
    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Callback(_))
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Runner { is_retryable: true, .. })
    }
}

impl From<serde_json::Error> for ParlanceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, ParlanceError>;
