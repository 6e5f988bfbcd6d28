//! Error types for DeepForge
//!
//! Provides a single error enum shared by the engine and its collaborators:
//! - Distinct variants for each failure mode
//! - Machine-readable error codes
//! - Retry classification for back-end calls

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // External service errors (8xxx)
    UpstreamError,
    GeneratorError,
    RetrievalError,
    EmbeddingError,
    Timeout,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::GeneratorError => 8002,
            ErrorCode::RetrievalError => 8003,
            ErrorCode::EmbeddingError => 8004,
            ErrorCode::Timeout => 8005,
            ErrorCode::CacheError => 8006,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // External service errors
    #[error("Generator error: {message}")]
    Generator { message: String },

    #[error("Retrieval error from {backend}: {message}")]
    Retrieval { backend: String, message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Generator { .. } => ErrorCode::GeneratorError,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a failed back-end call is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Retrieval { .. }
                | AppError::Timeout { .. }
                | AppError::HttpClient(_)
                | AppError::EmbeddingError { .. }
        )
    }

    /// Shorthand for a back-end retrieval failure
    pub fn retrieval(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Retrieval {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a generator failure
    pub fn generator(message: impl Into<String>) -> Self {
        AppError::Generator {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}
