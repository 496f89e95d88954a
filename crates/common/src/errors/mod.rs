//! Error types for the compliance loader
//!
//! Provides a single error enum for every layer with:
//! - Distinct variants for invalid input, data corruption and remote failures
//! - Machine-readable error codes
//! - A coarse classification that callers use to decide between halting a
//!   record and retrying it

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
    MissingField,
    InvalidArgument,

    // Resource errors (4xxx)
    NotFound,
    GrantNotFound,

    // Integrity errors (5xxx)
    DataCorruption,

    // Remote repository errors (8xxx)
    UpstreamError,
    GatewayError,
    IndexTimeout,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidArgument => 1003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::GrantNotFound => 4002,

            // Integrity (5xxx)
            ErrorCode::DataCorruption => 5001,

            // Remote (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::GatewayError => 8002,
            ErrorCode::IndexTimeout => 8003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Coarse error family used by orchestrators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller error: empty natural key, unusable record
    InvalidInput,
    /// Duplicate entities found for a key that must be unique
    DataCorruption,
    /// A referenced entity does not exist in the repository
    NotFound,
    /// Network or remote repository failure
    Transport,
    /// Bug or misconfiguration on our side
    Internal,
}

impl ErrorClass {
    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transport)
    }

    /// Whether the failure stops the current record but leaves the batch running
    pub fn halts_record(&self) -> bool {
        matches!(
            self,
            ErrorClass::InvalidInput | ErrorClass::DataCorruption | ErrorClass::NotFound
        )
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

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("No grant matches award number {award_number}")]
    GrantNotFound { award_number: String },

    // Integrity errors
    #[error(
        "Data corruption: {count} {resource_type} entities match {key}; \
         check the data and try again"
    )]
    DataCorruption {
        resource_type: String,
        key: String,
        count: usize,
    },

    // Remote repository errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Repository gateway error ({status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("Index did not expose {id} after {attempts} attempts")]
    IndexTimeout { id: String, attempts: u32 },

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
    /// Shorthand for an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        AppError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::GrantNotFound { .. } => ErrorCode::GrantNotFound,
            AppError::DataCorruption { .. } => ErrorCode::DataCorruption,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Gateway { .. } => ErrorCode::GatewayError,
            AppError::IndexTimeout { .. } => ErrorCode::IndexTimeout,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the error family for this error
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidArgument { .. } => ErrorClass::InvalidInput,

            AppError::NotFound { .. } | AppError::GrantNotFound { .. } => ErrorClass::NotFound,

            AppError::DataCorruption { .. } => ErrorClass::DataCorruption,

            AppError::HttpClient(_)
            | AppError::Gateway { .. }
            | AppError::IndexTimeout { .. } => ErrorClass::Transport,

            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => ErrorClass::Internal,
        }
    }

    /// Check if another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
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

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}
