//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout tsql-batch.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `UnsupportedParameterType`: Declared parameter type outside the supported set
//! - `InvalidParameter`: Parameter name or value that cannot be bound
//! - `ConnectionFailed`: Pool open failure (auth, network, TLS)
//! - `QueryFailed`: Statement failure, timeout expiry, or driver fault during a query
//! - `ReleaseFailed`: Failure while closing a pool (logged, never surfaced over another error)
//! - `InvalidInput`: Malformed work item or missing required field
//! - `ConfigError`: Credential store file or environment errors
//!
//! Everything except `ConfigError` is item-scoped: the batch runner decides whether it becomes
//! an error item or aborts the run.

use thiserror::Error;

use crate::output::OutputItem;

/// Main error type for tsql-batch operations
#[derive(Error, Debug)]
pub enum BatchError {
    /// Declared parameter type is not one of the supported names
    #[error("Unsupported SQL type: {type_name}")]
    UnsupportedParameterType { type_name: String, item_index: usize },

    /// Parameter name or value could not be bound
    #[error("Invalid parameter '{name}': {detail}")]
    InvalidParameter { name: String, detail: String },

    /// Opening the connection pool failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed (including timeouts)
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Closing the connection pool failed
    #[error("Release failed: {0}")]
    ReleaseFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, missing env var, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BatchError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedParameterType { .. } => "UNSUPPORTED_PARAMETER_TYPE",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::ReleaseFailed(_) => "RELEASE_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Human-readable message, safe for JSON output (never carries credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create an unsupported parameter type error
    pub fn unsupported_type(type_name: impl Into<String>, item_index: usize) -> Self {
        Self::UnsupportedParameterType { type_name: type_name.into(), item_index }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidParameter { name: name.into(), detail: detail.into() }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create a release failed error
    pub fn release_failed(message: impl Into<String>) -> Self {
        Self::ReleaseFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for tsql-batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// A batch stopped at `item_index` because continue-on-failure was off.
///
/// `completed` holds every output item emitted before the failing item.
#[derive(Error, Debug)]
#[error("Error: {error} (item {item_index})")]
pub struct BatchAborted {
    pub item_index: usize,
    #[source]
    pub error: BatchError,
    pub completed: Vec<OutputItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BatchError::unsupported_type("Money", 0).error_code(), "UNSUPPORTED_PARAMETER_TYPE");
        assert_eq!(BatchError::invalid_parameter("id", "x").error_code(), "INVALID_PARAMETER");
        assert_eq!(BatchError::connection_failed("test").error_code(), "CONNECTION_FAILED");
        assert_eq!(BatchError::query_failed("test").error_code(), "QUERY_FAILED");
        assert_eq!(BatchError::release_failed("test").error_code(), "RELEASE_FAILED");
        assert_eq!(BatchError::invalid_input("test").error_code(), "INVALID_INPUT");
        assert_eq!(BatchError::config_error("test").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_unsupported_type_message_names_type() {
        let err = BatchError::unsupported_type("Money", 3);
        assert_eq!(err.message(), "Unsupported SQL type: Money");
        assert!(matches!(err, BatchError::UnsupportedParameterType { item_index: 3, .. }));
    }

    #[test]
    fn test_aborted_display_carries_index_and_driver_message() {
        let aborted = BatchAborted {
            item_index: 2,
            error: BatchError::connection_failed("Login failed for user 'sa'."),
            completed: Vec::new(),
        };
        let text = aborted.to_string();
        assert!(text.contains("Login failed for user 'sa'."));
        assert!(text.contains("item 2"));
    }
}
