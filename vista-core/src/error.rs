//! Error types for Vista operations

use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Vista operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VistaError {
    /// Cache backend or data source could not be reached, or timed out.
    #[error("Backend unavailable ({target}): {reason}")]
    BackendUnavailable { target: String, reason: String },

    /// The secondary data source is lagging or failed its probe.
    #[error("Replica unhealthy: {reason}")]
    ReplicaUnhealthy { reason: String },

    /// A key component or pattern could not be parsed or was rejected.
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidKeyPattern { pattern: String, reason: String },

    /// A cached value could not be encoded or decoded.
    #[error("Serialization failure for {context}: {reason}")]
    SerializationFailure { context: String, reason: String },

    /// A domain recompute callback failed.
    #[error("Recompute failed for {key}: {reason}")]
    RecomputeFailure { key: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl VistaError {
    pub fn backend(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// A call that did not finish within its deadline.
    pub fn timeout(target: impl Into<String>, operation: &str, after: Duration) -> Self {
        Self::BackendUnavailable {
            target: target.into(),
            reason: format!("{} timed out after {}ms", operation, after.as_millis()),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKeyPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SerializationFailure {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn recompute(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::RecomputeFailure {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Result type for Vista operations.
pub type VistaResult<T> = Result<T, VistaError>;
