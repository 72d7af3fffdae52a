//! # Error Types
//!
//! Crate-wide error type for the AS4 core. Signaled step failures are *not*
//! errors (they travel inside a failed `StepResult`) and retry exhaustion is a
//! plain status update; everything in here is an exceptional condition.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum As4Error {
    #[error("Transformation error: {0}")]
    Transformation(String),
    #[error("Step '{step}' failed: {reason}")]
    StepExecution { step: String, reason: String },
    #[error("Unknown step identifier: {0}")]
    UnknownStep(String),
    #[error("PMode not found: {0}")]
    PModeNotFound(String),
    #[error("Invalid PMode '{pmode_id}': {reason}")]
    InvalidPMode { pmode_id: String, reason: String },
    #[error("Persistence error: {operation}: {reason}")]
    Persistence { operation: String, reason: String },
    #[error("Record not found: {entity} '{id}'")]
    RecordNotFound { entity: String, id: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Security error: {0}")]
    Security(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
    #[error("Invalid retry interval '{0}'")]
    InvalidRetryInterval(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl As4Error {
    /// Create a step execution error
    pub fn step_execution(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a record not found error
    pub fn record_not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create an invalid PMode error
    pub fn invalid_pmode(pmode_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPMode {
            pmode_id: pmode_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for As4Error {
    fn from(error: serde_json::Error) -> Self {
        As4Error::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<serde_yaml::Error> for As4Error {
    fn from(error: serde_yaml::Error) -> Self {
        As4Error::Serialization(format!("YAML serialization error: {error}"))
    }
}

impl From<crate::config::ConfigurationError> for As4Error {
    fn from(error: crate::config::ConfigurationError) -> Self {
        As4Error::Configuration(error.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for As4Error {
    fn from(error: sqlx::Error) -> Self {
        As4Error::persistence("database", error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, As4Error>;
