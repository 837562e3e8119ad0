use serde::Serialize;
use thiserror::Error;

use crate::domain::model::ModelTier;

/// Domain-level errors for Murmur.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("Network request blocked: {reason}")]
    NetworkBlocked { reason: String },

    #[error("Model storage at {path} is not writable: {reason}")]
    StorageUnwritable { path: String, reason: String },

    #[error("Model download failed: {0}")]
    DownloadFailed(String),

    #[error("Failed to construct inference engine: {0}")]
    EngineConstruction(String),

    #[error("Operation for model {tier} was cancelled")]
    Cancelled { tier: ModelTier },

    #[error("No model switch in progress")]
    NoSwitchInProgress,

    #[error("No model download in progress")]
    NoDownloadInProgress,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model verification failed: expected {expected}, got {actual}")]
    ModelVerification { expected: String, actual: String },

    #[error("Preference store error: {0}")]
    Preferences(String),

    #[error("Model manager is no longer running")]
    ManagerUnavailable,
}

impl DomainError {
    /// Whether this error came from a cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DomainError::Cancelled { .. })
    }
}

/// Failure reported by the inference engine while transcribing.
///
/// Inference failures never affect the model status; the same audio can
/// be submitted again.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum EngineError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Failed to prepare inference state: {0}")]
    State(String),

    #[error("Inference task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
