//! Error taxonomy for the core operations

use std::time::Duration;
use thiserror::Error;

/// Errors raised by allocation, sampling and forecasting
#[derive(Debug, Error)]
pub enum EcoError {
    /// Caller supplied a value outside the operation's domain
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Prediction requested before any model was trained
    #[error("no trained model artifact found in {0}")]
    ArtifactMissing(String),

    /// Stored artifact is corrupt or its model and scaler disagree
    #[error("model artifact mismatch: {0}")]
    ArtifactMismatch(String),

    /// Dispatched task did not finish within its deadline
    #[error("task '{task}' timed out after {timeout:?}")]
    TransientTimeout { task: &'static str, timeout: Duration },

    /// Not enough history to train a model
    #[error("insufficient training data: {rows} hourly rows, need {required}")]
    InsufficientData { rows: usize, required: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EcoError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            EcoError::InvalidInput(_) => "invalid_input",
            EcoError::ArtifactMissing(_) => "artifact_missing",
            EcoError::ArtifactMismatch(_) => "artifact_mismatch",
            EcoError::TransientTimeout { .. } => "transient_timeout",
            EcoError::InsufficientData { .. } => "insufficient_data",
            EcoError::Io(_) => "io",
            EcoError::Serialization(_) => "serialization",
            EcoError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, EcoError>;
