//! Error types for the status update relay.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Status update is missing its status UUID")]
    MissingStatusUuid,

    #[error("Mismatched checkpoint flag (expected checkpoint={expected}, got checkpoint={got})")]
    CheckpointMismatch { expected: bool, got: bool },

    #[error("Mismatched framework id (expected {expected}, got {got})")]
    FrameworkMismatch { expected: String, got: String },

    #[error("Unknown status update stream: {0}")]
    UnknownStream(String),

    #[error("Duplicate status update acknowledgement (UUID: {0})")]
    DuplicateAcknowledgement(Uuid),

    #[error("Unexpected status update acknowledgement (UUID: {0})")]
    UnexpectedAcknowledgement(Uuid),

    #[error("Checkpoint file already exists: {}", .0.display())]
    CheckpointExists(PathBuf),

    #[error("Stream failed: {0}")]
    StreamFailed(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Relay terminated")]
    Terminated,
}

impl From<rmp_serde::encode::Error> for RelayError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RelayError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RelayError::Deserialization(e.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
