//! Error types for the gratitude engine.

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error in the backing store
    #[error("I/O error: {0}")]
    Io(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The backend refused the write
    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

impl StorageError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum GratitudeError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("User {user} already bid on offering {offering}")]
    DuplicateBid { offering: String, user: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Attaching {child} under {parent} would create a cycle")]
    CycleDetected { parent: String, child: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl GratitudeError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    /// Whether this error indicates corrupt data or a failed backend rather
    /// than a recoverable, caller-facing condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DataIntegrity(_) | Self::Storage(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, GratitudeError>;
