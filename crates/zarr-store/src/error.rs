//! Error types for store writing and reading.

use thiserror::Error;

/// Errors that can occur while writing or reading a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to create the store (location exists, directory not creatable).
    #[error("failed to create store: {0}")]
    CreateFailed(String),

    /// Failed to open an existing store.
    #[error("failed to open store: {0}")]
    OpenFailed(String),

    /// Writing an array failed.
    #[error("failed to write array '{array}': {cause}")]
    WriteFailed { array: String, cause: String },

    /// Reading an array failed.
    #[error("failed to read array '{array}': {cause}")]
    ReadFailed { array: String, cause: String },

    /// The schema does not declare the requested array.
    #[error("array '{0}' is not declared in the schema")]
    UndeclaredArray(String),

    /// Data does not match the declared shape or type.
    #[error("shape mismatch for '{array}': expected {expected} elements, got {actual}")]
    ShapeMismatch {
        array: String,
        expected: usize,
        actual: usize,
    },

    /// Invalid metadata in the store.
    #[error("invalid store metadata: {0}")]
    InvalidMetadata(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    StorageError(String),
}

impl StoreError {
    /// Create a WriteFailed error.
    pub fn write_failed(array: impl Into<String>, cause: impl ToString) -> Self {
        Self::WriteFailed {
            array: array.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a ReadFailed error.
    pub fn read_failed(array: impl Into<String>, cause: impl ToString) -> Self {
        Self::ReadFailed {
            array: array.into(),
            cause: cause.to_string(),
        }
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
