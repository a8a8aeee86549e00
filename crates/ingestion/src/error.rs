//! Error types for the ingestion crate.

use thiserror::Error;

/// Errors that can occur during an ingestion run.
///
/// Every variant raised before promotion leaves the published store
/// untouched; see [`IngestError::affects_published_data`].
#[derive(Error, Debug)]
pub enum IngestError {
    /// Source data for the cycle is not yet available upstream.
    #[error("Cycle {cycle} is not available upstream: {reason}")]
    CycleUnavailable { cycle: String, reason: String },

    /// A variable identifier outside the fixed catalog was requested.
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// Lead times missing, duplicated, unexpected or inconsistent for a variable.
    #[error("Incomplete variable {variable} (lead times {lead_times:?}): {reason}")]
    IncompleteVariable {
        variable: String,
        lead_times: Vec<u32>,
        reason: String,
    },

    /// I/O or encoding failure while writing a variable.
    #[error("Failed to write {variable}: {cause}")]
    WriteFailure { variable: String, cause: String },

    /// The staging store failed post-write validation.
    #[error("Publish aborted: {0}")]
    PublishAborted(String),

    /// Another promotion is in flight.
    #[error("Publish busy: {0}")]
    PublishBusy(String),

    /// Catalog derivation failed; the previous catalog remains.
    #[error("Catalog stale: {0}")]
    CatalogStale(String),

    /// The run was cancelled before promotion.
    #[error("Run cancelled before promotion")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Create an IncompleteVariable error.
    pub fn incomplete(
        variable: impl Into<String>,
        lead_times: Vec<u32>,
        reason: impl Into<String>,
    ) -> Self {
        Self::IncompleteVariable {
            variable: variable.into(),
            lead_times,
            reason: reason.into(),
        }
    }

    /// Create a WriteFailure error.
    pub fn write_failure(variable: impl Into<String>, cause: impl ToString) -> Self {
        Self::WriteFailure {
            variable: variable.into(),
            cause: cause.to_string(),
        }
    }

    /// True when retrying on the next trigger is expected to succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CycleUnavailable { .. } | Self::PublishBusy(_) | Self::Cancelled
        )
    }

    /// Whether the published store was changed by the failed run.
    ///
    /// Always false: failures before promotion discard staging data, and
    /// catalog failures happen after the store is already consistent.
    pub fn affects_published_data(&self) -> bool {
        false
    }

    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CycleUnavailable { .. } => "cycle_unavailable",
            Self::UnknownVariable(_) => "unknown_variable",
            Self::IncompleteVariable { .. } => "incomplete_variable",
            Self::WriteFailure { .. } => "write_failure",
            Self::PublishAborted(_) => "publish_aborted",
            Self::PublishBusy(_) => "publish_busy",
            Self::CatalogStale(_) => "catalog_stale",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
