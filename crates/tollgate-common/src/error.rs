//! Error types for the tollgate pipeline
//!
//! Provides a unified error type and domain-specific error variants. No-data
//! outcomes and fatal failures are distinct variants so callers have to match
//! on them explicitly instead of treating one as the other.

use thiserror::Error;

/// Result type alias using TollgateError
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Unified error type for tollgate operations
#[derive(Debug, Error)]
pub enum TollgateError {
    // Collection errors
    #[error("collect error: {0}")]
    Collect(#[from] CollectError),

    // Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    // Coordination errors
    #[error("coordination error: {0}")]
    Coordination(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Collection-layer errors
///
/// `NoData` is the expected, recoverable outcome; everything else is a real
/// failure the worker downgrades at its boundary.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("collector '{collector}' returned no data for resource '{resource}'")]
    NoData { collector: String, resource: String },

    #[error("no handler in collector '{collector}' for resource '{resource}'")]
    UnsupportedResource { collector: String, resource: String },

    #[error("transformer '{transformer}' not found, but required by '{collector}'")]
    MissingTransformer {
        collector: String,
        transformer: String,
    },

    #[error("unknown collector backend '{0}'")]
    UnknownBackend(String),

    #[error("collector backend failure: {0}")]
    Backend(String),
}

impl CollectError {
    /// Shorthand for the recoverable no-data outcome
    pub fn no_data(collector: impl Into<String>, resource: impl Into<String>) -> Self {
        CollectError::NoData {
            collector: collector.into(),
            resource: resource.into(),
        }
    }

    /// True for the recoverable no-data outcome
    pub fn is_no_data(&self) -> bool {
        matches!(self, CollectError::NoData { .. })
    }
}

/// Storage-layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Zero rows matched a time-frame query. Reporting callers render this
    /// as an empty result, never as a failure.
    #[error("no time frame available")]
    NoTimeFrame,

    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),

    #[error("invoice '{0}' not found")]
    InvoiceNotFound(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for TollgateError {
    fn from(err: serde_json::Error) -> Self {
        TollgateError::Storage(StorageError::from(err))
    }
}
