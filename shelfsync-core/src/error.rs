//! Error types for the sync engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to create database directory '{0}': {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Failed to encode or decode stored fields: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Invalid {entity_type} fields: {message}")]
    Invalid {
        entity_type: &'static str,
        message: String,
    },
}

/// Errors returned by an entity adapter call.
///
/// The orchestrator records every variant against the record it was
/// processing and retries on the next cycle; the split only matters for
/// logging and for callers that inspect stored errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Network failure, timeout or 5xx
    #[error("Transient server error: {0}")]
    Transient(String),

    /// 4xx or validation failure
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body could not be understood
    #[error("Malformed server response: {0}")]
    Decode(String),

    /// Adapter cannot make calls at all (bad URL, missing credentials)
    #[error("Adapter misconfigured: {0}")]
    Misconfigured(String),
}

impl AdapterError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_) | AdapterError::Decode(_))
    }
}

/// Errors that abort a whole sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Local store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Sync setup failed: {0}")]
    Setup(String),
}

/// Errors from connectivity helpers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network did not become available within {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::Rejected {
            status: 422,
            message: "name is required".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Server rejected request (422): name is required"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AdapterError::Transient("timeout".into()).is_transient());
        assert!(AdapterError::Decode("bad json".into()).is_transient());
        assert!(!AdapterError::Rejected {
            status: 400,
            message: String::new()
        }
        .is_transient());
    }

    #[test]
    fn test_store_error_converts_into_sync_error() {
        let err: SyncError = StoreError::NotFound("a1".into()).into();
        assert!(err.to_string().contains("Record not found: a1"));
    }
}
