//! Typed error hierarchy for the installations sync.
//!
//! Three top-level enums cover the three collaborators:
//! - `SourceError`: spreadsheet fetch failures (isolated per sector)
//! - `StoreError`: document store failures
//! - `SyncError`: failures that abort a whole sync invocation

use thiserror::Error;

/// Errors from the tabular source (one sector's spreadsheet).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Permission denied reading spreadsheet {spreadsheet_id}")]
    PermissionDenied { spreadsheet_id: String },

    #[error("Spreadsheet {spreadsheet_id} or range {range} not found")]
    NotFound {
        spreadsheet_id: String,
        range: String,
    },

    #[error("Token exchange failed: {0}")]
    Auth(String),

    #[error("Sheets request failed: {0}")]
    Http(String),

    #[error("Unexpected Sheets response: {0}")]
    Decode(String),
}

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Batch of {ops} operations exceeds the store limit of {limit}")]
    BatchTooLarge { ops: usize, limit: usize },

    #[error("Installation {id} not found")]
    NotFound { id: String },

    #[error("Failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Errors that abort an entire sync invocation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Credential resolution failed: {0}")]
    Credential(String),

    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.into())
    }
}
