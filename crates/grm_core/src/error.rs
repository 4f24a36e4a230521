//! Error types for the grievance routing core.
//!
//! Lookup failures are fatal to the single operation in progress.
//! No-candidate outcomes (nobody eligible for assignment/escalation)
//! are ordinary values, never errors. Revision conflicts are retryable.
//! A cyclic region graph is a configuration error and is surfaced
//! distinctly from a missing region.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrmError {
    #[error("administrative region not found: {0}")]
    RegionNotFound(String),

    #[error("issue category not found: {0}")]
    CategoryNotFound(u64),

    #[error("department not found: {0}")]
    DepartmentNotFound(u64),

    #[error("worker not found: {0}")]
    WorkerNotFound(u64),

    #[error("issue not found: {0}")]
    IssueNotFound(String),

    #[error("region graph exceeds depth ceiling walking up from {start} (cycle suspected)")]
    CyclicRegionGraph { start: String },

    #[error("revision conflict updating document {id}")]
    RevisionConflict { id: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("notification delivery failed via {channel}: {reason}")]
    NotificationFailed { channel: String, reason: String },
}

impl GrmError {
    /// Whether a bounded retry of the failed operation is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GrmError::RevisionConflict { .. })
    }
}

impl From<rusqlite::Error> for GrmError {
    fn from(e: rusqlite::Error) -> Self {
        GrmError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for GrmError {
    fn from(e: serde_json::Error) -> Self {
        GrmError::Store(format!("document (de)serialization: {e}"))
    }
}
