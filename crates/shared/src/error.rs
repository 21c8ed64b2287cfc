//! Failure taxonomy
//!
//! Every remote read/write, identity call and change-feed operation reports
//! failures as a classified [`SyncError`] value. Callers branch on
//! [`SyncError::kind`]: `MissingRow` feeds the self-healing path, the rest
//! propagate to the caller.

use serde::{Deserialize, Serialize};

use crate::collection::Collection;

/// Classified failure of a sync-layer operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SyncError {
    /// Network or timeout failure; the same call may be retried
    #[error("transport failure: {0}")]
    TransientTransport(String),

    /// No active session; the caller must sign in again
    #[error("not authenticated")]
    NotAuthenticated,

    /// An expected row is absent
    #[error("missing {collection} row {key}")]
    MissingRow { collection: Collection, key: String },

    /// Duplicate create against a unique column
    #[error("{collection} already exists: {detail}")]
    UniqueConflict { collection: Collection, detail: String },

    /// Malformed payload or disallowed transition
    #[error("rejected: {0}")]
    ValidationRejected(String),

    #[error("unexpected failure: {0}")]
    Unclassified(String),
}

/// Discriminant of [`SyncError`] for pattern matching without payloads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    TransientTransport,
    NotAuthenticated,
    MissingRow,
    UniqueConflict,
    ValidationRejected,
    Unclassified,
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::TransientTransport(_) => FailureKind::TransientTransport,
            SyncError::NotAuthenticated => FailureKind::NotAuthenticated,
            SyncError::MissingRow { .. } => FailureKind::MissingRow,
            SyncError::UniqueConflict { .. } => FailureKind::UniqueConflict,
            SyncError::ValidationRejected(_) => FailureKind::ValidationRejected,
            SyncError::Unclassified(_) => FailureKind::Unclassified,
        }
    }

    /// Only transport failures are safe to retry verbatim
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientTransport(_))
    }

    pub fn missing(collection: Collection, key: impl Into<String>) -> Self {
        SyncError::MissingRow {
            collection,
            key: key.into(),
        }
    }

    pub fn conflict(collection: Collection, detail: impl Into<String>) -> Self {
        SyncError::UniqueConflict {
            collection,
            detail: detail.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        SyncError::ValidationRejected(reason.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Unclassified(format!("serialization: {}", e))
    }
}
