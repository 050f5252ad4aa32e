//! Error types for the reclaim state store.

use std::fmt;

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// The redb operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Open,
    Transaction,
    Table,
    Read,
    Write,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            StorageOp::Open => "open",
            StorageOp::Transaction => "transaction",
            StorageOp::Table => "table",
            StorageOp::Read => "read",
            StorageOp::Write => "write",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage {op} failed: {message}")]
    Storage { op: StorageOp, message: String },

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("stored record is unreadable: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The write would move a claim backwards (reset a monotonic
    /// condition or change its provider id).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl StateError {
    /// Storage failures may clear on their own; the rest are about the
    /// data itself.
    pub fn is_storage(&self) -> bool {
        matches!(self, StateError::Storage { .. })
    }
}
