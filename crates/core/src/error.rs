//! Store error model.

use thiserror::Error;

/// Result type used across store and registry boundaries.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error surfaced to synchronous callers of a store, guard or registry.
///
/// Row-level transform failures are deliberately absent: they are counted by
/// the row job runner and never propagate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The row, column or task does not exist.
    #[error("not found")]
    NotFound,

    /// The caller lacks a prefix grant or owns a different task.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A set-if-absent lock was already held.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backing service is unreachable or the request was malformed
    /// (bad filter, bad column name).
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn malformed(what: &str, detail: impl core::fmt::Display) -> Self {
        Self::Backend(format!("malformed {what}: {detail}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}
