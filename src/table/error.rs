//! Table operation errors.

use thiserror::Error;

use crate::concurrency::ResourceId;
use crate::storage::error::StorageError;

/// Why a table operation did not apply.
///
/// Everything except [`TableError::Storage`] is an ordinary failure that a
/// transaction answers by aborting; see [`TableError::is_fatal`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Expected {expected} values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Column {column} is null")]
    NullValue { column: usize },

    #[error("Key {0} already exists")]
    DuplicateKey(i64),

    #[error("Key {0} not found")]
    KeyNotFound(i64),

    #[error("Column {column} out of range (table has {num_columns})")]
    ColumnOutOfRange { column: usize, num_columns: usize },

    #[error("Lock conflict on {0}")]
    LockConflict(ResourceId),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TableError {
    /// Fatal errors point at a defect (e.g. an exhausted buffer pool) and
    /// must surface to the caller instead of triggering a retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TableError::Storage(_))
    }
}

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;
