//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::PageKey;

/// Errors that can occur in the storage layer.
///
/// Disk faults never show up here: they are absorbed by the buffer pool and
/// logged. What remains is the fatal kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Buffer pool is full ({capacity} pages) and every page is pinned; cannot load {key}")]
    BufferPoolExhausted { capacity: usize, key: PageKey },

    #[error("Slot {slot} is outside the page (max: {max_slot})")]
    InvalidSlot { slot: usize, max_slot: usize },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
