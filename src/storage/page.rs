//! Fixed-size column pages and the keys that name them.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{PAGE_SIZE, RECORDS_PER_PAGE, VALUE_SIZE};
use crate::storage::error::{StorageError, StorageResult};

/// Which half of a page range a page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Segment {
    Base,
    Tail,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Base => "base",
            Segment::Tail => "tail",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one page: a single column's slice of one segment of a page
/// range of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub table: Arc<str>,
    pub range_id: u32,
    pub segment: Segment,
    pub page_idx: u32,
    pub column: u32,
}

impl PageKey {
    pub fn new(
        table: impl Into<Arc<str>>,
        range_id: u32,
        segment: Segment,
        page_idx: u32,
        column: u32,
    ) -> Self {
        Self {
            table: table.into(),
            range_id,
            segment,
            page_idx,
            column,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/range_{}/{}/page_{}_col_{}",
            self.table, self.range_id, self.segment, self.page_idx, self.column
        )
    }
}

/// A raw 4 KiB page of little-endian `i64` slots. Carries no version
/// semantics of its own.
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Builds a page from raw bytes. Short input is zero-padded and long
    /// input truncated.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut page = Self::new();
        let len = bytes.len().min(PAGE_SIZE);
        page.data[..len].copy_from_slice(&bytes[..len]);
        page
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn read_value(&self, slot: usize) -> StorageResult<i64> {
        let offset = Self::offset(slot)?;
        Ok(LittleEndian::read_i64(&self.data[offset..offset + VALUE_SIZE]))
    }

    pub fn write_value(&mut self, slot: usize, value: i64) -> StorageResult<()> {
        let offset = Self::offset(slot)?;
        LittleEndian::write_i64(&mut self.data[offset..offset + VALUE_SIZE], value);
        Ok(())
    }

    fn offset(slot: usize) -> StorageResult<usize> {
        if slot >= RECORDS_PER_PAGE {
            return Err(StorageError::InvalidSlot {
                slot,
                max_slot: RECORDS_PER_PAGE - 1,
            });
        }
        Ok(slot * VALUE_SIZE)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.data.iter().filter(|b| **b != 0).count();
        f.debug_struct("Page").field("non_zero_bytes", &used).finish()
    }
}
