//! Record identifiers, physical placement and the user-facing record type.

use serde::{Deserialize, Serialize};

use crate::config::{PAGES_PER_RANGE, RECORDS_PER_PAGE};
use crate::storage::page::Segment;

/// Record identifier.
pub type Rid = u64;

/// First base RID; base RIDs grow upward from here.
pub const BASE_RID_START: Rid = 1;

/// First tail RID. Base RIDs never reach this value, so a RID's magnitude
/// alone tells base from tail.
pub const TAIL_RID_START: Rid = 1_000_000_000;

/// Indirection value meaning "no further record".
pub const NULL_RID: Rid = 0;

pub const INDIRECTION_COLUMN: usize = 0;
pub const RID_COLUMN: usize = 1;
pub const TIMESTAMP_COLUMN: usize = 2;
pub const SCHEMA_ENCODING_COLUMN: usize = 3;
/// Metadata columns stored ahead of the user columns in every record.
pub const META_COLUMNS: usize = 4;

pub fn is_tail_rid(rid: Rid) -> bool {
    rid >= TAIL_RID_START
}

/// Where a record lives: a slot shared by every column page of one segment
/// page of a page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordLocation {
    pub segment: Segment,
    pub range_id: u32,
    pub page_idx: u32,
    pub slot: u32,
}

impl RecordLocation {
    /// Placement is a pure function of the RID.
    pub fn for_rid(rid: Rid) -> Self {
        let (segment, ordinal) = if is_tail_rid(rid) {
            (Segment::Tail, rid - TAIL_RID_START)
        } else {
            (Segment::Base, rid - BASE_RID_START)
        };
        let per_range = (RECORDS_PER_PAGE * PAGES_PER_RANGE) as u64;
        Self {
            segment,
            range_id: (ordinal / per_range) as u32,
            page_idx: ((ordinal / RECORDS_PER_PAGE as u64) % PAGES_PER_RANGE as u64) as u32,
            slot: (ordinal % RECORDS_PER_PAGE as u64) as u32,
        }
    }
}

/// A row as returned by select: unprojected columns are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rid: Rid,
    pub key: i64,
    pub columns: Vec<Option<i64>>,
}

impl Record {
    pub fn new(rid: Rid, key: i64, columns: Vec<Option<i64>>) -> Self {
        Self { rid, key, columns }
    }
}

/// Iterates the column positions set in a schema mask.
pub(crate) fn mask_columns(mask: u64, num_columns: usize) -> impl Iterator<Item = usize> {
    (0..num_columns).filter(move |c| mask & (1u64 << c) != 0)
}
