use super::record::Rid;

/// What a successful mutation needs to be reversed. Produced by every table
/// mutation and replayed newest-first when a transaction aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo {
    /// Nothing changed (e.g. an update with no effective changes).
    Noop,
    Insert {
        rid: Rid,
        key: i64,
    },
    Update {
        base_rid: Rid,
        tail_rid: Rid,
        prev_indirection: Rid,
        prev_schema: u64,
        /// `(column, old, new)` for every column the tail record changed.
        changes: Vec<(usize, i64, i64)>,
    },
    Delete {
        rid: Rid,
        key: i64,
    },
}

impl Undo {
    pub fn is_noop(&self) -> bool {
        matches!(self, Undo::Noop)
    }
}
