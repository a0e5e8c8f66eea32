//! Column value indexes.

use std::collections::{BTreeMap, BTreeSet};

use super::record::Rid;

/// Maps column values to the RIDs of the rows holding them.
pub trait Index: Send + Sync {
    /// RIDs whose `column` equals `value`. Empty if the column is not indexed.
    fn locate(&self, column: usize, value: i64) -> Vec<Rid>;

    /// RIDs whose `column` lies in `[lo, hi]`.
    fn locate_range(&self, column: usize, lo: i64, hi: i64) -> Vec<Rid>;

    /// Ignored for columns without an index.
    fn add(&mut self, column: usize, value: i64, rid: Rid);

    fn remove(&mut self, column: usize, value: i64, rid: Rid);

    /// Starts an empty index on `column`. Returns false if one already exists.
    fn create_index(&mut self, column: usize) -> bool;

    fn drop_index(&mut self, column: usize) -> bool;

    fn is_indexed(&self, column: usize) -> bool;
}

/// Ordered-tree index, one map per indexed column.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    columns: Vec<Option<BTreeMap<i64, BTreeSet<Rid>>>>,
}

impl BTreeIndex {
    pub fn new(num_columns: usize) -> Self {
        Self {
            columns: (0..num_columns).map(|_| None).collect(),
        }
    }

    pub fn indexed_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(c, idx)| idx.as_ref().map(|_| c))
            .collect()
    }

    fn column(&self, column: usize) -> Option<&BTreeMap<i64, BTreeSet<Rid>>> {
        self.columns.get(column).and_then(Option::as_ref)
    }
}

impl Index for BTreeIndex {
    fn locate(&self, column: usize, value: i64) -> Vec<Rid> {
        self.column(column)
            .and_then(|map| map.get(&value))
            .map(|rids| rids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn locate_range(&self, column: usize, lo: i64, hi: i64) -> Vec<Rid> {
        if lo > hi {
            return Vec::new();
        }
        self.column(column)
            .map(|map| map.range(lo..=hi).flat_map(|(_, rids)| rids.iter().copied()).collect())
            .unwrap_or_default()
    }

    fn add(&mut self, column: usize, value: i64, rid: Rid) {
        if let Some(Some(map)) = self.columns.get_mut(column) {
            map.entry(value).or_default().insert(rid);
        }
    }

    fn remove(&mut self, column: usize, value: i64, rid: Rid) {
        if let Some(Some(map)) = self.columns.get_mut(column) {
            if let Some(rids) = map.get_mut(&value) {
                rids.remove(&rid);
                if rids.is_empty() {
                    map.remove(&value);
                }
            }
        }
    }

    fn create_index(&mut self, column: usize) -> bool {
        match self.columns.get_mut(column) {
            Some(slot) if slot.is_none() => {
                *slot = Some(BTreeMap::new());
                true
            }
            _ => false,
        }
    }

    fn drop_index(&mut self, column: usize) -> bool {
        self.columns
            .get_mut(column)
            .map(|slot| slot.take().is_some())
            .unwrap_or(false)
    }

    fn is_indexed(&self, column: usize) -> bool {
        self.column(column).is_some()
    }
}
