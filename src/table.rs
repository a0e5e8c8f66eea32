//! Versioned column table.
//!
//! Rows are stored as an immutable base record plus a chain of append-only
//! tail records, one page per column per segment. The base record's
//! indirection column points at the newest tail record; each tail points at
//! the one before it, ending at [`NULL_RID`]. Reading a row folds the chain
//! oldest to newest over the base values.
//!
//! Every operation takes the calling transaction's id and acquires record
//! locks through the shared [`LockManager`] before touching a row. Mutations
//! return an [`Undo`] token so an aborting transaction can reverse them.

pub mod error;
pub mod index;
pub mod record;
pub mod undo;

pub use error::{TableError, TableResult};
pub use index::{BTreeIndex, Index};
pub use record::{
    is_tail_rid, Record, RecordLocation, Rid, BASE_RID_START, INDIRECTION_COLUMN, META_COLUMNS,
    NULL_RID, RID_COLUMN, SCHEMA_ENCODING_COLUMN, TAIL_RID_START, TIMESTAMP_COLUMN,
};
pub use undo::Undo;

use crate::catalog::TableSnapshot;
use crate::concurrency::{LockManager, ResourceId};
use crate::storage::{BufferPool, PageKey};
use crate::transaction::TransactionId;
use log::{debug, warn};
use parking_lot::RwLock;
use record::mask_columns;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bookkeeping that lives outside the pages.
struct TableState {
    next_base_rid: Rid,
    next_tail_rid: Rid,
    /// Every allocated RID that still names a record.
    page_directory: HashMap<Rid, RecordLocation>,
    /// Primary key -> live base RID.
    key_index: BTreeMap<i64, Rid>,
    tombstones: HashMap<Rid, bool>,
    /// Key -> base RID of the last deleted row that held it.
    retired_keys: HashMap<i64, Rid>,
    index: BTreeIndex,
}

impl TableState {
    fn is_deleted(&self, rid: Rid) -> bool {
        self.tombstones.get(&rid).copied().unwrap_or(false)
    }

    fn is_live(&self, key: i64, rid: Rid) -> bool {
        self.key_index.get(&key) == Some(&rid) && !self.is_deleted(rid)
    }
}

pub struct Table {
    name: Arc<str>,
    num_columns: usize,
    key_column: usize,
    pool: BufferPool,
    lock_manager: Arc<LockManager>,
    state: RwLock<TableState>,
}

impl Table {
    /// Creates an empty table. `key_column` must be below `num_columns`.
    pub fn new(
        name: &str,
        num_columns: usize,
        key_column: usize,
        pool: BufferPool,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        debug_assert!(key_column < num_columns);
        let mut index = BTreeIndex::new(num_columns);
        index.create_index(key_column);

        Self {
            name: Arc::from(name),
            num_columns,
            key_column,
            pool,
            lock_manager,
            state: RwLock::new(TableState {
                next_base_rid: BASE_RID_START,
                next_tail_rid: TAIL_RID_START,
                page_directory: HashMap::new(),
                key_index: BTreeMap::new(),
                tombstones: HashMap::new(),
                retired_keys: HashMap::new(),
                index,
            }),
        }
    }

    /// Rebuilds a table from its catalog entry. Column data is read lazily
    /// from the page files, except for secondary indexes which are rebuilt
    /// here.
    pub fn from_snapshot(
        snapshot: TableSnapshot,
        pool: BufferPool,
        lock_manager: Arc<LockManager>,
    ) -> TableResult<Self> {
        let table = Self::new(
            &snapshot.name,
            snapshot.num_columns,
            snapshot.key_column,
            pool,
            lock_manager,
        );
        {
            let mut state = table.state.write();
            state.next_base_rid = snapshot.next_base_rid;
            state.next_tail_rid = snapshot.next_tail_rid;
            state.page_directory = snapshot.page_directory;
            state.key_index = snapshot.key_index;
            state.tombstones = snapshot.tombstones;
            state.retired_keys = snapshot.retired_keys;
            let rids: Vec<(i64, Rid)> = state.key_index.iter().map(|(k, r)| (*k, *r)).collect();
            for (key, rid) in rids {
                state.index.add(table.key_column, key, rid);
            }
        }
        for column in snapshot.indexed_columns {
            table.create_index(column)?;
        }
        Ok(table)
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let state = self.state.read();
        TableSnapshot {
            name: self.name.to_string(),
            num_columns: self.num_columns,
            key_column: self.key_column,
            next_base_rid: state.next_base_rid,
            next_tail_rid: state.next_tail_rid,
            page_directory: state.page_directory.clone(),
            key_index: state.key_index.clone(),
            tombstones: state.tombstones.clone(),
            retired_keys: state.retired_keys.clone(),
            indexed_columns: state
                .index
                .indexed_columns()
                .into_iter()
                .filter(|c| *c != self.key_column)
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Number of live (inserted, not deleted) rows.
    pub fn len(&self) -> usize {
        self.state.read().key_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resource(&self, rid: Rid) -> ResourceId {
        ResourceId::new(Arc::clone(&self.name), rid)
    }

    /// Base RID currently registered for `key`.
    pub fn rid_for_key(&self, key: i64) -> Option<Rid> {
        self.state.read().key_index.get(&key).copied()
    }

    /// Inserts a full row. Every value must be present and the key unused.
    pub fn insert(&self, txn: TransactionId, values: &[Option<i64>]) -> TableResult<Undo> {
        self.check_arity(values.len())?;
        let values = values
            .iter()
            .enumerate()
            .map(|(column, v)| v.ok_or(TableError::NullValue { column }))
            .collect::<TableResult<Vec<i64>>>()?;
        let key = values[self.key_column];

        let rid = {
            let mut state = self.state.write();
            if state.key_index.contains_key(&key) {
                return Err(TableError::DuplicateKey(key));
            }
            // The deleter of a previous holder of this key may still abort.
            if let Some(&retired) = state.retired_keys.get(&key) {
                self.lock_exclusive(txn, retired)?;
            }

            let rid = state.next_base_rid;
            self.lock_exclusive(txn, rid)?;
            state.next_base_rid += 1;
            state.page_directory.insert(rid, RecordLocation::for_rid(rid));
            state.key_index.insert(key, rid);
            state.tombstones.insert(rid, false);
            for (column, value) in values.iter().enumerate() {
                state.index.add(column, *value, rid);
            }
            rid
        };

        if let Err(e) = self.write_record(rid, NULL_RID, 0, &values) {
            self.unregister(rid, key, &values);
            return Err(e);
        }
        debug!("{} inserted {} key {} as rid {}", txn, self.name, key, rid);
        Ok(Undo::Insert { rid, key })
    }

    /// Current row for `key`, projected. Only the primary key column can be
    /// searched; any other `key_column` yields no records.
    pub fn select(
        &self,
        txn: TransactionId,
        key: i64,
        key_column: usize,
        projection: &[bool],
    ) -> TableResult<Vec<Record>> {
        self.select_version(txn, key, key_column, projection, 0)
    }

    /// Versioned select. `0` (and any positive value) is the current row,
    /// `-1` the base record alone, and `-k` for `k >= 2` the row with the
    /// newest `k - 1` updates left out.
    pub fn select_version(
        &self,
        txn: TransactionId,
        key: i64,
        key_column: usize,
        projection: &[bool],
        relative_version: i64,
    ) -> TableResult<Vec<Record>> {
        if key_column != self.key_column {
            return Ok(Vec::new());
        }
        let Some(rid) = self.rid_for_key(key) else {
            return Ok(Vec::new());
        };
        self.lock_shared(txn, rid)?;
        if !self.state.read().is_live(key, rid) {
            return Ok(Vec::new());
        }

        let values = self.version_values(rid, relative_version)?;
        let columns = values
            .into_iter()
            .enumerate()
            .map(|(c, v)| projection.get(c).copied().unwrap_or(false).then_some(v))
            .collect();
        Ok(vec![Record::new(rid, key, columns)])
    }

    /// Appends a tail record with the columns of `values` that differ from
    /// the current row. `None` leaves a column unchanged.
    pub fn update(&self, txn: TransactionId, key: i64, values: &[Option<i64>]) -> TableResult<Undo> {
        self.check_arity(values.len())?;
        let rid = self.lock_live_row(txn, key)?;

        let current = self.version_values(rid, 0)?;
        let mut mask = 0u64;
        let mut tail_values = vec![0i64; self.num_columns];
        let mut changes = Vec::new();
        for (column, value) in values.iter().enumerate() {
            if let Some(new) = *value {
                if new != current[column] {
                    mask |= 1 << column;
                    tail_values[column] = new;
                    changes.push((column, current[column], new));
                }
            }
        }
        if mask == 0 {
            return Ok(Undo::Noop);
        }

        let prev_indirection = self.read_field(rid, INDIRECTION_COLUMN)? as Rid;
        let prev_schema = self.read_field(rid, SCHEMA_ENCODING_COLUMN)? as u64;

        let tail_rid = {
            let mut state = self.state.write();
            let new_key = (mask & (1 << self.key_column) != 0).then(|| tail_values[self.key_column]);
            if let Some(new_key) = new_key {
                if state.key_index.contains_key(&new_key) {
                    return Err(TableError::DuplicateKey(new_key));
                }
                if let Some(&retired) = state.retired_keys.get(&new_key) {
                    self.lock_exclusive(txn, retired)?;
                }
                state.key_index.remove(&key);
                state.key_index.insert(new_key, rid);
            }

            let tail_rid = state.next_tail_rid;
            state.next_tail_rid += 1;
            state
                .page_directory
                .insert(tail_rid, RecordLocation::for_rid(tail_rid));
            for &(column, old, new) in &changes {
                state.index.remove(column, old, rid);
                state.index.add(column, new, rid);
            }
            tail_rid
        };

        let undo = Undo::Update {
            base_rid: rid,
            tail_rid,
            prev_indirection,
            prev_schema,
            changes,
        };
        let linked = self
            .write_record(tail_rid, prev_indirection, mask, &tail_values)
            .and_then(|_| self.write_field(rid, INDIRECTION_COLUMN, tail_rid as i64))
            .and_then(|_| self.write_field(rid, SCHEMA_ENCODING_COLUMN, (prev_schema | mask) as i64));
        if let Err(e) = linked {
            if let Err(revert_err) = self.revert(&undo) {
                warn!("{} could not roll back update of rid {}: {}", txn, rid, revert_err);
            }
            return Err(e);
        }
        debug!("{} updated {} rid {} with tail {}", txn, self.name, rid, tail_rid);
        Ok(undo)
    }

    /// Tombstones the row for `key` and drops the key from the index. The
    /// base and tail records stay on their pages.
    pub fn delete(&self, txn: TransactionId, key: i64) -> TableResult<Undo> {
        let rid = self.lock_live_row(txn, key)?;
        let values = self.version_values(rid, 0)?;

        let mut state = self.state.write();
        state.tombstones.insert(rid, true);
        state.key_index.remove(&key);
        state.retired_keys.insert(key, rid);
        for (column, value) in values.iter().enumerate() {
            state.index.remove(column, *value, rid);
        }
        debug!("{} deleted {} key {} (rid {})", txn, self.name, key, rid);
        Ok(Undo::Delete { rid, key })
    }

    /// Adds one to a single column of the row for `key`.
    pub fn increment(&self, txn: TransactionId, key: i64, column: usize) -> TableResult<Undo> {
        self.check_column(column)?;
        let rid = self.lock_live_row(txn, key)?;
        let current = self.version_values(rid, 0)?[column];

        let mut values = vec![None; self.num_columns];
        values[column] = Some(current.wrapping_add(1));
        self.update(txn, key, &values)
    }

    /// Sum of the current value of `column` over live keys in `[lo, hi]`.
    pub fn sum(&self, txn: TransactionId, lo: i64, hi: i64, column: usize) -> TableResult<i64> {
        self.sum_version(txn, lo, hi, column, 0)
    }

    pub fn sum_version(
        &self,
        txn: TransactionId,
        lo: i64,
        hi: i64,
        column: usize,
        relative_version: i64,
    ) -> TableResult<i64> {
        self.check_column(column)?;
        if lo > hi {
            return Ok(0);
        }
        let candidates: Vec<(i64, Rid)> = self
            .state
            .read()
            .key_index
            .range(lo..=hi)
            .map(|(k, r)| (*k, *r))
            .collect();

        let mut total = 0i64;
        for (key, rid) in candidates {
            self.lock_shared(txn, rid)?;
            if !self.state.read().is_live(key, rid) {
                continue;
            }
            total = total.wrapping_add(self.version_values(rid, relative_version)?[column]);
        }
        Ok(total)
    }

    /// Base RIDs of live rows whose current `column` equals `value`. Only
    /// indexed columns answer; the primary key column always is.
    pub fn locate(&self, column: usize, value: i64) -> Vec<Rid> {
        self.state.read().index.locate(column, value)
    }

    pub fn locate_range(&self, column: usize, lo: i64, hi: i64) -> Vec<Rid> {
        self.state.read().index.locate_range(column, lo, hi)
    }

    /// Builds a secondary index over the current values of `column`.
    /// Returns false if the column was already indexed.
    pub fn create_index(&self, column: usize) -> TableResult<bool> {
        self.check_column(column)?;
        let mut state = self.state.write();
        if !state.index.create_index(column) {
            return Ok(false);
        }
        let live: Vec<Rid> = state.key_index.values().copied().collect();
        for rid in live {
            let value = self.version_values(rid, 0)?[column];
            state.index.add(column, value, rid);
        }
        Ok(true)
    }

    /// Drops a secondary index. The primary key index cannot be dropped.
    pub fn drop_index(&self, column: usize) -> bool {
        if column == self.key_column {
            return false;
        }
        self.state.write().index.drop_index(column)
    }

    /// Folding tail chains back into base records is not implemented for
    /// this engine.
    pub fn merge(&self) -> TableResult<()> {
        Err(TableError::Unsupported("merge"))
    }

    /// Reverses a mutation made by this table. The caller must still hold
    /// the locks taken by the mutation.
    pub fn revert(&self, undo: &Undo) -> TableResult<()> {
        match undo {
            Undo::Noop => {}
            Undo::Insert { rid, key } => {
                let values = self.read_user_columns(*rid)?;
                self.unregister(*rid, *key, &values);
            }
            Undo::Update {
                base_rid,
                tail_rid,
                prev_indirection,
                prev_schema,
                changes,
            } => {
                {
                    let mut state = self.state.write();
                    state.page_directory.remove(tail_rid);
                    for &(column, old, new) in changes.iter().rev() {
                        state.index.remove(column, new, *base_rid);
                        state.index.add(column, old, *base_rid);
                        if column == self.key_column {
                            state.key_index.remove(&new);
                            state.key_index.insert(old, *base_rid);
                        }
                    }
                }
                self.write_field(*base_rid, INDIRECTION_COLUMN, *prev_indirection as i64)?;
                self.write_field(*base_rid, SCHEMA_ENCODING_COLUMN, *prev_schema as i64)?;
            }
            Undo::Delete { rid, key } => {
                let values = self.version_values(*rid, 0)?;
                let mut state = self.state.write();
                state.tombstones.insert(*rid, false);
                state.key_index.insert(*key, *rid);
                if state.retired_keys.get(key) == Some(rid) {
                    state.retired_keys.remove(key);
                }
                for (column, value) in values.iter().enumerate() {
                    state.index.add(column, *value, *rid);
                }
            }
        }
        Ok(())
    }

    /// Forgets an inserted row. Its RID is not handed out again.
    fn unregister(&self, rid: Rid, key: i64, values: &[i64]) {
        let mut state = self.state.write();
        if state.key_index.get(&key) == Some(&rid) {
            state.key_index.remove(&key);
        }
        state.page_directory.remove(&rid);
        state.tombstones.remove(&rid);
        for (column, value) in values.iter().enumerate() {
            state.index.remove(column, *value, rid);
        }
    }

    /// Newest-first tail RIDs of a base record.
    pub fn lineage(&self, base_rid: Rid) -> TableResult<Vec<Rid>> {
        let mut chain = Vec::new();
        let mut cursor = self.read_field(base_rid, INDIRECTION_COLUMN)? as Rid;
        while cursor != NULL_RID {
            debug_assert!(is_tail_rid(cursor), "indirection {} is not a tail rid", cursor);
            chain.push(cursor);
            cursor = self.read_field(cursor, INDIRECTION_COLUMN)? as Rid;
        }
        Ok(chain)
    }

    fn version_values(&self, base_rid: Rid, relative_version: i64) -> TableResult<Vec<i64>> {
        match relative_version {
            v if v >= 0 => self.fold(base_rid, 0),
            -1 => self.read_user_columns(base_rid),
            v => self.fold(base_rid, v.unsigned_abs() as usize - 1),
        }
    }

    /// Base values with every tail applied oldest to newest, except the
    /// newest `skip_newest`.
    fn fold(&self, base_rid: Rid, skip_newest: usize) -> TableResult<Vec<i64>> {
        let mut values = self.read_user_columns(base_rid)?;
        let lineage = self.lineage(base_rid)?;
        for &tail in lineage.iter().skip(skip_newest).rev() {
            let mask = self.read_field(tail, SCHEMA_ENCODING_COLUMN)? as u64;
            for column in mask_columns(mask, self.num_columns) {
                values[column] = self.read_field(tail, META_COLUMNS + column)?;
            }
        }
        Ok(values)
    }

    fn lock_live_row(&self, txn: TransactionId, key: i64) -> TableResult<Rid> {
        let rid = self.rid_for_key(key).ok_or(TableError::KeyNotFound(key))?;
        self.lock_exclusive(txn, rid)?;
        if !self.state.read().is_live(key, rid) {
            return Err(TableError::KeyNotFound(key));
        }
        Ok(rid)
    }

    fn lock_shared(&self, txn: TransactionId, rid: Rid) -> TableResult<()> {
        let resource = self.resource(rid);
        if self.lock_manager.acquire_shared(txn, &resource) {
            Ok(())
        } else {
            Err(TableError::LockConflict(resource))
        }
    }

    fn lock_exclusive(&self, txn: TransactionId, rid: Rid) -> TableResult<()> {
        let resource = self.resource(rid);
        if self.lock_manager.acquire_exclusive(txn, &resource) {
            Ok(())
        } else {
            Err(TableError::LockConflict(resource))
        }
    }

    fn check_arity(&self, actual: usize) -> TableResult<()> {
        if actual != self.num_columns {
            return Err(TableError::ArityMismatch {
                expected: self.num_columns,
                actual,
            });
        }
        Ok(())
    }

    fn check_column(&self, column: usize) -> TableResult<()> {
        if column >= self.num_columns {
            return Err(TableError::ColumnOutOfRange {
                column,
                num_columns: self.num_columns,
            });
        }
        Ok(())
    }

    fn page_key(&self, location: &RecordLocation, column: usize) -> PageKey {
        PageKey::new(
            Arc::clone(&self.name),
            location.range_id,
            location.segment,
            location.page_idx,
            column as u32,
        )
    }

    fn read_field(&self, rid: Rid, column: usize) -> TableResult<i64> {
        let location = RecordLocation::for_rid(rid);
        let page = self.pool.fetch(&self.page_key(&location, column))?;
        Ok(page.read(location.slot as usize)?)
    }

    fn write_field(&self, rid: Rid, column: usize, value: i64) -> TableResult<()> {
        let location = RecordLocation::for_rid(rid);
        let mut page = self.pool.fetch(&self.page_key(&location, column))?;
        page.write(location.slot as usize, value)?;
        Ok(())
    }

    fn read_user_columns(&self, rid: Rid) -> TableResult<Vec<i64>> {
        (0..self.num_columns)
            .map(|c| self.read_field(rid, META_COLUMNS + c))
            .collect()
    }

    fn write_record(&self, rid: Rid, indirection: Rid, schema: u64, values: &[i64]) -> TableResult<()> {
        self.write_field(rid, INDIRECTION_COLUMN, indirection as i64)?;
        self.write_field(rid, RID_COLUMN, rid as i64)?;
        self.write_field(rid, TIMESTAMP_COLUMN, now())?;
        self.write_field(rid, SCHEMA_ENCODING_COLUMN, schema as i64)?;
        for (column, value) in values.iter().enumerate() {
            self.write_field(rid, META_COLUMNS + column, *value)?;
        }
        Ok(())
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
