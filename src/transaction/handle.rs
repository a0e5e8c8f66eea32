//! A unit of work over one or more tables.

use std::sync::Arc;

use log::{debug, error};

use super::id::TransactionId;
use super::state::TransactionState;
use crate::concurrency::LockManager;
use crate::query::{Operation, OperationOutput};
use crate::table::{Table, TableError, Undo};

/// An ordered list of table operations that commit or abort together.
///
/// Locks are taken as the operations run and all of them are released when
/// the run ends (strict two-phase locking). An aborted transaction can be
/// run again; it keeps its id.
pub struct Transaction {
    id: TransactionId,
    operations: Vec<(Arc<Table>, Operation)>,
    state: TransactionState,
    undo_log: Vec<(Arc<Table>, Undo)>,
    outputs: Vec<OperationOutput>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::next(),
            operations: Vec::new(),
            state: TransactionState::Active,
            undo_log: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn add_operation(&mut self, table: Arc<Table>, operation: Operation) {
        self.operations.push((table, operation));
    }

    /// Outputs of the operations of the last committed run, in order.
    pub fn outputs(&self) -> &[OperationOutput] {
        &self.outputs
    }

    /// Runs every operation in order.
    ///
    /// Returns `Ok(true)` on commit and `Ok(false)` on abort, with all
    /// changes undone. Either way every lock is released. A fatal error is
    /// undone and released the same way, then returned.
    pub fn run(&mut self) -> Result<bool, TableError> {
        self.state = TransactionState::Active;
        self.undo_log.clear();
        self.outputs.clear();

        let mut failure = None;
        for (table, operation) in &self.operations {
            match operation.apply(table, self.id) {
                Ok((undo, output)) => {
                    if !undo.is_noop() {
                        self.undo_log.push((Arc::clone(table), undo));
                    }
                    self.outputs.push(output);
                }
                Err(e) => {
                    debug!("{} {} on {} failed: {}", self.id, operation.name(), table.name(), e);
                    failure = Some(e);
                    break;
                }
            }
        }

        match failure {
            None => {
                self.undo_log.clear();
                self.release_locks();
                self.state = TransactionState::after_run(true);
                debug!("{} committed {} operations", self.id, self.operations.len());
                Ok(true)
            }
            Some(e) => {
                let undo_result = self.rollback();
                self.release_locks();
                self.outputs.clear();
                self.state = TransactionState::after_run(false);
                undo_result?;
                if e.is_fatal() {
                    error!("{} hit a fatal error: {}", self.id, e);
                    return Err(e);
                }
                Ok(false)
            }
        }
    }

    /// Replays the undo log newest first. Stops at the first undo that
    /// fails, which can only be a storage error.
    fn rollback(&mut self) -> Result<(), TableError> {
        while let Some((table, undo)) = self.undo_log.pop() {
            table.revert(&undo)?;
        }
        Ok(())
    }

    fn release_locks(&self) {
        let mut released: Vec<&Arc<LockManager>> = Vec::new();
        for (table, _) in &self.operations {
            let manager = table.lock_manager();
            if !released.iter().any(|m| Arc::ptr_eq(m, manager)) {
                manager.release_all(self.id);
                released.push(manager);
            }
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::{BufferPool, PageFileManager};
    use anyhow::Result;
    use tempfile::{tempdir, TempDir};

    fn create_test_table() -> Result<(Arc<Table>, TempDir)> {
        let dir = tempdir()?;
        let disk = PageFileManager::new(dir.path())?;
        let pool = BufferPool::new(disk, Box::new(LruReplacer::new(32)), 32);
        let table = Table::new("grades", 5, 0, pool, Arc::new(LockManager::new()));
        Ok((Arc::new(table), dir))
    }

    fn insert(values: [i64; 5]) -> Operation {
        Operation::Insert {
            values: values.iter().copied().map(Some).collect(),
        }
    }

    fn sum(lo: i64, hi: i64, column: usize) -> Operation {
        Operation::Sum { lo, hi, column }
    }

    #[test]
    fn test_commit_collects_outputs() -> Result<()> {
        let (table, _dir) = create_test_table()?;
        let mut txn = Transaction::new();
        txn.add_operation(table.clone(), insert([1, 10, 0, 0, 0]));
        txn.add_operation(table.clone(), insert([2, 20, 0, 0, 0]));
        txn.add_operation(table.clone(), sum(1, 2, 1));

        assert!(txn.run()?);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.outputs().len(), 3);
        assert_eq!(txn.outputs()[2], OperationOutput::Sum(30));
        assert_eq!(table.lock_manager().locked_resources(), 0);
        Ok(())
    }

    #[test]
    fn test_abort_undoes_earlier_operations() -> Result<()> {
        let (table, _dir) = create_test_table()?;
        let mut setup = Transaction::new();
        setup.add_operation(table.clone(), insert([1, 10, 0, 0, 0]));
        assert!(setup.run()?);

        let mut txn = Transaction::new();
        txn.add_operation(table.clone(), insert([2, 20, 0, 0, 0]));
        txn.add_operation(
            table.clone(),
            Operation::Update {
                key: 1,
                values: vec![None, Some(99), None, None, None],
            },
        );
        txn.add_operation(table.clone(), Operation::Delete { key: 1 });
        // Fails: key 1 was just deleted by this transaction.
        txn.add_operation(table.clone(), Operation::Increment { key: 1, column: 1 });

        assert!(!txn.run()?);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(txn.outputs().is_empty());
        assert_eq!(table.lock_manager().locked_resources(), 0);

        let mut check = Transaction::new();
        check.add_operation(table.clone(), sum(0, 10, 1));
        assert!(check.run()?);
        assert_eq!(check.outputs()[0], OperationOutput::Sum(10));
        assert_eq!(table.len(), 1);
        Ok(())
    }

    #[test]
    fn test_lock_conflict_aborts_and_rerun_commits() -> Result<()> {
        let (table, _dir) = create_test_table()?;
        let mut setup = Transaction::new();
        setup.add_operation(table.clone(), insert([1, 0, 0, 0, 0]));
        assert!(setup.run()?);

        // A foreign holder of the row's exclusive lock.
        let blocker = TransactionId::next();
        table.update(blocker, 1, &[None, Some(5), None, None, None])?;

        let mut txn = Transaction::new();
        txn.add_operation(table.clone(), Operation::Increment { key: 1, column: 1 });
        assert!(!txn.run()?);

        table.lock_manager().release_all(blocker);
        assert!(txn.run()?);
        assert_eq!(txn.state(), TransactionState::Committed);

        let mut check = Transaction::new();
        check.add_operation(table.clone(), sum(1, 1, 1));
        assert!(check.run()?);
        assert_eq!(check.outputs()[0], OperationOutput::Sum(6));
        Ok(())
    }

    #[test]
    fn test_reads_are_not_logged() -> Result<()> {
        let (table, _dir) = create_test_table()?;
        let mut txn = Transaction::new();
        txn.add_operation(table.clone(), sum(0, 10, 0));
        txn.add_operation(
            table.clone(),
            Operation::Select {
                key: 3,
                key_column: 0,
                projection: vec![true; 5],
            },
        );
        assert!(txn.run()?);
        assert!(txn.undo_log.is_empty());
        assert_eq!(txn.outputs()[1], OperationOutput::Records(vec![]));
        Ok(())
    }
}
