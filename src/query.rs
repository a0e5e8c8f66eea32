//! Table operations as values, and the auto-commit [`Query`] facade.

use std::sync::Arc;

use crate::table::{Record, Table, TableResult, Undo};
use crate::transaction::{Transaction, TransactionId};

/// One table call, recorded so a transaction can replay it on retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert {
        values: Vec<Option<i64>>,
    },
    Select {
        key: i64,
        key_column: usize,
        projection: Vec<bool>,
    },
    SelectVersion {
        key: i64,
        key_column: usize,
        projection: Vec<bool>,
        relative_version: i64,
    },
    Update {
        key: i64,
        values: Vec<Option<i64>>,
    },
    Delete {
        key: i64,
    },
    Sum {
        lo: i64,
        hi: i64,
        column: usize,
    },
    SumVersion {
        lo: i64,
        hi: i64,
        column: usize,
        relative_version: i64,
    },
    Increment {
        key: i64,
        column: usize,
    },
}

/// What a successful operation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    Done,
    Records(Vec<Record>),
    Sum(i64),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Select { .. } => "select",
            Operation::SelectVersion { .. } => "select_version",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::Sum { .. } => "sum",
            Operation::SumVersion { .. } => "sum_version",
            Operation::Increment { .. } => "increment",
        }
    }

    /// Runs the operation for `txn`. Reads return [`Undo::Noop`].
    pub fn apply(&self, table: &Table, txn: TransactionId) -> TableResult<(Undo, OperationOutput)> {
        let done = |undo: Undo| (undo, OperationOutput::Done);
        match self {
            Operation::Insert { values } => table.insert(txn, values).map(done),
            Operation::Select {
                key,
                key_column,
                projection,
            } => table
                .select(txn, *key, *key_column, projection)
                .map(|r| (Undo::Noop, OperationOutput::Records(r))),
            Operation::SelectVersion {
                key,
                key_column,
                projection,
                relative_version,
            } => table
                .select_version(txn, *key, *key_column, projection, *relative_version)
                .map(|r| (Undo::Noop, OperationOutput::Records(r))),
            Operation::Update { key, values } => table.update(txn, *key, values).map(done),
            Operation::Delete { key } => table.delete(txn, *key).map(done),
            Operation::Sum { lo, hi, column } => table
                .sum(txn, *lo, *hi, *column)
                .map(|s| (Undo::Noop, OperationOutput::Sum(s))),
            Operation::SumVersion {
                lo,
                hi,
                column,
                relative_version,
            } => table
                .sum_version(txn, *lo, *hi, *column, *relative_version)
                .map(|s| (Undo::Noop, OperationOutput::Sum(s))),
            Operation::Increment { key, column } => table.increment(txn, *key, *column).map(done),
        }
    }
}

/// Auto-commit access to one table. Every call is its own transaction.
///
/// Ordinary failures (missing key, duplicate key, lock conflict, bad
/// arguments) come back as `Ok(false)` or `Ok(None)`. `Err` is reserved for
/// fatal storage errors.
#[derive(Clone)]
pub struct Query {
    table: Arc<Table>,
}

impl Query {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn insert(&self, values: &[i64]) -> TableResult<bool> {
        let values = values.iter().copied().map(Some).collect();
        Ok(self.run(Operation::Insert { values })?.is_some())
    }

    pub fn select(
        &self,
        key: i64,
        key_column: usize,
        projection: &[bool],
    ) -> TableResult<Option<Vec<Record>>> {
        Ok(self
            .run(Operation::Select {
                key,
                key_column,
                projection: projection.to_vec(),
            })?
            .and_then(into_records))
    }

    pub fn select_version(
        &self,
        key: i64,
        key_column: usize,
        projection: &[bool],
        relative_version: i64,
    ) -> TableResult<Option<Vec<Record>>> {
        Ok(self
            .run(Operation::SelectVersion {
                key,
                key_column,
                projection: projection.to_vec(),
                relative_version,
            })?
            .and_then(into_records))
    }

    pub fn update(&self, key: i64, values: &[Option<i64>]) -> TableResult<bool> {
        Ok(self
            .run(Operation::Update {
                key,
                values: values.to_vec(),
            })?
            .is_some())
    }

    pub fn delete(&self, key: i64) -> TableResult<bool> {
        Ok(self.run(Operation::Delete { key })?.is_some())
    }

    pub fn sum(&self, lo: i64, hi: i64, column: usize) -> TableResult<Option<i64>> {
        Ok(self.run(Operation::Sum { lo, hi, column })?.and_then(into_sum))
    }

    pub fn sum_version(
        &self,
        lo: i64,
        hi: i64,
        column: usize,
        relative_version: i64,
    ) -> TableResult<Option<i64>> {
        Ok(self
            .run(Operation::SumVersion {
                lo,
                hi,
                column,
                relative_version,
            })?
            .and_then(into_sum))
    }

    pub fn increment(&self, key: i64, column: usize) -> TableResult<bool> {
        Ok(self.run(Operation::Increment { key, column })?.is_some())
    }

    fn run(&self, operation: Operation) -> TableResult<Option<OperationOutput>> {
        let mut txn = Transaction::new();
        txn.add_operation(Arc::clone(&self.table), operation);
        if txn.run()? {
            Ok(txn.outputs().first().cloned())
        } else {
            Ok(None)
        }
    }
}

fn into_records(output: OperationOutput) -> Option<Vec<Record>> {
    match output {
        OperationOutput::Records(records) => Some(records),
        _ => None,
    }
}

fn into_sum(output: OperationOutput) -> Option<i64> {
    match output {
        OperationOutput::Sum(sum) => Some(sum),
        _ => None,
    }
}
