//! Background execution of transactions with retry.

use std::mem;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use rand::Rng;

use super::handle::Transaction;
use crate::config::RetryPolicy;
use crate::table::TableError;

/// Consecutive aborts of one transaction between liveness warnings.
const ABORT_WARN_INTERVAL: u32 = 1000;

/// Outcome counts of one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub committed: usize,
    /// Aborted attempts, including ones that were later retried to commit.
    pub aborts: usize,
    /// Transactions dropped after exhausting `RetryPolicy::max_attempts`.
    pub gave_up: usize,
}

/// Runs a batch of transactions on its own thread, retrying each aborted
/// transaction until it commits.
pub struct TransactionWorker {
    transactions: Vec<Transaction>,
    policy: RetryPolicy,
    handle: Option<JoinHandle<Result<WorkerReport, TableError>>>,
}

impl TransactionWorker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            transactions: Vec::new(),
            policy,
            handle: None,
        }
    }

    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    /// Transactions queued and not yet handed to a thread.
    pub fn pending(&self) -> usize {
        self.transactions.len()
    }

    /// Starts the worker thread with every queued transaction.
    pub fn run(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("Worker is already running");
        }
        let transactions = mem::take(&mut self.transactions);
        let policy = self.policy.clone();
        let handle = thread::Builder::new()
            .name("txn-worker".to_string())
            .spawn(move || run_all(transactions, &policy))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Waits for the thread to finish. A fatal storage error that stopped
    /// the worker is returned here.
    pub fn join(&mut self) -> Result<WorkerReport> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("Worker was not started"))?;
        let report = handle
            .join()
            .map_err(|_| anyhow!("Worker thread panicked"))??;
        Ok(report)
    }
}

impl Default for TransactionWorker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

fn run_all(transactions: Vec<Transaction>, policy: &RetryPolicy) -> Result<WorkerReport, TableError> {
    let mut report = WorkerReport::default();
    let mut rng = rand::thread_rng();

    for mut txn in transactions {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if txn.run()? {
                report.committed += 1;
                break;
            }
            report.aborts += 1;

            if attempt % ABORT_WARN_INTERVAL == 0 {
                warn!("{} has aborted {} times in a row", txn.id(), attempt);
            }
            if policy.max_attempts.is_some_and(|max| attempt >= max) {
                warn!("{} gave up after {} attempts", txn.id(), attempt);
                report.gave_up += 1;
                break;
            }

            let ceiling = policy.backoff_ceiling(attempt);
            if !ceiling.is_zero() {
                let micros = rng.gen_range(0..=ceiling.as_micros() as u64);
                thread::sleep(Duration::from_micros(micros));
            }
        }
        debug!("{} finished after {} attempts", txn.id(), attempt);
    }

    info!(
        "Worker done: {} committed, {} aborts, {} gave up",
        report.committed, report.aborts, report.gave_up
    );
    Ok(report)
}
