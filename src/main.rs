//! lstore demo: loads a table through concurrent workers, hammers a few hot
//! rows with increments, then reopens the database to check the result.

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use log::info;
use lstore::config::{EngineConfig, RetryPolicy};
use lstore::database::Database;
use lstore::query::{Operation, Query};
use lstore::table::Table;
use lstore::transaction::{Transaction, TransactionWorker, WorkerReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const TABLE_NAME: &str = "grades";
const NUM_COLUMNS: usize = 5;
const COUNTER_COLUMN: usize = 1;

/// L-Store versioned column store demo
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./lstore_data")]
    data_dir: PathBuf,

    /// Buffer pool capacity in pages
    #[arg(short = 'p', long, default_value = "256")]
    pool_capacity: usize,

    /// Number of worker threads
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Rows to load
    #[arg(short, long, default_value = "1000")]
    rows: i64,

    /// Increment transactions per worker
    #[arg(short, long, default_value = "100")]
    txns_per_worker: usize,

    /// Give up on a transaction after this many attempts (default: retry until commit)
    #[arg(short, long)]
    max_attempts: Option<u32>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.workers == 0 || args.rows <= 0 {
        bail!("Need at least one worker and one row");
    }

    let mut retry = RetryPolicy::default();
    retry.max_attempts = args.max_attempts;
    let config = EngineConfig::default()
        .with_buffer_pool_capacity(args.pool_capacity)
        .with_retry(retry);

    let expected = {
        let mut db = Database::open(&args.data_dir, config.clone()).context("Failed to open database")?;
        if db.get_table(TABLE_NAME).is_some() {
            db.drop_table(TABLE_NAME)?;
        }
        let table = db.create_table(TABLE_NAME, NUM_COLUMNS, 0)?;

        let started = Instant::now();
        let load = run_workers(&config, load_batches(&table, args.rows, args.workers))?;
        println!(
            "Loaded {} rows in {:?} ({} aborts)",
            table.len(),
            started.elapsed(),
            load.aborts
        );

        let started = Instant::now();
        let hot_keys = args.rows.min(8);
        let increments = run_workers(
            &config,
            increment_batches(&table, hot_keys, args.workers, args.txns_per_worker),
        )?;
        println!(
            "Ran {} increment transactions in {:?} ({} aborts, {} gave up)",
            increments.committed,
            started.elapsed(),
            increments.aborts,
            increments.gave_up
        );

        let query = Query::new(Arc::clone(&table));
        let total = query
            .sum(0, args.rows - 1, COUNTER_COLUMN)?
            .context("Sum failed on an idle table")?;
        println!("Sum of column {}: {}", COUNTER_COLUMN, total);

        db.close()?;
        total
    };

    let db = Database::open(&args.data_dir, config).context("Failed to reopen database")?;
    let table = db
        .get_table(TABLE_NAME)
        .context("Table missing after reopen")?;
    let reopened = Query::new(table)
        .sum(0, args.rows - 1, COUNTER_COLUMN)?
        .context("Sum failed after reopen")?;
    if reopened != expected {
        bail!("Sum changed across reopen: {} before, {} after", expected, reopened);
    }
    println!("Reopen check passed");
    Ok(())
}

/// Splits the keys `0..rows` into one insert transaction per batch of 50.
fn load_batches(table: &Arc<Table>, rows: i64, workers: usize) -> Vec<Vec<Transaction>> {
    let mut batches: Vec<Vec<Transaction>> = (0..workers).map(|_| Vec::new()).collect();
    let mut txn = Transaction::new();
    for key in 0..rows {
        txn.add_operation(
            Arc::clone(table),
            Operation::Insert {
                values: vec![Some(key), Some(0), Some(key % 10), Some(key * 2), Some(-key)],
            },
        );
        if txn.len() == 50 || key == rows - 1 {
            let worker = key as usize % workers;
            batches[worker].push(std::mem::take(&mut txn));
        }
    }
    batches
}

/// Every worker increments the same few hot keys, two per transaction, in
/// opposite orders on alternate workers to provoke conflicts.
fn increment_batches(
    table: &Arc<Table>,
    hot_keys: i64,
    workers: usize,
    txns_per_worker: usize,
) -> Vec<Vec<Transaction>> {
    (0..workers)
        .map(|worker| {
            (0..txns_per_worker)
                .map(|i| {
                    let a = (i as i64) % hot_keys;
                    let b = (a + 1) % hot_keys;
                    let (first, second) = if worker % 2 == 0 { (a, b) } else { (b, a) };
                    let mut txn = Transaction::new();
                    for key in [first, second] {
                        txn.add_operation(
                            Arc::clone(table),
                            Operation::Increment {
                                key,
                                column: COUNTER_COLUMN,
                            },
                        );
                    }
                    txn
                })
                .collect()
        })
        .collect()
}

fn run_workers(config: &EngineConfig, batches: Vec<Vec<Transaction>>) -> Result<WorkerReport> {
    let mut workers: Vec<TransactionWorker> = batches
        .into_iter()
        .map(|batch| {
            let mut worker = TransactionWorker::new(config.retry.clone());
            for txn in batch {
                worker.add_transaction(txn);
            }
            worker
        })
        .collect();

    for worker in &mut workers {
        worker.run()?;
    }

    let mut total = WorkerReport::default();
    for (i, worker) in workers.iter_mut().enumerate() {
        let report = worker.join()?;
        info!("Worker {}: {:?}", i, report);
        total.committed += report.committed;
        total.aborts += report.aborts;
        total.gave_up += report.gave_up;
    }
    Ok(total)
}
