//! Transactions over versioned tables.
//!
//! - `id`: process-wide unique transaction ids
//! - `state`: active / committed / aborted
//! - `handle`: the [`Transaction`] itself, with undo on abort
//! - `worker`: threads that run batches of transactions with retry

pub mod handle;
pub mod id;
pub mod state;
pub mod worker;

pub use handle::Transaction;
pub use id::{TransactionId, TransactionIdGenerator};
pub use state::TransactionState;
pub use worker::{TransactionWorker, WorkerReport};
