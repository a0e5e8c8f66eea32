//! lstore: an L-Store style versioned column store.
//!
//! Tables hold integer columns. Updates append tail records instead of
//! overwriting base records, so earlier versions of a row stay readable.
//! Transactions take no-wait record locks and undo their changes on abort;
//! workers retry aborted transactions until they commit.

pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod database;
pub mod query;
pub mod storage;
pub mod table;
pub mod transaction;
