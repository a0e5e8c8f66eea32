//! Concurrency control module.
//!
//! Record-level shared/exclusive locking with a no-wait policy. Transactions
//! hold their locks until commit or abort (strict two-phase locking).

pub mod lock;

pub use lock::{LockManager, LockMode, ResourceId};
