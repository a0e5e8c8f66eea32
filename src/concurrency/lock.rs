//! Record lock management.
//!
//! Shared/exclusive locks on `(table, rid)` resources under a no-wait policy:
//! a conflicting request is denied immediately instead of queueing. Callers
//! use strict two-phase locking, releasing everything at commit or abort
//! through [`LockManager::release_all`].

use crate::table::Rid;
use crate::transaction::TransactionId;
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// Identifier for a lockable record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub table: Arc<str>,
    pub rid: Rid,
}

impl ResourceId {
    pub fn new(table: impl Into<Arc<str>>, rid: Rid) -> Self {
        Self {
            table: table.into(),
            rid,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.rid)
    }
}

/// Holders of one resource.
#[derive(Debug, Default)]
struct LockState {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }

    fn remove(&mut self, tid: TransactionId) {
        self.shared.remove(&tid);
        if self.exclusive == Some(tid) {
            self.exclusive = None;
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<ResourceId, LockState>,
    /// Reverse map so `release_all` doesn't scan every resource.
    held: HashMap<TransactionId, HashSet<ResourceId>>,
}

/// No-wait shared/exclusive lock manager.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    /// Creates a new lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a shared lock unless another transaction holds the resource
    /// exclusively. Holding exclusive already implies shared.
    pub fn acquire_shared(&self, tid: TransactionId, resource: &ResourceId) -> bool {
        let mut table = self.table.lock();
        let state = table.locks.entry(resource.clone()).or_default();

        match state.exclusive {
            Some(holder) if holder == tid => return true,
            Some(holder) => {
                debug!("{} denied S on {}: X held by {}", tid, resource, holder);
                return false;
            }
            None => {}
        }

        state.shared.insert(tid);
        table.held.entry(tid).or_default().insert(resource.clone());
        true
    }

    /// Grants an exclusive lock if the requester already has it, if the
    /// resource is free, or if the requester is its sole shared holder
    /// (upgrade). Any other holder causes a denial.
    pub fn acquire_exclusive(&self, tid: TransactionId, resource: &ResourceId) -> bool {
        let mut table = self.table.lock();
        let state = table.locks.entry(resource.clone()).or_default();

        match state.exclusive {
            Some(holder) if holder == tid => return true,
            Some(holder) => {
                debug!("{} denied X on {}: X held by {}", tid, resource, holder);
                return false;
            }
            None => {}
        }

        if state.shared.iter().any(|holder| *holder != tid) {
            debug!(
                "{} denied X on {}: S held by {} other(s)",
                tid,
                resource,
                state.shared.len() - usize::from(state.shared.contains(&tid))
            );
            return false;
        }

        state.shared.remove(&tid);
        state.exclusive = Some(tid);
        table.held.entry(tid).or_default().insert(resource.clone());
        true
    }

    /// Releases every lock `tid` holds in one step and drops resource
    /// entries left without holders.
    pub fn release_all(&self, tid: TransactionId) {
        let mut table = self.table.lock();
        let Some(resources) = table.held.remove(&tid) else {
            return;
        };

        for resource in &resources {
            if let Some(state) = table.locks.get_mut(resource) {
                state.remove(tid);
                if state.is_free() {
                    table.locks.remove(resource);
                }
            }
        }
        debug!("{} released {} lock(s)", tid, resources.len());
    }

    /// Checks if a transaction holds a specific lock. Exclusive satisfies a
    /// shared query.
    pub fn holds(&self, tid: TransactionId, resource: &ResourceId, mode: LockMode) -> bool {
        let table = self.table.lock();
        let Some(state) = table.locks.get(resource) else {
            return false;
        };
        match mode {
            LockMode::Exclusive => state.exclusive == Some(tid),
            LockMode::Shared => state.exclusive == Some(tid) || state.shared.contains(&tid),
        }
    }

    /// Gets all resources locked by a transaction.
    pub fn locks_held(&self, tid: TransactionId) -> Vec<ResourceId> {
        let table = self.table.lock();
        table
            .held
            .get(&tid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_locked(&self, resource: &ResourceId) -> bool {
        self.table.lock().locks.contains_key(resource)
    }

    /// Number of resources with at least one holder.
    pub fn locked_resources(&self) -> usize {
        self.table.lock().locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn res(rid: Rid) -> ResourceId {
        ResourceId::new("grades", rid)
    }

    fn txn(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    #[test]
    fn test_lock_compatibility() {
        assert!(LockMode::Shared.is_compatible_with(&LockMode::Shared));
        assert!(!LockMode::Shared.is_compatible_with(&LockMode::Exclusive));
        assert!(!LockMode::Exclusive.is_compatible_with(&LockMode::Shared));
        assert!(!LockMode::Exclusive.is_compatible_with(&LockMode::Exclusive));
    }

    #[test]
    fn test_multiple_shared_locks() {
        let manager = LockManager::new();

        assert!(manager.acquire_shared(txn(1), &res(1)));
        assert!(manager.acquire_shared(txn(2), &res(1)));
        assert!(manager.acquire_shared(txn(3), &res(1)));

        assert!(manager.holds(txn(1), &res(1), LockMode::Shared));
        assert!(manager.holds(txn(2), &res(1), LockMode::Shared));
        assert!(manager.holds(txn(3), &res(1), LockMode::Shared));
        assert!(!manager.holds(txn(1), &res(1), LockMode::Exclusive));
    }

    #[test]
    fn test_exclusive_denies_others() {
        let manager = LockManager::new();

        assert!(manager.acquire_exclusive(txn(1), &res(1)));
        assert!(!manager.acquire_shared(txn(2), &res(1)));
        assert!(!manager.acquire_exclusive(txn(2), &res(1)));

        // Re-entrant for the holder, and implies shared.
        assert!(manager.acquire_exclusive(txn(1), &res(1)));
        assert!(manager.acquire_shared(txn(1), &res(1)));
        assert!(manager.holds(txn(1), &res(1), LockMode::Shared));
        assert!(!manager.holds(txn(2), &res(1), LockMode::Shared));
    }

    #[test]
    fn test_shared_blocks_foreign_exclusive() {
        let manager = LockManager::new();

        assert!(manager.acquire_shared(txn(1), &res(1)));
        assert!(!manager.acquire_exclusive(txn(2), &res(1)));
        assert!(!manager.holds(txn(2), &res(1), LockMode::Exclusive));
    }

    #[test]
    fn test_sole_shared_holder_upgrades() {
        let manager = LockManager::new();

        assert!(manager.acquire_shared(txn(1), &res(1)));
        assert!(manager.acquire_exclusive(txn(1), &res(1)));
        assert!(manager.holds(txn(1), &res(1), LockMode::Exclusive));
        assert!(!manager.acquire_shared(txn(2), &res(1)));
    }

    #[test]
    fn test_upgrade_denied_with_other_readers() {
        let manager = LockManager::new();

        assert!(manager.acquire_shared(txn(1), &res(1)));
        assert!(manager.acquire_shared(txn(2), &res(1)));
        assert!(!manager.acquire_exclusive(txn(1), &res(1)));
        // The failed upgrade keeps the original shared lock.
        assert!(manager.holds(txn(1), &res(1), LockMode::Shared));

        manager.release_all(txn(2));
        assert!(manager.acquire_exclusive(txn(1), &res(1)));
    }

    #[test]
    fn test_denied_request_leaves_no_entry() {
        let manager = LockManager::new();

        assert!(manager.acquire_exclusive(txn(1), &res(1)));
        assert!(!manager.acquire_shared(txn(2), &res(1)));
        assert!(manager.locks_held(txn(2)).is_empty());
        assert_eq!(manager.locked_resources(), 1);
    }

    #[test]
    fn test_release_all_locks() {
        let manager = LockManager::new();

        assert!(manager.acquire_shared(txn(1), &res(1)));
        assert!(manager.acquire_exclusive(txn(1), &res(2)));
        assert!(manager.acquire_shared(txn(1), &ResourceId::new("other", 1)));
        assert!(manager.acquire_shared(txn(2), &res(1)));

        assert_eq!(manager.locks_held(txn(1)).len(), 3);

        manager.release_all(txn(1));

        assert!(manager.locks_held(txn(1)).is_empty());
        assert!(!manager.holds(txn(1), &res(1), LockMode::Shared));
        assert!(!manager.is_locked(&res(2)));
        // Entries still held by others survive.
        assert!(manager.is_locked(&res(1)));
        assert_eq!(manager.locked_resources(), 1);

        // Now free for an exclusive request from a third transaction.
        assert!(manager.acquire_exclusive(txn(3), &res(2)));

        // Releasing an unknown transaction is harmless.
        manager.release_all(txn(99));
    }

    #[test]
    fn test_exclusive_is_mutually_exclusive_across_threads() {
        let manager = Arc::new(LockManager::new());
        let resource = res(7);

        let handles: Vec<_> = (1..=8)
            .map(|id| {
                let manager = Arc::clone(&manager);
                let resource = resource.clone();
                thread::spawn(move || manager.acquire_exclusive(txn(id), &resource))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 1);
    }
}
