//! Transaction state.

use std::fmt;

/// Where a transaction stands after its latest run.
///
/// Running an aborted transaction again puts it back into `Active`; a
/// committed one is never run again by a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionState {
    /// Not yet run, or currently running.
    #[default]
    Active,
    Committed,
    /// Every change of the last run was undone and its locks released.
    Aborted,
}

impl TransactionState {
    /// State that a run ending in commit (`true`) or abort (`false`) leaves.
    pub fn after_run(committed: bool) -> Self {
        if committed {
            Self::Committed
        } else {
            Self::Aborted
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
