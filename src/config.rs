//! Engine configuration and storage geometry.

use std::time::Duration;

/// Size of every page, in bytes. Pages are the unit of caching and disk I/O.
pub const PAGE_SIZE: usize = 4096;

/// Width of a single stored value.
pub const VALUE_SIZE: usize = 8;

/// Number of fixed-width values one page holds.
pub const RECORDS_PER_PAGE: usize = PAGE_SIZE / VALUE_SIZE;

/// Number of pages per column in one page range.
pub const PAGES_PER_RANGE: usize = 16;

/// Maximum user columns per table; bounded by the width of the schema mask.
pub const MAX_COLUMNS: usize = 64;

pub const DEFAULT_BUFFER_POOL_CAPACITY: usize = 256;

/// How a [`TransactionWorker`](crate::transaction::TransactionWorker) paces
/// and bounds retries of aborted transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until commit.
    pub max_attempts: Option<u32>,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Retries forever without sleeping between attempts.
    pub fn immediate() -> Self {
        Self {
            max_attempts: None,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Upper bound of the sleep before retry number `attempt` (1-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
        }
    }
}

/// Top-level settings for a [`Database`](crate::database::Database).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of pages held in memory at once.
    pub buffer_pool_capacity: usize,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn with_buffer_pool_capacity(mut self, capacity: usize) -> Self {
        self.buffer_pool_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool_capacity: DEFAULT_BUFFER_POOL_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}
