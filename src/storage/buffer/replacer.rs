use crate::storage::page::PageKey;
use std::fmt::Debug;

pub trait Replacer: Send + Sync + Debug {
    /// Records a use of `key`, making it the most recently used page.
    fn record_access(&mut self, key: &PageKey);

    /// Marks a page as evictable (unpinned) or not (pinned).
    fn set_evictable(&mut self, key: &PageKey, evictable: bool);

    /// Selects and forgets a page to evict. Returns None if no page can be evicted.
    fn evict(&mut self) -> Option<PageKey>;

    /// Stops tracking a page that left the pool by another route.
    fn remove(&mut self, key: &PageKey);

    /// Get the number of evictable pages.
    fn size(&self) -> usize;
}
