use super::replacer::Replacer;
use crate::storage::page::PageKey;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct LruEntry {
    /// Logical time of the last access (lower = older).
    stamp: u64,
    evictable: bool,
}

/// Evicts the unpinned page with the oldest access stamp.
#[derive(Debug, Default)]
pub struct LruReplacer {
    entries: HashMap<PageKey, LruEntry>,
    clock: u64,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, key: &PageKey) {
        let stamp = self.tick();
        self.entries
            .entry(key.clone())
            .and_modify(|e| e.stamp = stamp)
            .or_insert(LruEntry {
                stamp,
                evictable: false,
            });
    }

    fn set_evictable(&mut self, key: &PageKey, evictable: bool) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.evictable = evictable;
        }
    }

    fn evict(&mut self) -> Option<PageKey> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| e.evictable)
            .min_by_key(|(_, e)| e.stamp)
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&victim);
        Some(victim)
    }

    fn remove(&mut self, key: &PageKey) {
        self.entries.remove(key);
    }

    fn size(&self) -> usize {
        self.entries.values().filter(|e| e.evictable).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::Segment;

    fn key(page_idx: u32) -> PageKey {
        PageKey::new("t", 0, Segment::Base, page_idx, 0)
    }

    fn unpin(replacer: &mut LruReplacer, page_idx: u32) {
        replacer.record_access(&key(page_idx));
        replacer.set_evictable(&key(page_idx), true);
    }

    #[test]
    fn test_basic_lru_operations() {
        let mut replacer = LruReplacer::new(3);

        // Initially empty
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        unpin(&mut replacer, 1);
        unpin(&mut replacer, 2);
        unpin(&mut replacer, 3);
        assert_eq!(replacer.size(), 3);

        // Oldest access goes first
        assert_eq!(replacer.evict(), Some(key(1)));
        assert_eq!(replacer.evict(), Some(key(2)));
        assert_eq!(replacer.evict(), Some(key(3)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_pinned_pages_are_skipped() {
        let mut replacer = LruReplacer::new(3);

        unpin(&mut replacer, 1);
        unpin(&mut replacer, 2);
        replacer.set_evictable(&key(1), false);
        assert_eq!(replacer.size(), 1);

        assert_eq!(replacer.evict(), Some(key(2)));
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(&key(1), true);
        assert_eq!(replacer.evict(), Some(key(1)));
    }

    #[test]
    fn test_access_refreshes_stamp() {
        let mut replacer = LruReplacer::new(3);

        unpin(&mut replacer, 1);
        unpin(&mut replacer, 2);
        unpin(&mut replacer, 3);

        // Touch 1 again; 2 becomes the oldest.
        replacer.record_access(&key(1));

        assert_eq!(replacer.evict(), Some(key(2)));
        assert_eq!(replacer.evict(), Some(key(3)));
        assert_eq!(replacer.evict(), Some(key(1)));
    }

    #[test]
    fn test_remove_and_unknown_keys() {
        let mut replacer = LruReplacer::new(2);

        // Marking an untracked page is a no-op.
        replacer.set_evictable(&key(999), true);
        assert_eq!(replacer.size(), 0);

        unpin(&mut replacer, 1);
        replacer.remove(&key(1));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }
}
