pub mod lru;
pub mod replacer;

use crate::storage::disk::PageFileManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{Page, PageKey};
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use replacer::Replacer;
use std::collections::HashMap;
use std::sync::Arc;

/// A cached page shared between the pool and whoever has it pinned.
pub type SharedPage = Arc<RwLock<Page>>;

struct Frame {
    page: SharedPage,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    frames: HashMap<PageKey, Frame>,
    replacer: Box<dyn Replacer>,
}

struct BufferPoolInner {
    state: Mutex<PoolState>,
    disk: PageFileManager,
    capacity: usize,
}

/// Page cache with pinning, dirty tracking and LRU eviction.
///
/// All frame bookkeeping sits behind one mutex. Page contents have their own
/// lock so readers of different pages never contend on the pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    pub fn new(disk: PageFileManager, replacer: Box<dyn Replacer>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                state: Mutex::new(PoolState {
                    frames: HashMap::with_capacity(capacity),
                    replacer,
                }),
                disk,
                capacity,
            }),
        }
    }

    /// Returns the cached page and pins it. A missing page is loaded from
    /// disk, or zero-filled if it has no file, after evicting one page when
    /// the pool is at capacity.
    pub fn get_page(&self, key: &PageKey) -> StorageResult<SharedPage> {
        let mut state = self.inner.state.lock();

        if let Some(frame) = state.frames.get_mut(key) {
            frame.pin_count += 1;
            let page = Arc::clone(&frame.page);
            state.replacer.record_access(key);
            state.replacer.set_evictable(key, false);
            return Ok(page);
        }

        if state.frames.len() >= self.inner.capacity {
            self.evict_one(&mut state, key)?;
        }

        let page = Arc::new(RwLock::new(self.load(key)));
        state.frames.insert(
            key.clone(),
            Frame {
                page: Arc::clone(&page),
                pin_count: 1,
                is_dirty: false,
            },
        );
        state.replacer.record_access(key);
        state.replacer.set_evictable(key, false);
        Ok(page)
    }

    /// Pins a page behind a guard that unpins it on drop.
    pub fn fetch(&self, key: &PageKey) -> StorageResult<PinnedPage<'_>> {
        let page = self.get_page(key)?;
        Ok(PinnedPage {
            pool: self,
            key: key.clone(),
            page,
            modified: false,
        })
    }

    /// Unpins a page (never below zero), marking it dirty if `modified`.
    pub fn release_page(&self, key: &PageKey, modified: bool) {
        let mut state = self.inner.state.lock();
        let PoolState { frames, replacer } = &mut *state;

        let Some(frame) = frames.get_mut(key) else {
            return;
        };
        if modified {
            frame.is_dirty = true;
        }
        if frame.pin_count > 0 {
            frame.pin_count -= 1;
            replacer.record_access(key);
        }
        if frame.pin_count == 0 {
            replacer.set_evictable(key, true);
        }
    }

    /// Marks a cached page dirty without touching its pin count.
    pub fn mark_dirty(&self, key: &PageKey) {
        if let Some(frame) = self.inner.state.lock().frames.get_mut(key) {
            frame.is_dirty = true;
        }
    }

    /// Writes every dirty page to disk and clears the dirty flags. Returns
    /// the number of pages written.
    pub fn persist_all(&self) -> usize {
        let mut state = self.inner.state.lock();
        let mut written = 0;

        for (key, frame) in state.frames.iter_mut() {
            if frame.is_dirty {
                self.write_back(key, &frame.page.read());
                frame.is_dirty = false;
                written += 1;
            }
        }

        debug!("Persisted {} dirty pages", written);
        written
    }

    /// Persists everything, then empties the cache.
    pub fn reset(&self) {
        self.persist_all();
        let mut state = self.inner.state.lock();
        let keys: Vec<PageKey> = state.frames.keys().cloned().collect();
        for key in &keys {
            state.replacer.remove(key);
        }
        state.frames.clear();
    }

    /// Drops a table's cached pages without writing them back and removes
    /// its page files. Pinned pages stay cached.
    pub fn discard_table(&self, table: &str) -> anyhow::Result<()> {
        {
            let mut state = self.inner.state.lock();
            let PoolState { frames, replacer } = &mut *state;
            frames.retain(|key, frame| {
                let discard = &*key.table == table && frame.pin_count == 0;
                if discard {
                    replacer.remove(key);
                }
                !discard
            });
        }
        self.inner.disk.remove_table(table)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.inner.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cached(&self, key: &PageKey) -> bool {
        self.inner.state.lock().frames.contains_key(key)
    }

    pub fn pin_count(&self, key: &PageKey) -> Option<u32> {
        self.inner.state.lock().frames.get(key).map(|f| f.pin_count)
    }

    pub fn is_dirty(&self, key: &PageKey) -> Option<bool> {
        self.inner.state.lock().frames.get(key).map(|f| f.is_dirty)
    }

    fn evict_one(&self, state: &mut PoolState, wanted: &PageKey) -> StorageResult<()> {
        let Some(victim) = state.replacer.evict() else {
            error!(
                "Buffer pool exhausted: {} pages, all pinned (loading {})",
                self.inner.capacity, wanted
            );
            return Err(StorageError::BufferPoolExhausted {
                capacity: self.inner.capacity,
                key: wanted.clone(),
            });
        };

        if let Some(frame) = state.frames.remove(&victim) {
            if frame.is_dirty {
                self.write_back(&victim, &frame.page.read());
            }
            debug!("Evicted page {} (dirty: {})", victim, frame.is_dirty);
        }
        Ok(())
    }

    fn load(&self, key: &PageKey) -> Page {
        match self.inner.disk.read_page(key) {
            Ok(Some(page)) => page,
            Ok(None) => Page::new(),
            Err(e) => {
                warn!("Reading page {} failed, using an empty page: {:#}", key, e);
                Page::new()
            }
        }
    }

    fn write_back(&self, key: &PageKey, page: &Page) {
        if let Err(e) = self.inner.disk.write_page(key, page) {
            warn!("Writing page {} failed, change dropped: {:#}", key, e);
        }
    }
}

/// A pinned page. Unpins on drop, reporting whether it was written through.
pub struct PinnedPage<'a> {
    pool: &'a BufferPool,
    key: PageKey,
    page: SharedPage,
    modified: bool,
}

impl PinnedPage<'_> {
    pub fn key(&self) -> &PageKey {
        &self.key
    }

    pub fn read(&self, slot: usize) -> StorageResult<i64> {
        self.page.read().read_value(slot)
    }

    pub fn write(&mut self, slot: usize, value: i64) -> StorageResult<()> {
        self.page.write().write_value(slot, value)?;
        self.modified = true;
        Ok(())
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.pool.release_page(&self.key, self.modified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::Segment;
    use anyhow::Result;
    use tempfile::{tempdir, TempDir};

    fn create_test_buffer_pool(capacity: usize) -> Result<(BufferPool, TempDir)> {
        let dir = tempdir()?;
        let disk = PageFileManager::new(dir.path())?;
        let replacer = Box::new(lru::LruReplacer::new(capacity));
        Ok((BufferPool::new(disk, replacer, capacity), dir))
    }

    fn key(page_idx: u32) -> PageKey {
        PageKey::new("t", 0, Segment::Base, page_idx, 0)
    }

    #[test]
    fn test_get_page_pins_and_caches() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(4)?;

        let page = pool.get_page(&key(0))?;
        assert_eq!(page.read().read_value(0)?, 0);
        assert_eq!(pool.pin_count(&key(0)), Some(1));

        let again = pool.get_page(&key(0))?;
        assert!(Arc::ptr_eq(&page, &again));
        assert_eq!(pool.pin_count(&key(0)), Some(2));
        assert_eq!(pool.len(), 1);

        pool.release_page(&key(0), false);
        pool.release_page(&key(0), false);
        // Floor at zero
        pool.release_page(&key(0), false);
        assert_eq!(pool.pin_count(&key(0)), Some(0));
        assert_eq!(pool.is_dirty(&key(0)), Some(false));
        Ok(())
    }

    #[test]
    fn test_release_modified_marks_dirty() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(4)?;

        pool.get_page(&key(0))?;
        pool.release_page(&key(0), true);
        assert_eq!(pool.is_dirty(&key(0)), Some(true));

        pool.get_page(&key(1))?;
        pool.mark_dirty(&key(1));
        assert_eq!(pool.is_dirty(&key(1)), Some(true));
        assert_eq!(pool.pin_count(&key(1)), Some(1));
        Ok(())
    }

    #[test]
    fn test_eviction_picks_oldest_unpinned() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(2)?;

        pool.get_page(&key(0))?; // A
        pool.release_page(&key(0), false);
        pool.get_page(&key(1))?; // B
        pool.release_page(&key(1), false);
        pool.get_page(&key(2))?; // C

        assert!(!pool.is_cached(&key(0)));
        assert!(pool.is_cached(&key(1)));
        assert!(pool.is_cached(&key(2)));
        assert_eq!(pool.len(), 2);
        Ok(())
    }

    #[test]
    fn test_eviction_skips_pinned() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(2)?;

        pool.get_page(&key(0))?; // stays pinned
        pool.get_page(&key(1))?;
        pool.release_page(&key(1), false);
        pool.get_page(&key(2))?;

        assert!(pool.is_cached(&key(0)));
        assert!(!pool.is_cached(&key(1)));
        Ok(())
    }

    #[test]
    fn test_exhausted_pool_is_an_error() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(2)?;

        pool.get_page(&key(0))?;
        pool.get_page(&key(1))?;

        let err = pool.get_page(&key(2)).unwrap_err();
        assert_eq!(
            err,
            StorageError::BufferPoolExhausted {
                capacity: 2,
                key: key(2)
            }
        );
        assert_eq!(pool.len(), 2);
        Ok(())
    }

    #[test]
    fn test_dirty_page_survives_eviction() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(1)?;

        {
            let mut page = pool.fetch(&key(0))?;
            page.write(3, 99)?;
        }
        assert_eq!(pool.is_dirty(&key(0)), Some(true));

        // Loading another page evicts and flushes page 0.
        {
            let page = pool.fetch(&key(1))?;
            assert_eq!(page.read(3)?, 0);
        }
        assert!(!pool.is_cached(&key(0)));

        let page = pool.fetch(&key(0))?;
        assert_eq!(page.read(3)?, 99);
        Ok(())
    }

    #[test]
    fn test_persist_all_writes_files() -> Result<()> {
        let (pool, dir) = create_test_buffer_pool(4)?;

        {
            let mut page = pool.fetch(&key(0))?;
            page.write(0, 7)?;
        }
        {
            let page = pool.fetch(&key(1))?;
            page.read(0)?;
        }

        assert_eq!(pool.persist_all(), 1);
        assert_eq!(pool.is_dirty(&key(0)), Some(false));
        assert_eq!(pool.persist_all(), 0);

        let disk = PageFileManager::new(dir.path())?;
        let on_disk = disk.read_page(&key(0))?.expect("page persisted");
        assert_eq!(on_disk.read_value(0)?, 7);
        assert!(disk.read_page(&key(1))?.is_none());
        Ok(())
    }

    #[test]
    fn test_reset_empties_cache_and_keeps_data() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(4)?;

        {
            let mut page = pool.fetch(&key(5))?;
            page.write(1, -3)?;
        }
        pool.reset();
        assert!(pool.is_empty());

        let page = pool.fetch(&key(5))?;
        assert_eq!(page.read(1)?, -3);
        Ok(())
    }

    #[test]
    fn test_pinned_guard_releases_on_drop() -> Result<()> {
        let (pool, _dir) = create_test_buffer_pool(2)?;

        let guard = pool.fetch(&key(0))?;
        assert_eq!(pool.pin_count(&key(0)), Some(1));
        assert_eq!(guard.key(), &key(0));
        drop(guard);
        assert_eq!(pool.pin_count(&key(0)), Some(0));
        assert_eq!(pool.is_dirty(&key(0)), Some(false));
        Ok(())
    }

    #[test]
    fn test_unreadable_page_degrades_to_empty() -> Result<()> {
        let (pool, dir) = create_test_buffer_pool(2)?;

        // A directory where the page file should be makes the read fail.
        let disk = PageFileManager::new(dir.path())?;
        std::fs::create_dir_all(disk.page_path(&key(0)))?;

        let page = pool.fetch(&key(0))?;
        assert_eq!(page.read(0)?, 0);
        drop(page);

        // Writing back over the directory fails too, and is swallowed.
        pool.mark_dirty(&key(0));
        assert_eq!(pool.persist_all(), 1);
        Ok(())
    }

    #[test]
    fn test_discard_table_drops_pages_and_files() -> Result<()> {
        let (pool, dir) = create_test_buffer_pool(4)?;
        let other = PageKey::new("other", 0, Segment::Base, 0, 0);

        {
            let mut page = pool.fetch(&key(0))?;
            page.write(0, 1)?;
        }
        pool.persist_all();
        {
            let mut page = pool.fetch(&key(0))?;
            page.write(0, 2)?;
            let mut page = pool.fetch(&other)?;
            page.write(0, 3)?;
        }

        pool.discard_table("t")?;
        assert!(!pool.is_cached(&key(0)));
        assert!(pool.is_cached(&other));
        assert_eq!(pool.persist_all(), 1);

        let disk = PageFileManager::new(dir.path())?;
        assert!(disk.read_page(&key(0))?.is_none());
        Ok(())
    }
}
