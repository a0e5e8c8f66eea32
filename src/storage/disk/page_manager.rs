use crate::config::PAGE_SIZE;
use crate::storage::page::{Page, PageKey};
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Maps page keys to one file each under a root directory:
/// `root/<table>/range_<id>/<segment>/page_<idx>_col_<col>.bin`.
///
/// Files hold the raw page bytes with no header or checksum.
#[derive(Debug, Clone)]
pub struct PageFileManager {
    root: PathBuf,
}

impl PageFileManager {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create page root: {:?}", root))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_path(&self, key: &PageKey) -> PathBuf {
        self.segment_dir(key)
            .join(format!("page_{}_col_{}.bin", key.page_idx, key.column))
    }

    /// Reads a page file. `Ok(None)` means the page was never written.
    pub fn read_page(&self, key: &PageKey) -> Result<Option<Page>> {
        let path = self.page_path(key);
        match fs::read(&path) {
            Ok(raw) => Ok(Some(Page::from_bytes(&raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read page file: {:?}", path)),
        }
    }

    pub fn write_page(&self, key: &PageKey, page: &Page) -> Result<()> {
        let dir = self.segment_dir(key);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create page directory: {:?}", dir))?;

        let path = self.page_path(key);
        let bytes: &[u8] = page.as_bytes();
        debug_assert_eq!(bytes.len(), PAGE_SIZE);
        fs::write(&path, bytes).with_context(|| format!("Failed to write page file: {:?}", path))?;
        Ok(())
    }

    /// Deletes every page file of a table.
    pub fn remove_table(&self, table: &str) -> Result<()> {
        let dir = self.root.join(table);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove table directory: {:?}", dir)),
        }
    }

    fn segment_dir(&self, key: &PageKey) -> PathBuf {
        self.root
            .join(&*key.table)
            .join(format!("range_{}", key.range_id))
            .join(key.segment.as_str())
    }
}
