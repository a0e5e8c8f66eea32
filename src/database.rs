use crate::catalog;
use crate::concurrency::LockManager;
use crate::config::{EngineConfig, MAX_COLUMNS};
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::{BufferPool, PageFileManager};
use crate::table::Table;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A directory of versioned tables sharing one buffer pool and one lock
/// manager.
pub struct Database {
    root: PathBuf,
    config: EngineConfig,
    pool: BufferPool,
    lock_manager: Arc<LockManager>,
    tables: HashMap<String, Arc<Table>>,
}

impl Database {
    /// Opens the database at `root`, creating the directory if needed and
    /// reloading any tables recorded in its catalog.
    pub fn open(root: &Path, config: EngineConfig) -> Result<Self> {
        let capacity = config.buffer_pool_capacity;
        if capacity == 0 {
            bail!("Buffer pool capacity must be positive");
        }
        let disk = PageFileManager::new(root)?;
        let pool = BufferPool::new(disk, Box::new(LruReplacer::new(capacity)), capacity);
        let lock_manager = Arc::new(LockManager::new());

        let mut tables = HashMap::new();
        for snapshot in catalog::load(root)? {
            let name = snapshot.name.clone();
            let table = Table::from_snapshot(snapshot, pool.clone(), Arc::clone(&lock_manager))
                .with_context(|| format!("Failed to restore table {}", name))?;
            tables.insert(name, Arc::new(table));
        }
        info!("Opened database at {:?} with {} tables", root, tables.len());

        Ok(Self {
            root: root.to_path_buf(),
            config,
            pool,
            lock_manager,
            tables,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Creates a table of `num_columns` integer columns keyed on
    /// `key_column`.
    pub fn create_table(&mut self, name: &str, num_columns: usize, key_column: usize) -> Result<Arc<Table>> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            bail!("Invalid table name {:?}", name);
        }
        if self.tables.contains_key(name) {
            bail!("Table {} already exists", name);
        }
        if num_columns == 0 || num_columns > MAX_COLUMNS {
            bail!("Tables need 1 to {} columns, got {}", MAX_COLUMNS, num_columns);
        }
        if key_column >= num_columns {
            bail!("Key column {} out of range for {} columns", key_column, num_columns);
        }

        let table = Arc::new(Table::new(
            name,
            num_columns,
            key_column,
            self.pool.clone(),
            Arc::clone(&self.lock_manager),
        ));
        self.tables.insert(name.to_string(), Arc::clone(&table));
        info!("Created table {} ({} columns, key {})", name, num_columns, key_column);
        Ok(table)
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    /// Removes a table and its page files.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if self.tables.remove(name).is_none() {
            bail!("Table {} does not exist", name);
        }
        self.pool.discard_table(name)?;
        info!("Dropped table {}", name);
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Writes every dirty page and the catalog. The database stays usable.
    pub fn close(&self) -> Result<()> {
        let written = self.pool.persist_all();
        let mut snapshots: Vec<_> = self.tables.values().map(|t| t.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        catalog::save(&self.root, &snapshots)?;
        info!(
            "Closed database at {:?}: {} pages written, {} tables",
            self.root,
            written,
            snapshots.len()
        );
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing database at {:?} failed: {:#}", self.root, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_get_table() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;

        let table = db.create_table("grades", 5, 0)?;
        assert_eq!(table.name(), "grades");
        assert!(db.get_table("grades").is_some());
        assert!(db.get_table("missing").is_none());

        assert!(db.create_table("grades", 5, 0).is_err());
        assert!(db.create_table("wide", MAX_COLUMNS + 1, 0).is_err());
        assert!(db.create_table("bad_key", 3, 3).is_err());
        assert!(db.create_table("../escape", 3, 0).is_err());
        assert_eq!(db.table_names(), vec!["grades".to_string()]);
        Ok(())
    }

    #[test]
    fn test_reopen_restores_tables() -> Result<()> {
        let dir = tempdir()?;
        {
            let mut db = Database::open(dir.path(), EngineConfig::default())?;
            let query = Query::new(db.create_table("grades", 5, 0)?);
            assert!(query.insert(&[1, 10, 20, 30, 40])?);
            assert!(query.insert(&[2, 11, 21, 31, 41])?);
            assert!(query.update(1, &[None, Some(99), None, None, None])?);
            assert!(query.delete(2)?);
            db.get_table("grades").unwrap().create_index(2)?;
            db.close()?;
        }

        let db = Database::open(dir.path(), EngineConfig::default().with_buffer_pool_capacity(8))?;
        let table = db.get_table("grades").unwrap();
        let query = Query::new(table.clone());

        let rows = query.select(1, 0, &[true; 5])?.unwrap();
        assert_eq!(
            rows[0].columns,
            vec![Some(1), Some(99), Some(20), Some(30), Some(40)]
        );
        let base = query.select_version(1, 0, &[true; 5], -1)?.unwrap();
        assert_eq!(base[0].columns[1], Some(10));
        assert_eq!(query.select(2, 0, &[true; 5])?, Some(vec![]));
        assert_eq!(table.locate(2, 20), vec![1]);

        // Counters carry over: new records get fresh RIDs.
        assert!(query.insert(&[3, 0, 0, 0, 0])?);
        assert_eq!(table.rid_for_key(3), Some(3));
        Ok(())
    }

    #[test]
    fn test_drop_closes_implicitly() -> Result<()> {
        let dir = tempdir()?;
        {
            let mut db = Database::open(dir.path(), EngineConfig::default())?;
            let query = Query::new(db.create_table("t", 2, 1)?);
            query.insert(&[5, 7])?;
        }
        let db = Database::open(dir.path(), EngineConfig::default())?;
        let query = Query::new(db.get_table("t").unwrap());
        assert_eq!(query.sum(7, 7, 0)?, Some(5));
        Ok(())
    }

    #[test]
    fn test_drop_table() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path(), EngineConfig::default())?;
        let query = Query::new(db.create_table("t", 2, 0)?);
        query.insert(&[1, 1])?;
        db.close()?;

        db.drop_table("t")?;
        assert!(db.get_table("t").is_none());
        assert!(!dir.path().join("t").exists());
        assert!(db.drop_table("t").is_err());

        let query = Query::new(db.create_table("t", 2, 0)?);
        assert_eq!(query.select(1, 0, &[true, true])?, Some(vec![]));
        Ok(())
    }
}
