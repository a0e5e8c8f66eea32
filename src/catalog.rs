//! Persistent table metadata.
//!
//! Column values live in page files; everything needed to find them again
//! (RID counters, page directory, key index, tombstones) is written here as a
//! bincode-encoded list of [`TableSnapshot`]s.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::table::{RecordLocation, Rid};

pub const CATALOG_FILE_NAME: &str = "catalog.bin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub num_columns: usize,
    pub key_column: usize,
    pub next_base_rid: Rid,
    pub next_tail_rid: Rid,
    pub page_directory: HashMap<Rid, RecordLocation>,
    pub key_index: BTreeMap<i64, Rid>,
    pub tombstones: HashMap<Rid, bool>,
    pub retired_keys: HashMap<i64, Rid>,
    /// Secondary indexes to rebuild; the key column is always indexed.
    pub indexed_columns: Vec<usize>,
}

pub fn catalog_path(root: &Path) -> PathBuf {
    root.join(CATALOG_FILE_NAME)
}

/// Writes the catalog through a temporary file so a crash never leaves a
/// half-written catalog behind.
pub fn save(root: &Path, tables: &[TableSnapshot]) -> Result<()> {
    let path = catalog_path(root);
    let tmp = path.with_extension("bin.tmp");
    let bytes = bincode::serialize(tables).context("Failed to encode catalog")?;
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

/// Loads the catalog, or an empty one if the database is new.
pub fn load(root: &Path) -> Result<Vec<TableSnapshot>> {
    let path = catalog_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
    bincode::deserialize(&bytes).with_context(|| format!("Corrupt catalog at {:?}", path))
}
