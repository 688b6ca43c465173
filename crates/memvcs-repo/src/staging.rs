//! Staging index: a persisted `path -> (blob_hash, mode)` map. Grounded on
//! `staging.py`'s `StagingArea`, extended past its `status()` TODOs into a
//! real staged/modified-unstaged/untracked/deleted classification.

use std::collections::BTreeMap;

use memvcs_objects::{Object, ObjectStore, ObjectStoreError};
use memvcs_storage::{StorageAdapter, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::flatten_tree;
use crate::walk::list_files_recursive;

const INDEX_PATH: &str = "index.json";
const DEFAULT_MODE: &str = "100644";

#[derive(Error, Debug)]
pub enum StagingError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Object(#[from] ObjectStoreError),
    #[error("malformed index.json: {0}")]
    Malformed(String),
    #[error("path escapes the working root: {0}")]
    PathEscape(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagedEntry {
    pub blob_hash: String,
    pub mode: String,
}

/// `staged` / `modified` (tracked but differs from working content) /
/// `untracked` / `deleted`, each a sorted list of `current/`-relative
/// paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    pub deleted: Vec<String>,
}

pub struct StagingArea {
    index: BTreeMap<String, StagedEntry>,
}

impl StagingArea {
    pub fn load(storage: &dyn StorageAdapter) -> Result<Self, StagingError> {
        let index = match storage.read(INDEX_PATH) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StagingError::Malformed(e.to_string()))?,
            Err(StorageError::NotFound(_)) => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { index })
    }

    fn save(&self, storage: &dyn StorageAdapter) -> Result<(), StagingError> {
        let bytes =
            serde_json::to_vec_pretty(&self.index).map_err(|e| StagingError::Malformed(e.to_string()))?;
        storage.write(INDEX_PATH, &bytes)?;
        Ok(())
    }

    /// Stage a single file: read its current bytes from `work_storage`,
    /// write a blob object, and record it in the index.
    pub fn add_file(
        &mut self,
        meta_storage: &dyn StorageAdapter,
        work_storage: &dyn StorageAdapter,
        objects: &ObjectStore,
        path: &str,
    ) -> Result<String, StagingError> {
        if path.is_empty() || path.contains("..") {
            return Err(StagingError::PathEscape(path.to_string()));
        }
        let content = work_storage.read(path)?;
        let blob_hash = objects.put(&Object::Blob(content))?;
        self.index.insert(
            path.to_string(),
            StagedEntry {
                blob_hash: blob_hash.clone(),
                mode: DEFAULT_MODE.to_string(),
            },
        );
        self.save(meta_storage)?;
        Ok(blob_hash)
    }

    /// Stage every regular file under `dir` (recursively).
    pub fn add_directory(
        &mut self,
        meta_storage: &dyn StorageAdapter,
        work_storage: &dyn StorageAdapter,
        objects: &ObjectStore,
        dir: &str,
    ) -> Result<Vec<String>, StagingError> {
        let mut staged = Vec::new();
        for path in list_files_recursive(work_storage, dir)? {
            self.add_file(meta_storage, work_storage, objects, &path)?;
            staged.push(path);
        }
        Ok(staged)
    }

    pub fn remove(&mut self, meta_storage: &dyn StorageAdapter, path: &str) -> Result<bool, StagingError> {
        let removed = self.index.remove(path).is_some();
        if removed {
            self.save(meta_storage)?;
        }
        Ok(removed)
    }

    pub fn clear(&mut self, meta_storage: &dyn StorageAdapter) -> Result<(), StagingError> {
        self.index.clear();
        meta_storage.delete(INDEX_PATH)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_staged(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn get_blob_hash(&self, path: &str) -> Option<&str> {
        self.index.get(path).map(|e| e.blob_hash.as_str())
    }

    pub fn entries(&self) -> &BTreeMap<String, StagedEntry> {
        &self.index
    }

    /// Classify every path touched by the index, `HEAD`'s tree, or the
    /// working directory into staged/modified/untracked/deleted.
    pub fn status(
        &self,
        work_storage: &dyn StorageAdapter,
        objects: &ObjectStore,
        head_tree_hash: Option<&str>,
    ) -> Result<StatusReport, StagingError> {
        let head_entries = match head_tree_hash {
            Some(hash) => flatten_tree(objects, hash)?,
            None => BTreeMap::new(),
        };
        let working_paths = list_files_recursive(work_storage, "")?;

        let mut working_hashes = BTreeMap::new();
        for path in &working_paths {
            let content = work_storage.read(path)?;
            working_hashes.insert(path.clone(), memvcs_objects::sha256_hex(&content));
        }

        let mut report = StatusReport::default();
        for path in &working_paths {
            let working_hash = &working_hashes[path];
            if let Some(staged) = self.index.get(path) {
                if *working_hash == staged.blob_hash {
                    report.staged.push(path.clone());
                } else {
                    report.modified.push(path.clone());
                }
            } else if let Some(head_hash) = head_entries.get(path) {
                if working_hash != head_hash {
                    report.modified.push(path.clone());
                }
            } else {
                report.untracked.push(path.clone());
            }
        }

        let mut tracked_paths: Vec<&String> = self.index.keys().collect();
        tracked_paths.extend(head_entries.keys());
        for path in tracked_paths {
            if !working_hashes.contains_key(path) && !report.deleted.contains(path) {
                report.deleted.push(path.clone());
            }
        }

        report.staged.sort();
        report.modified.sort();
        report.modified.dedup();
        report.untracked.sort();
        report.deleted.sort();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (LocalStorageAdapter, LocalStorageAdapter, ObjectStore) {
        let meta_dir = tempdir().unwrap();
        let work_dir = tempdir().unwrap();
        let meta = LocalStorageAdapter::new(meta_dir.path()).unwrap();
        let work = LocalStorageAdapter::new(work_dir.path()).unwrap();
        let objects = ObjectStore::new(Arc::new(LocalStorageAdapter::new(meta_dir.path()).unwrap()));
        std::mem::forget(meta_dir);
        std::mem::forget(work_dir);
        (meta, work, objects)
    }

    #[test]
    fn add_file_persists_and_reloads() {
        let (meta, work, objects) = setup();
        work.write("a.md", b"hello").unwrap();
        let mut staging = StagingArea::load(&meta).unwrap();
        staging.add_file(&meta, &work, &objects, "a.md").unwrap();
        assert!(staging.is_staged("a.md"));

        let reloaded = StagingArea::load(&meta).unwrap();
        assert!(reloaded.is_staged("a.md"));
    }

    #[test]
    fn remove_unstages_and_clear_empties() {
        let (meta, work, objects) = setup();
        work.write("a.md", b"hello").unwrap();
        let mut staging = StagingArea::load(&meta).unwrap();
        staging.add_file(&meta, &work, &objects, "a.md").unwrap();
        assert!(staging.remove(&meta, "a.md").unwrap());
        assert!(!staging.is_staged("a.md"));

        staging.add_file(&meta, &work, &objects, "a.md").unwrap();
        staging.clear(&meta).unwrap();
        assert!(staging.is_empty());
    }

    #[test]
    fn status_classifies_staged_modified_untracked_deleted() {
        let (meta, work, objects) = setup();
        work.write("tracked.md", b"v1").unwrap();
        work.write("loose.md", b"v1").unwrap();
        let mut staging = StagingArea::load(&meta).unwrap();
        staging.add_file(&meta, &work, &objects, "tracked.md").unwrap();

        work.write("tracked.md", b"v2").unwrap();
        work.write("untracked.md", b"new").unwrap();
        work.delete("loose.md").unwrap();

        let report = staging.status(&work, &objects, None).unwrap();
        assert_eq!(report.modified, vec!["tracked.md".to_string()]);
        assert_eq!(report.untracked, vec!["untracked.md".to_string()]);
        assert!(report.staged.is_empty());
    }
}
