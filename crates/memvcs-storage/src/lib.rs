//! Storage Adapter
//!
//! Byte-level access and advisory locking, abstracted so the core does not
//! know where bytes live. A local filesystem implementation is provided;
//! cloud-object-storage adapters are an external collaborator behind this
//! same trait.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("path escapes storage root: {0}")]
    PathEscape(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lock '{0}' not obtained within {1:?}")]
    LockTimeout(String, Duration),
}

/// Metadata about a stored entry, as returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub is_dir: bool,
}

/// Abstract byte-level blob/lock/listing interface. Implementations can be
/// local, S3, or GCS; the core uses only this contract.
pub trait StorageAdapter: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;
    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn exists(&self, path: &str) -> Result<bool, StorageError>;
    fn delete(&self, path: &str) -> Result<bool, StorageError>;
    fn list(&self, path: &str) -> Result<Vec<FileInfo>, StorageError>;
    fn makedirs(&self, path: &str) -> Result<(), StorageError>;
    fn is_dir(&self, path: &str) -> Result<bool, StorageError>;
    fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<bool, StorageError>;
    fn release_lock(&self, name: &str);
    fn is_locked(&self, name: &str) -> bool;
    fn root(&self) -> &Path;
}

/// Storage backend rooted at a single directory on the local filesystem.
///
/// Every path is resolved under `root`; an escape attempt (e.g. `..`) fails
/// with `StorageError::PathEscape` before any I/O happens.
pub struct LocalStorageAdapter {
    root: PathBuf,
    locks: Mutex<HashMap<String, File>>,
}

impl LocalStorageAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Self::io_err(&root, e))?;
        let root = root.canonicalize().map_err(|e| Self::io_err(&root, e))?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn io_err(path: impl AsRef<Path>, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Resolve a relative path under `root`, rejecting any traversal outside it.
    /// Resolution is purely lexical: it does not require the path to exist, so
    /// callers can resolve a path before creating it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        if path.is_empty() {
            return Ok(self.root.clone());
        }
        let mut out = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::PathEscape(path.to_string()));
                }
            }
        }
        if !out.starts_with(&self.root) {
            return Err(StorageError::PathEscape(path.to_string()));
        }
        Ok(out)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(".locks").join(format!("{name}.lock"))
    }
}

impl StorageAdapter for LocalStorageAdapter {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let resolved = self.resolve(path)?;
        fs::read(&resolved).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                Self::io_err(&resolved, e)
            }
        })
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(parent, e))?;
        }
        // Write-temp-then-rename for atomic durability on return.
        let tmp_name = format!(
            "{}.tmp-{}",
            resolved
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("object"),
            std::process::id()
        );
        let tmp = resolved.with_file_name(tmp_name);
        let mut f = File::create(&tmp).map_err(|e| Self::io_err(&tmp, e))?;
        f.write_all(bytes).map_err(|e| Self::io_err(&tmp, e))?;
        f.sync_all().map_err(|e| Self::io_err(&tmp, e))?;
        fs::rename(&tmp, &resolved).map_err(|e| Self::io_err(&resolved, e))?;
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path)?.exists())
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Ok(false);
        }
        if resolved.is_dir() {
            fs::remove_dir_all(&resolved).map_err(|e| Self::io_err(&resolved, e))?;
        } else {
            fs::remove_file(&resolved).map_err(|e| Self::io_err(&resolved, e))?;
        }
        Ok(true)
    }

    fn list(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Ok(Vec::new());
        }
        if !resolved.is_dir() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&resolved).map_err(|e| Self::io_err(&resolved, e))? {
            let entry = entry.map_err(|e| Self::io_err(&resolved, e))?;
            let meta = entry.metadata().map_err(|e| Self::io_err(&resolved, e))?;
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(&entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            out.push(FileInfo {
                path: rel,
                size: meta.len(),
                mtime,
                is_dir: meta.is_dir(),
            });
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn makedirs(&self, path: &str) -> Result<(), StorageError> {
        let resolved = self.resolve(path)?;
        fs::create_dir_all(&resolved).map_err(|e| Self::io_err(&resolved, e))
    }

    fn is_dir(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path)?.is_dir())
    }

    fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<bool, StorageError> {
        let lock_path = self.lock_path(name);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(parent, e))?;
        }
        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_path)
                .map_err(|e| Self::io_err(&lock_path, e))?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let mut locks = self.locks.lock().unwrap();
                    locks.insert(name.to_string(), file);
                    debug!(lock = name, "acquired repository lock");
                    return Ok(true);
                }
                Err(_) => {
                    if start.elapsed() >= timeout {
                        warn!(lock = name, ?timeout, "lock acquisition timed out");
                        return Err(StorageError::LockTimeout(name.to_string(), timeout));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    fn release_lock(&self, name: &str) {
        let mut locks = self.locks.lock().unwrap();
        if let Some(file) = locks.remove(name) {
            let _ = fs2::FileExt::unlock(&file);
        }
        let _ = fs::remove_file(self.lock_path(name));
    }

    fn is_locked(&self, name: &str) -> bool {
        let lock_path = self.lock_path(name);
        if !lock_path.exists() {
            return false;
        }
        match OpenOptions::new().write(true).open(&lock_path) {
            Ok(file) => match file.try_lock_exclusive() {
                Ok(()) => {
                    let _ = fs2::FileExt::unlock(&file);
                    false
                }
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = LocalStorageAdapter::new(dir.path()).unwrap();
        store.write("a/b.txt", b"hello").unwrap();
        assert_eq!(store.read("a/b.txt").unwrap(), b"hello");
        assert!(store.exists("a/b.txt").unwrap());
    }

    #[test]
    fn path_traversal_is_rejected() {
        let dir = tempdir().unwrap();
        let store = LocalStorageAdapter::new(dir.path()).unwrap();
        let err = store.write("../escape.txt", b"x").unwrap_err();
        assert!(matches!(err, StorageError::PathEscape(_)));
    }

    #[test]
    fn delete_and_list() {
        let dir = tempdir().unwrap();
        let store = LocalStorageAdapter::new(dir.path()).unwrap();
        store.write("dir/one.txt", b"1").unwrap();
        store.write("dir/two.txt", b"2").unwrap();
        let entries = store.list("dir").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(store.delete("dir/one.txt").unwrap());
        assert!(!store.delete("dir/one.txt").unwrap());
        assert_eq!(store.list("dir").unwrap().len(), 1);
    }

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempdir().unwrap();
        let store = LocalStorageAdapter::new(dir.path()).unwrap();
        assert!(store.acquire_lock("repo", Duration::from_secs(1)).unwrap());
        assert!(store.is_locked("repo"));
        store.release_lock("repo");
        assert!(!store.is_locked("repo"));
    }

    #[test]
    fn lock_timeout_when_held() {
        let dir = tempdir().unwrap();
        let store = LocalStorageAdapter::new(dir.path()).unwrap();
        assert!(store.acquire_lock("repo", Duration::from_secs(1)).unwrap());

        let store2 = LocalStorageAdapter::new(dir.path()).unwrap();
        let err = store2
            .acquire_lock("repo", Duration::from_millis(150))
            .unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout(_, _)));
    }

    #[test]
    fn not_found_on_missing_read() {
        let dir = tempdir().unwrap();
        let store = LocalStorageAdapter::new(dir.path()).unwrap();
        let err = store.read("missing.txt").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
