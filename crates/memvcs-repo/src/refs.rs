//! Reference namespace: HEAD, branches, tags, and the reflog.
//!
//! Stateless over a storage adapter, mirroring `memvcs-integrity`'s
//! `merkle`/`privacy` modules: every operation takes the storage handle it
//! needs rather than caching it, since refs are read-modify-written under
//! the repository lock (§5) and must always see the latest on-disk state.

use chrono::Utc;
use memvcs_objects::ObjectStore;
use memvcs_storage::{StorageAdapter, StorageError};
use thiserror::Error;

use crate::walk::list_files_recursive;

const HEAD_PATH: &str = "HEAD";
const MIN_SHORT_HASH: usize = 4;
const FULL_HASH_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum RefsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("revision not found: {0}")]
    NotFound(String),
    #[error("short hash {0} is ambiguous: matches {1:?}")]
    Ambiguous(String, Vec<String>),
    #[error("invalid reference: {0}")]
    InvalidRef(String),
    #[error("branch already exists: {0}")]
    AlreadyExists(String),
    #[error("cannot delete checked-out branch: {0}")]
    BranchCheckedOut(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Symbolic(String),
    Detached(String),
}

fn branch_path(name: &str) -> String {
    format!("refs/heads/{name}")
}

fn tag_path(name: &str) -> String {
    format!("refs/tags/{name}")
}

fn reflog_path(ref_name: &str) -> String {
    format!("logs/{ref_name}")
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Read the current `HEAD`. Symbolic HEAD (`ref: refs/heads/<branch>`) is
/// the normal case; a bare 64-hex value means a detached checkout.
pub fn read_head(storage: &dyn StorageAdapter) -> Result<Head, RefsError> {
    let bytes = storage
        .read(HEAD_PATH)
        .map_err(|e| match e {
            StorageError::NotFound(_) => RefsError::NotFound("HEAD".into()),
            other => other.into(),
        })?;
    let content = String::from_utf8_lossy(&bytes).trim().to_string();
    if let Some(branch) = content.strip_prefix("ref: refs/heads/") {
        Ok(Head::Symbolic(branch.to_string()))
    } else if is_hex(&content) && content.len() == FULL_HASH_LEN {
        Ok(Head::Detached(content))
    } else {
        Err(RefsError::InvalidRef(format!("malformed HEAD: {content}")))
    }
}

fn write_head(storage: &dyn StorageAdapter, head: &Head) -> Result<(), RefsError> {
    let content = match head {
        Head::Symbolic(branch) => format!("ref: refs/heads/{branch}"),
        Head::Detached(hash) => hash.clone(),
    };
    storage.write(HEAD_PATH, content.as_bytes())?;
    Ok(())
}

pub fn set_head_branch(storage: &dyn StorageAdapter, branch: &str) -> Result<(), RefsError> {
    write_head(storage, &Head::Symbolic(branch.to_string()))
}

pub fn set_head_detached(storage: &dyn StorageAdapter, commit_hash: &str) -> Result<(), RefsError> {
    write_head(storage, &Head::Detached(commit_hash.to_string()))
}

pub fn current_branch(storage: &dyn StorageAdapter) -> Result<Option<String>, RefsError> {
    match read_head(storage)? {
        Head::Symbolic(branch) => Ok(Some(branch)),
        Head::Detached(_) => Ok(None),
    }
}

/// Hash that `HEAD` currently points at, or `None` on a fresh repository
/// whose initial branch has not received a commit yet.
pub fn head_commit(storage: &dyn StorageAdapter) -> Result<Option<String>, RefsError> {
    match read_head(storage)? {
        Head::Detached(hash) => Ok(Some(hash)),
        Head::Symbolic(branch) => read_branch(storage, &branch),
    }
}

pub fn read_branch(storage: &dyn StorageAdapter, name: &str) -> Result<Option<String>, RefsError> {
    match storage.read(&branch_path(name)) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn read_tag(storage: &dyn StorageAdapter, name: &str) -> Result<Option<String>, RefsError> {
    match storage.read(&tag_path(name)) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn branch_exists(storage: &dyn StorageAdapter, name: &str) -> Result<bool, RefsError> {
    Ok(storage.exists(&branch_path(name))?)
}

/// Append a `(old, new, who, when, reason)` line to `logs/<ref_name>` and
/// atomically replace the ref file. `old_hash` is an empty string for a
/// ref's first write.
pub fn update_ref(
    storage: &dyn StorageAdapter,
    ref_path: &str,
    ref_name_for_log: &str,
    old_hash: &str,
    new_hash: &str,
    who: &str,
    reason: &str,
) -> Result<(), RefsError> {
    storage.write(ref_path, new_hash.as_bytes())?;
    let when = Utc::now().to_rfc3339();
    let line = format!("{old_hash} {new_hash} {who} {when} {reason}\n");
    let log_path = reflog_path(ref_name_for_log);
    let mut existing = match storage.read(&log_path) {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    existing.extend_from_slice(line.as_bytes());
    storage.write(&log_path, &existing)?;
    Ok(())
}

pub fn update_branch(
    storage: &dyn StorageAdapter,
    branch: &str,
    new_hash: &str,
    who: &str,
    reason: &str,
) -> Result<(), RefsError> {
    let old_hash = read_branch(storage, branch)?.unwrap_or_default();
    update_ref(
        storage,
        &branch_path(branch),
        &format!("refs/heads/{branch}"),
        &old_hash,
        new_hash,
        who,
        reason,
    )
}

pub fn create_branch(storage: &dyn StorageAdapter, name: &str, at_hash: &str) -> Result<(), RefsError> {
    if branch_exists(storage, name)? {
        return Err(RefsError::AlreadyExists(name.to_string()));
    }
    update_branch(storage, name, at_hash, "system", &format!("branch: created {name}"))
}

pub fn delete_branch(storage: &dyn StorageAdapter, name: &str) -> Result<(), RefsError> {
    if current_branch(storage)?.as_deref() == Some(name) {
        return Err(RefsError::BranchCheckedOut(name.to_string()));
    }
    storage.delete(&branch_path(name))?;
    Ok(())
}

pub fn create_tag(
    storage: &dyn StorageAdapter,
    name: &str,
    target_hash: &str,
    who: &str,
) -> Result<(), RefsError> {
    if read_tag(storage, name)?.is_some() {
        return Err(RefsError::AlreadyExists(name.to_string()));
    }
    update_ref(
        storage,
        &tag_path(name),
        &format!("refs/tags/{name}"),
        "",
        target_hash,
        who,
        &format!("tag: created {name}"),
    )
}

fn find_commits_by_prefix(
    storage: &dyn StorageAdapter,
    objects: &ObjectStore,
    prefix: &str,
) -> Result<Vec<String>, RefsError> {
    let _ = objects;
    let mut matches = Vec::new();
    for path in list_files_recursive(storage, "objects/commit")? {
        if let Some(hash) = path.rsplit('/').next() {
            let dir = path.rsplit('/').nth(1).unwrap_or("");
            let full = format!("{dir}{hash}");
            if full.starts_with(prefix) {
                matches.push(full);
            }
        }
    }
    Ok(matches)
}

/// Resolve `HEAD`, `HEAD~N`, a branch name, a tag name, or a (possibly
/// abbreviated, minimum 4 hex chars) commit hash to a full 64-hex commit
/// hash, walking first-parent links for `HEAD~N`.
pub fn resolve(
    storage: &dyn StorageAdapter,
    objects: &ObjectStore,
    ref_or_hash: &str,
) -> Result<String, RefsError> {
    if ref_or_hash == "HEAD" {
        return head_commit(storage)?.ok_or_else(|| RefsError::NotFound("HEAD".into()));
    }
    if let Some(rest) = ref_or_hash.strip_prefix("HEAD~") {
        let n: usize = rest
            .parse()
            .map_err(|_| RefsError::InvalidRef(ref_or_hash.to_string()))?;
        let mut hash = head_commit(storage)?.ok_or_else(|| RefsError::NotFound("HEAD".into()))?;
        for _ in 0..n {
            let commit = objects
                .get(memvcs_objects::ObjectKind::Commit, &hash)
                .map_err(|_| RefsError::NotFound(ref_or_hash.to_string()))?;
            let commit = commit
                .as_commit()
                .ok_or_else(|| RefsError::InvalidRef(hash.clone()))?;
            hash = commit
                .first_parent()
                .ok_or_else(|| RefsError::NotFound(ref_or_hash.to_string()))?
                .to_string();
        }
        return Ok(hash);
    }
    if let Some(hash) = read_branch(storage, ref_or_hash)? {
        return Ok(hash);
    }
    if let Some(hash) = read_tag(storage, ref_or_hash)? {
        return Ok(hash);
    }
    if is_hex(ref_or_hash) && ref_or_hash.len() == FULL_HASH_LEN {
        let present = objects
            .has(memvcs_objects::ObjectKind::Commit, ref_or_hash)
            .map_err(|_| RefsError::NotFound(ref_or_hash.to_string()))?;
        if present {
            return Ok(ref_or_hash.to_string());
        }
        return Err(RefsError::NotFound(ref_or_hash.to_string()));
    }
    if is_hex(ref_or_hash) && ref_or_hash.len() >= MIN_SHORT_HASH && ref_or_hash.len() < FULL_HASH_LEN {
        let matches = find_commits_by_prefix(storage, objects, ref_or_hash)?;
        return match matches.len() {
            0 => Err(RefsError::NotFound(ref_or_hash.to_string())),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(RefsError::Ambiguous(ref_or_hash.to_string(), matches)),
        };
    }
    Err(RefsError::NotFound(ref_or_hash.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use tempfile::tempdir;

    fn storage() -> LocalStorageAdapter {
        let dir = tempdir().unwrap();
        let storage = LocalStorageAdapter::new(dir.path()).unwrap();
        std::mem::forget(dir);
        storage
    }

    #[test]
    fn fresh_head_points_at_main_with_no_commit() {
        let storage = storage();
        set_head_branch(&storage, "main").unwrap();
        assert_eq!(current_branch(&storage).unwrap(), Some("main".to_string()));
        assert_eq!(head_commit(&storage).unwrap(), None);
    }

    #[test]
    fn branch_create_reject_duplicate_and_reflog_appends() {
        let storage = storage();
        let hash = "a".repeat(64);
        create_branch(&storage, "main", &hash).unwrap();
        assert!(matches!(
            create_branch(&storage, "main", &hash),
            Err(RefsError::AlreadyExists(_))
        ));
        let log = storage.read("logs/refs/heads/main").unwrap();
        assert!(String::from_utf8_lossy(&log).contains(&hash));
    }

    #[test]
    fn detached_head_cannot_be_deleted_as_branch() {
        let storage = storage();
        let hash = "b".repeat(64);
        create_branch(&storage, "main", &hash).unwrap();
        set_head_branch(&storage, "main").unwrap();
        assert!(matches!(
            delete_branch(&storage, "main"),
            Err(RefsError::BranchCheckedOut(_))
        ));
        set_head_detached(&storage, &hash).unwrap();
        delete_branch(&storage, "main").unwrap();
    }
}
