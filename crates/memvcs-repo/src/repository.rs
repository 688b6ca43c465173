//! Repository orchestration: add -> stage -> commit -> checkout -> log ->
//! diff, under a single exclusive repository lock for every write (§5).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use memvcs_objects::{Author, Commit, Object, ObjectKind, ObjectStore, ObjectStoreError};
use memvcs_storage::{StorageAdapter, StorageError};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::diff::{diff_trees, TreeDiff};
use crate::refs::{self, RefsError};
use crate::staging::{StagingArea, StagingError, StatusReport};
use crate::tree::{build_tree_from_index, flatten_tree};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const REPO_LOCK_NAME: &str = "repo";

#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Object(#[from] ObjectStoreError),
    #[error(transparent)]
    Refs(#[from] RefsError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("checkout would overwrite dirty path: {0}")]
    Conflict(String),
    #[error("revision not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub hash: String,
    pub commit: Commit,
}

/// Ties the object store, refs, and staging index together against two
/// storage roots: `meta` (`.mem/`, internal state) and `work` (`current/`,
/// the checked-out working tree).
pub struct Repository {
    meta: Arc<dyn StorageAdapter>,
    work: Arc<dyn StorageAdapter>,
    objects: ObjectStore,
}

struct LockGuard<'a> {
    storage: &'a dyn StorageAdapter,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.storage.release_lock(REPO_LOCK_NAME);
    }
}

impl Repository {
    pub fn new(meta: Arc<dyn StorageAdapter>, work: Arc<dyn StorageAdapter>) -> Self {
        let objects = ObjectStore::new(meta.clone());
        Self { meta, work, objects }
    }

    pub fn with_sealer(
        meta: Arc<dyn StorageAdapter>,
        work: Arc<dyn StorageAdapter>,
        sealer: Arc<dyn memvcs_objects::PayloadSealer>,
    ) -> Self {
        let objects = ObjectStore::with_sealer(meta.clone(), sealer);
        Self { meta, work, objects }
    }

    /// Create a fresh repository: `HEAD` symbolically points at
    /// `default_branch`, which does not yet exist (no commits).
    pub fn init(meta: Arc<dyn StorageAdapter>, work: Arc<dyn StorageAdapter>, default_branch: &str) -> Result<Self, RepoError> {
        refs::set_head_branch(meta.as_ref(), default_branch)?;
        Ok(Self::new(meta, work))
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// The `current/` working-tree storage root. Exposed for callers that
    /// need to read or write files outside the staged-add/commit flow,
    /// such as the distillation pipeline's consolidated-file writes.
    pub fn work_storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.work
    }

    /// The `.mem/` internal-state storage root (objects, refs, staging,
    /// privacy budget, Merkle snapshots).
    pub fn meta_storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.meta
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool, RepoError> {
        Ok(refs::branch_exists(self.meta.as_ref(), name)?)
    }

    fn lock(&self) -> Result<LockGuard<'_>, RepoError> {
        let obtained = self.meta.acquire_lock(REPO_LOCK_NAME, DEFAULT_LOCK_TIMEOUT)?;
        if !obtained {
            return Err(StorageError::LockTimeout(REPO_LOCK_NAME.to_string(), DEFAULT_LOCK_TIMEOUT).into());
        }
        Ok(LockGuard { storage: self.meta.as_ref() })
    }

    pub fn head_commit(&self) -> Result<Option<String>, RepoError> {
        Ok(refs::head_commit(self.meta.as_ref())?)
    }

    pub fn current_branch(&self) -> Result<Option<String>, RepoError> {
        Ok(refs::current_branch(self.meta.as_ref())?)
    }

    fn head_tree(&self) -> Result<Option<String>, RepoError> {
        let Some(commit_hash) = self.head_commit()? else {
            return Ok(None);
        };
        let commit = self.objects.get(ObjectKind::Commit, &commit_hash)?;
        Ok(commit.as_commit().map(|c| c.tree.clone()))
    }

    pub fn resolve(&self, revision: &str) -> Result<String, RepoError> {
        Ok(refs::resolve(self.meta.as_ref(), &self.objects, revision)?)
    }

    pub fn add(&self, path: &str) -> Result<String, RepoError> {
        let _lock = self.lock()?;
        let mut staging = StagingArea::load(self.meta.as_ref())?;
        let hash = staging.add_file(self.meta.as_ref(), self.work.as_ref(), &self.objects, path)?;
        Ok(hash)
    }

    pub fn add_directory(&self, dir: &str) -> Result<Vec<String>, RepoError> {
        let _lock = self.lock()?;
        let mut staging = StagingArea::load(self.meta.as_ref())?;
        Ok(staging.add_directory(self.meta.as_ref(), self.work.as_ref(), &self.objects, dir)?)
    }

    pub fn unstage(&self, path: &str) -> Result<bool, RepoError> {
        let _lock = self.lock()?;
        let mut staging = StagingArea::load(self.meta.as_ref())?;
        Ok(staging.remove(self.meta.as_ref(), path)?)
    }

    pub fn status(&self) -> Result<StatusReport, RepoError> {
        let staging = StagingArea::load(self.meta.as_ref())?;
        let head_tree = self.head_tree()?;
        Ok(staging.status(self.work.as_ref(), &self.objects, head_tree.as_deref())?)
    }

    /// `commit(message, metadata)`. A no-op (returns `Ok(None)`) when the
    /// staging index is empty, per the spec's explicit "empty commit is
    /// not an error" rule.
    pub fn commit(
        &self,
        message: &str,
        author: Author,
        metadata: BTreeMap<String, Value>,
    ) -> Result<Option<String>, RepoError> {
        let _lock = self.lock()?;
        let mut staging = StagingArea::load(self.meta.as_ref())?;
        if staging.is_empty() {
            return Ok(None);
        }
        let tree_hash = build_tree_from_index(&self.objects, staging.entries())?;
        let parent = refs::head_commit(self.meta.as_ref())?;
        let commit = Commit {
            tree: tree_hash,
            parents: parent.clone().into_iter().collect(),
            author,
            timestamp: chrono::Utc::now().to_rfc3339(),
            message: message.to_string(),
            metadata,
        };
        let commit_hash = self.objects.put(&Object::Commit(commit))?;

        let branch = refs::current_branch(self.meta.as_ref())?
            .ok_or_else(|| RepoError::Conflict("cannot commit with a detached HEAD".into()))?;
        let short_message: String = message.chars().take(40).collect();
        refs::update_branch(
            self.meta.as_ref(),
            &branch,
            &commit_hash,
            "system",
            &format!("commit: {short_message}"),
        )?;
        staging.clear(self.meta.as_ref())?;
        info!(commit_hash = %commit_hash, branch = %branch, "committed");
        Ok(Some(commit_hash))
    }

    /// Materialize `target`'s tree into `current/` and move `HEAD`.
    /// Without `force`, refuses if the working tree has any path dirty
    /// relative to `HEAD` that the checkout would also need to touch.
    pub fn checkout(&self, target: &str, force: bool) -> Result<String, RepoError> {
        let _lock = self.lock()?;
        let commit_hash = refs::resolve(self.meta.as_ref(), &self.objects, target)
            .map_err(|_| RepoError::NotFound(target.to_string()))?;
        let commit = self.objects.get(ObjectKind::Commit, &commit_hash)?;
        let commit = commit
            .as_commit()
            .ok_or_else(|| RepoError::NotFound(target.to_string()))?;
        let target_entries = flatten_tree(&self.objects, &commit.tree)?;

        if !force {
            let staging = StagingArea::load(self.meta.as_ref())?;
            let head_tree = self.head_tree()?;
            let status = staging.status(self.work.as_ref(), &self.objects, head_tree.as_deref())?;
            let dirty: Vec<String> = status
                .modified
                .iter()
                .chain(status.staged.iter())
                .cloned()
                .filter(|p| target_entries.contains_key(p))
                .collect();
            if let Some(path) = dirty.into_iter().next() {
                return Err(RepoError::Conflict(path));
            }
        }

        // Only remove paths tracked by the tree we're switching away from;
        // untracked working-tree content (e.g. not-yet-staged episodic
        // files) is left alone, matching how a plain `git checkout` never
        // touches files it isn't tracking.
        let head_tree = self.head_tree()?;
        let head_entries = match &head_tree {
            Some(hash) => flatten_tree(&self.objects, hash)?,
            None => BTreeMap::new(),
        };
        for path in head_entries.keys() {
            if !target_entries.contains_key(path) {
                self.work.delete(path)?;
            }
        }
        for (path, blob_hash) in &target_entries {
            let object = self.objects.get(ObjectKind::Blob, blob_hash)?;
            let Object::Blob(bytes) = object else {
                return Err(RepoError::Object(ObjectStoreError::Integrity(format!(
                    "{blob_hash} is not a blob"
                ))));
            };
            self.work.write(path, &bytes)?;
        }

        if refs::branch_exists(self.meta.as_ref(), target)? {
            refs::set_head_branch(self.meta.as_ref(), target)?;
        } else {
            refs::set_head_detached(self.meta.as_ref(), &commit_hash)?;
        }
        Ok(commit_hash)
    }

    /// Walk first-parent history from `HEAD`, most recent first.
    pub fn log(&self, max: Option<usize>, since: Option<&str>) -> Result<Vec<CommitRecord>, RepoError> {
        let mut out = Vec::new();
        let mut cursor = self.head_commit()?;
        while let Some(hash) = cursor {
            if let Some(limit) = max {
                if out.len() >= limit {
                    break;
                }
            }
            let object = self.objects.get(ObjectKind::Commit, &hash)?;
            let commit = object
                .as_commit()
                .ok_or_else(|| RepoError::Object(ObjectStoreError::Integrity(format!("{hash} is not a commit"))))?
                .clone();
            if let Some(since) = since {
                if commit.timestamp.as_str() < since {
                    break;
                }
            }
            let next = commit.first_parent().map(|s| s.to_string());
            out.push(CommitRecord { hash, commit });
            cursor = next;
        }
        Ok(out)
    }

    pub fn diff(&self, a: &str, b: &str) -> Result<TreeDiff, RepoError> {
        let hash_a = self.resolve(a)?;
        let hash_b = self.resolve(b)?;
        let commit_a = self.objects.get(ObjectKind::Commit, &hash_a)?;
        let commit_b = self.objects.get(ObjectKind::Commit, &hash_b)?;
        let tree_a = &commit_a.as_commit().ok_or_else(|| RepoError::NotFound(a.to_string()))?.tree;
        let tree_b = &commit_b.as_commit().ok_or_else(|| RepoError::NotFound(b.to_string()))?.tree;
        Ok(diff_trees(&self.objects, tree_a, tree_b)?)
    }

    pub fn create_branch(&self, name: &str, at: &str) -> Result<(), RepoError> {
        let _lock = self.lock()?;
        let hash = self.resolve(at)?;
        Ok(refs::create_branch(self.meta.as_ref(), name, &hash)?)
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), RepoError> {
        let _lock = self.lock()?;
        refs::delete_branch(self.meta.as_ref(), name)?;
        Ok(())
    }

    pub fn tag(&self, name: &str, target: &str) -> Result<(), RepoError> {
        let _lock = self.lock()?;
        let hash = self.resolve(target)?;
        Ok(refs::create_tag(self.meta.as_ref(), name, &hash, "system")?)
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        if self.meta.is_locked(REPO_LOCK_NAME) {
            warn!("repository dropped while lock was still held; releasing");
            self.meta.release_lock(REPO_LOCK_NAME);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use tempfile::tempdir;

    fn repo() -> (tempfile::TempDir, tempfile::TempDir, Repository) {
        let meta_dir = tempdir().unwrap();
        let work_dir = tempdir().unwrap();
        let meta: Arc<dyn StorageAdapter> = Arc::new(LocalStorageAdapter::new(meta_dir.path()).unwrap());
        let work: Arc<dyn StorageAdapter> = Arc::new(LocalStorageAdapter::new(work_dir.path()).unwrap());
        let repository = Repository::init(meta, work, "main").unwrap();
        (meta_dir, work_dir, repository)
    }

    fn author() -> Author {
        Author {
            name: "agent".to_string(),
            email: "agent@example.com".to_string(),
        }
    }

    #[test]
    fn scenario_s1_init_add_commit_log() {
        let (_m, work_dir, repo) = repo();
        std::fs::write(work_dir.path().join("semantic"), "").ok();
        std::fs::create_dir_all(work_dir.path().join("semantic")).unwrap();
        std::fs::write(work_dir.path().join("semantic/a.md"), "hello").unwrap();

        repo.add("semantic/a.md").unwrap();
        let hash = repo.commit("first", author(), BTreeMap::new()).unwrap().unwrap();

        let log = repo.log(None, None).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].hash, hash);

        let object = repo.objects().get(ObjectKind::Commit, &hash).unwrap();
        let commit = object.as_commit().unwrap();
        let flat = flatten_tree(repo.objects(), &commit.tree).unwrap();
        assert_eq!(flat.len(), 1);
        let expected_hash = memvcs_objects::sha256_hex(b"hello");
        assert_eq!(flat.get("semantic/a.md"), Some(&expected_hash));
    }

    #[test]
    fn commit_on_empty_index_is_a_no_op() {
        let (_m, _w, repo) = repo();
        let result = repo.commit("nothing to commit", author(), BTreeMap::new()).unwrap();
        assert!(result.is_none());
        assert!(repo.head_commit().unwrap().is_none());
    }

    #[test]
    fn checkout_unknown_revision_leaves_head_untouched() {
        let (_m, work_dir, repo) = repo();
        std::fs::write(work_dir.path().join("a.md"), "v1").unwrap();
        repo.add("a.md").unwrap();
        repo.commit("first", author(), BTreeMap::new()).unwrap();
        let head_before = repo.head_commit().unwrap();

        let err = repo.checkout("does-not-exist", false).unwrap_err();
        assert!(matches!(err, RepoError::NotFound(_)));
        assert_eq!(repo.head_commit().unwrap(), head_before);
    }

    #[test]
    fn diff_with_self_is_empty_and_commits_are_inverse() {
        let (_m, work_dir, repo) = repo();
        std::fs::write(work_dir.path().join("a.md"), "v1").unwrap();
        repo.add("a.md").unwrap();
        let c1 = repo.commit("first", author(), BTreeMap::new()).unwrap().unwrap();

        std::fs::write(work_dir.path().join("a.md"), "v2").unwrap();
        repo.add("a.md").unwrap();
        let c2 = repo.commit("second", author(), BTreeMap::new()).unwrap().unwrap();

        let same = repo.diff(&c1, &c1).unwrap();
        assert!(same.added.is_empty() && same.modified.is_empty() && same.deleted.is_empty());

        let forward = repo.diff(&c1, &c2).unwrap();
        assert_eq!(forward.modified, vec!["a.md".to_string()]);
    }
}
