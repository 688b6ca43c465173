//! Tree diff (added/deleted/modified path sets) and an optional per-blob
//! line diff. The line-diff algorithm is a plain LCS — the spec requires
//! only that it be stable and minimal, not any particular algorithm.

use memvcs_objects::{Object, ObjectKind, ObjectStore, ObjectStoreError};

use crate::tree::flatten_tree;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
}

pub fn diff_trees(
    objects: &ObjectStore,
    tree_a: &str,
    tree_b: &str,
) -> Result<TreeDiff, ObjectStoreError> {
    let a = flatten_tree(objects, tree_a)?;
    let b = flatten_tree(objects, tree_b)?;

    let mut added = Vec::new();
    let mut deleted = Vec::new();
    let mut modified = Vec::new();

    for (path, hash_b) in &b {
        match a.get(path) {
            None => added.push(path.clone()),
            Some(hash_a) if hash_a != hash_b => modified.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in a.keys() {
        if !b.contains_key(path) {
            deleted.push(path.clone());
        }
    }

    added.sort();
    deleted.sort();
    modified.sort();
    Ok(TreeDiff {
        added,
        deleted,
        modified,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineChange {
    Unchanged(String),
    Added(String),
    Removed(String),
}

/// Minimal line diff via a longest-common-subsequence table. `O(n*m)`
/// time/space — adequate for the memory-file sizes this system targets,
/// not for large binaries.
pub fn diff_blob_lines(objects: &ObjectStore, hash_a: &str, hash_b: &str) -> Result<Vec<LineChange>, ObjectStoreError> {
    let text_a = fetch_text(objects, hash_a)?;
    let text_b = fetch_text(objects, hash_b)?;
    let lines_a: Vec<&str> = text_a.lines().collect();
    let lines_b: Vec<&str> = text_b.lines().collect();

    let n = lines_a.len();
    let m = lines_b.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if lines_a[i] == lines_b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if lines_a[i] == lines_b[j] {
            out.push(LineChange::Unchanged(lines_a[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(LineChange::Removed(lines_a[i].to_string()));
            i += 1;
        } else {
            out.push(LineChange::Added(lines_b[j].to_string()));
            j += 1;
        }
    }
    while i < n {
        out.push(LineChange::Removed(lines_a[i].to_string()));
        i += 1;
    }
    while j < m {
        out.push(LineChange::Added(lines_b[j].to_string()));
        j += 1;
    }
    Ok(out)
}

fn fetch_text(objects: &ObjectStore, hash: &str) -> Result<String, ObjectStoreError> {
    let object = objects.get(ObjectKind::Blob, hash)?;
    let Object::Blob(bytes) = object else {
        return Err(ObjectStoreError::Integrity(format!("{hash} is not a blob")));
    };
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagedEntry;
    use crate::tree::build_tree_from_index;
    use memvcs_storage::LocalStorageAdapter;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn store() -> ObjectStore {
        let dir = tempdir().unwrap();
        let storage = LocalStorageAdapter::new(dir.path()).unwrap();
        std::mem::forget(dir);
        ObjectStore::new(Arc::new(storage))
    }

    fn tree_of(objects: &ObjectStore, files: &[(&str, &str)]) -> String {
        let mut index = BTreeMap::new();
        for (path, content) in files {
            let hash = objects.put(&Object::Blob(content.as_bytes().to_vec())).unwrap();
            index.insert(
                path.to_string(),
                StagedEntry {
                    blob_hash: hash,
                    mode: "100644".to_string(),
                },
            );
        }
        build_tree_from_index(objects, &index).unwrap()
    }

    #[test]
    fn diff_with_self_is_empty() {
        let objects = store();
        let tree = tree_of(&objects, &[("a.md", "1"), ("b.md", "2")]);
        let diff = diff_trees(&objects, &tree, &tree).unwrap();
        assert!(diff.added.is_empty() && diff.deleted.is_empty() && diff.modified.is_empty());
    }

    #[test]
    fn diff_is_inverse_at_set_level() {
        let objects = store();
        let tree_a = tree_of(&objects, &[("a.md", "1"), ("b.md", "2")]);
        let tree_b = tree_of(&objects, &[("a.md", "1-changed"), ("c.md", "3")]);

        let forward = diff_trees(&objects, &tree_a, &tree_b).unwrap();
        let backward = diff_trees(&objects, &tree_b, &tree_a).unwrap();

        assert_eq!(forward.added, vec!["c.md".to_string()]);
        assert_eq!(backward.deleted, vec!["c.md".to_string()]);
        assert_eq!(forward.deleted, vec!["b.md".to_string()]);
        assert_eq!(backward.added, vec!["b.md".to_string()]);
        assert_eq!(forward.modified, backward.modified);
    }

    #[test]
    fn line_diff_is_minimal_for_single_line_change() {
        let objects = store();
        let a = objects.put(&Object::Blob(b"one\ntwo\nthree".to_vec())).unwrap();
        let b = objects.put(&Object::Blob(b"one\nTWO\nthree".to_vec())).unwrap();
        let changes = diff_blob_lines(&objects, &a, &b).unwrap();
        let added = changes.iter().filter(|c| matches!(c, LineChange::Added(_))).count();
        let removed = changes.iter().filter(|c| matches!(c, LineChange::Removed(_))).count();
        assert_eq!(added, 1);
        assert_eq!(removed, 1);
    }
}
