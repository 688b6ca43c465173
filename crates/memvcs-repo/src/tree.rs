//! Tree construction from the staging index, and tree flattening for
//! status/diff. A commit's tree is one flat entry list for the whole
//! `current/` root; nesting is encoded via each entry's `subpath`, not via
//! nested tree objects — this mirrors the original implementation's single
//! consolidated tree rather than git's per-directory tree chain, and keeps
//! `diff`/`status` a single-object fetch instead of a recursive walk.

use std::collections::BTreeMap;
use std::path::Path;

use memvcs_objects::{Object, ObjectKind, ObjectStore, ObjectStoreError, Tree, TreeEntry};

use crate::staging::StagedEntry;

fn split_path(path: &str) -> (String, String) {
    let p = Path::new(path);
    let name = p
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let subpath = p
        .parent()
        .map(|d| d.to_string_lossy().to_string())
        .filter(|d| !d.is_empty() && d != ".")
        .unwrap_or_default();
    (subpath, name)
}

pub fn build_tree_from_index(
    objects: &ObjectStore,
    index: &BTreeMap<String, StagedEntry>,
) -> Result<String, ObjectStoreError> {
    let mut entries: Vec<TreeEntry> = index
        .iter()
        .map(|(path, staged)| {
            let (subpath, name) = split_path(path);
            TreeEntry {
                mode: staged.mode.clone(),
                kind: ObjectKind::Blob,
                hash: staged.blob_hash.clone(),
                name,
                subpath,
            }
        })
        .collect();
    entries.sort_by(|a, b| (&a.subpath, &a.name).cmp(&(&b.subpath, &b.name)));
    let tree = Tree { entries };
    objects.put(&Object::Tree(tree))
}

/// Fetch the tree named by `tree_hash` and flatten it into `full path ->
/// blob hash`.
pub fn flatten_tree(
    objects: &ObjectStore,
    tree_hash: &str,
) -> Result<BTreeMap<String, String>, ObjectStoreError> {
    let object = objects.get(ObjectKind::Tree, tree_hash)?;
    let tree = object
        .as_tree()
        .ok_or_else(|| ObjectStoreError::Integrity(format!("{tree_hash} is not a tree")))?;
    let mut out = BTreeMap::new();
    for entry in &tree.entries {
        let full_path = if entry.subpath.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", entry.subpath, entry.name)
        };
        out.insert(full_path, entry.hash.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use tempfile::tempdir;

    fn store() -> ObjectStore {
        let dir = tempdir().unwrap();
        let storage = LocalStorageAdapter::new(dir.path()).unwrap();
        std::mem::forget(dir);
        ObjectStore::new(std::sync::Arc::new(storage))
    }

    #[test]
    fn build_and_flatten_round_trip() {
        let objects = store();
        let blob_a = objects.put(&Object::Blob(b"a".to_vec())).unwrap();
        let blob_b = objects.put(&Object::Blob(b"b".to_vec())).unwrap();
        let mut index = BTreeMap::new();
        index.insert(
            "semantic/a.md".to_string(),
            StagedEntry {
                blob_hash: blob_a.clone(),
                mode: "100644".to_string(),
            },
        );
        index.insert(
            "notes.md".to_string(),
            StagedEntry {
                blob_hash: blob_b.clone(),
                mode: "100644".to_string(),
            },
        );
        let tree_hash = build_tree_from_index(&objects, &index).unwrap();
        let flat = flatten_tree(&objects, &tree_hash).unwrap();
        assert_eq!(flat.get("semantic/a.md"), Some(&blob_a));
        assert_eq!(flat.get("notes.md"), Some(&blob_b));
        assert_eq!(flat.len(), 2);
    }
}
