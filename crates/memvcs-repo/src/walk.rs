//! Recursive file enumeration over a `StorageAdapter`, shared by the
//! staging area's directory `add` and the tree builder.

use memvcs_storage::{StorageAdapter, StorageError};

pub fn list_files_recursive(storage: &dyn StorageAdapter, root: &str) -> Result<Vec<String>, StorageError> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_string()];
    while let Some(dir) = stack.pop() {
        for entry in storage.list(&dir)? {
            if entry.is_dir {
                stack.push(entry.path);
            } else {
                out.push(entry.path);
            }
        }
    }
    out.sort();
    Ok(out)
}
