//! Recursive Merkle hash of a directory, with stored snapshots, verify-
//! against-stored diffing, and inclusion proofs.
//!
//! Grounded on the teacher's `bpi-merkle` crate (`MerkleNode`/`MerkleTree`/
//! `MerkleProof`, duplicate-last-leaf balancing), retargeted from
//! domain-separated BLAKE3 hashing to plain SHA-256 so Merkle leaves share
//! one hash primitive with object content addresses (I1).

use std::collections::BTreeMap;

use chrono::Utc;
use memvcs_storage::StorageAdapter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const SNAPSHOT_PATH: &str = "merkle_root.json";

#[derive(Error, Debug)]
pub enum MerkleError {
    #[error("cannot snapshot an empty directory")]
    EmptyTree,
    #[error("leaf index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error(transparent)]
    Storage(#[from] memvcs_storage::StorageError),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut combined = Vec::with_capacity(left.len() + right.len());
    combined.extend_from_slice(left.as_bytes());
    combined.extend_from_slice(right.as_bytes());
    sha256_hex(&combined)
}

/// Recursively enumerate regular files under `root` (relative paths,
/// lexicographic order), using only the `StorageAdapter` contract so this
/// works identically against any backend.
pub fn list_files_recursive(
    storage: &dyn StorageAdapter,
    root: &str,
) -> Result<Vec<String>, MerkleError> {
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

/// A balanced binary Merkle tree over an ordered set of leaf hashes. Odd
/// levels duplicate their last node.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
}

/// Ordered list of sibling hashes from leaf to root, each tagged with
/// whether the sibling sits to the claimant's right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf_hash: String,
    pub siblings: Vec<(String, bool)>,
}

impl MerkleProof {
    pub fn verify(&self, root: &str) -> bool {
        let mut current = self.leaf_hash.clone();
        for (sibling, is_right_sibling) in &self.siblings {
            current = if *is_right_sibling {
                hash_pair(&current, sibling)
            } else {
                hash_pair(sibling, &current)
            };
        }
        current == root
    }
}

impl MerkleTree {
    pub fn build(leaves: &[String]) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        let mut level = leaves.to_vec();
        if level.len() % 2 == 1 {
            level.push(level.last().unwrap().clone());
        }
        let mut levels = vec![level.clone()];
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(hash_pair(left, right));
            }
            if next.len() % 2 == 1 && next.len() > 1 {
                next.push(next.last().unwrap().clone());
            }
            levels.push(next.clone());
            level = next;
        }
        Ok(Self { levels })
    }

    pub fn root(&self) -> &str {
        self.levels.last().unwrap().first().unwrap()
    }

    pub fn proof(&self, mut index: usize) -> Result<MerkleProof, MerkleError> {
        let leaves = &self.levels[0];
        if index >= leaves.len() {
            return Err(MerkleError::IndexOutOfBounds {
                index,
                len: leaves.len(),
            });
        }
        let leaf_index = index;
        let leaf_hash = leaves[index].clone();
        let mut siblings = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right_sibling = index % 2 == 0;
            let sibling_index = if is_right_sibling { index + 1 } else { index - 1 };
            let sibling = level
                .get(sibling_index)
                .cloned()
                .unwrap_or_else(|| level[index].clone());
            siblings.push((sibling, is_right_sibling));
            index /= 2;
        }
        Ok(MerkleProof {
            leaf_index,
            leaf_hash,
            siblings,
        })
    }
}

/// `{ root, file_count, computed_at, per_file: path -> leaf_hash }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleSnapshot {
    pub root: String,
    pub file_count: usize,
    pub computed_at: String,
    pub per_file: BTreeMap<String, String>,
}

/// Result of comparing the current tree against a stored snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub verified: bool,
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

fn compute(storage: &dyn StorageAdapter, root_dir: &str) -> Result<MerkleSnapshot, MerkleError> {
    let paths = list_files_recursive(storage, root_dir)?;
    let mut per_file = BTreeMap::new();
    for path in &paths {
        let bytes = storage.read(path)?;
        per_file.insert(path.clone(), sha256_hex(&bytes));
    }
    let leaves: Vec<String> = paths.iter().map(|p| per_file[p].clone()).collect();
    let root = if leaves.is_empty() {
        sha256_hex(b"")
    } else {
        MerkleTree::build(&leaves)?.root().to_string()
    };
    Ok(MerkleSnapshot {
        root,
        file_count: paths.len(),
        computed_at: Utc::now().to_rfc3339(),
        per_file,
    })
}

/// `snapshot(root_dir)`: enumerate, hash leaves, build the tree, persist the
/// result to `.mem/merkle_root.json`.
pub fn snapshot(storage: &dyn StorageAdapter, root_dir: &str) -> Result<MerkleSnapshot, MerkleError> {
    let snap = compute(storage, root_dir)?;
    let bytes = serde_json::to_vec_pretty(&snap)
        .map_err(|e| MerkleError::Malformed(format!("serialize snapshot: {e}")))?;
    storage.write(SNAPSHOT_PATH, &bytes)?;
    Ok(snap)
}

pub fn load_snapshot(storage: &dyn StorageAdapter) -> Result<Option<MerkleSnapshot>, MerkleError> {
    match storage.read(SNAPSHOT_PATH) {
        Ok(bytes) => {
            let snap = serde_json::from_slice(&bytes)
                .map_err(|e| MerkleError::Malformed(format!("merkle_root.json: {e}")))?;
            Ok(Some(snap))
        }
        Err(memvcs_storage::StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `verify(root_dir)`: re-run snapshot over the current tree and classify
/// each path into `modified`/`added`/`deleted` relative to the stored
/// snapshot. `verified` is true iff all three sets are empty and the
/// recomputed root equals the stored root.
pub fn verify(storage: &dyn StorageAdapter, root_dir: &str) -> Result<VerifyReport, MerkleError> {
    let stored = match load_snapshot(storage)? {
        Some(s) => s,
        None => {
            let current = compute(storage, root_dir)?;
            return Ok(VerifyReport {
                verified: current.per_file.is_empty(),
                modified: Vec::new(),
                added: current.per_file.into_keys().collect(),
                deleted: Vec::new(),
            });
        }
    };
    let current = compute(storage, root_dir)?;

    let mut modified = Vec::new();
    let mut added = Vec::new();
    let mut deleted = Vec::new();

    for (path, leaf) in &current.per_file {
        match stored.per_file.get(path) {
            Some(stored_leaf) if stored_leaf != leaf => modified.push(path.clone()),
            Some(_) => {}
            None => added.push(path.clone()),
        }
    }
    for path in stored.per_file.keys() {
        if !current.per_file.contains_key(path) {
            deleted.push(path.clone());
        }
    }
    modified.sort();
    added.sort();
    deleted.sort();

    let verified =
        modified.is_empty() && added.is_empty() && deleted.is_empty() && current.root == stored.root;

    Ok(VerifyReport {
        verified,
        modified,
        added,
        deleted,
    })
}
