//! Object kinds and their canonical (hash-stable) serialization.
//!
//! Canonical encoding is deterministic JSON: struct fields serialize in
//! declaration order and maps are `BTreeMap`s, so the same logical object
//! always yields the same bytes and thus the same content address.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The four object kinds the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
        }
    }
}

/// An entry in a `Tree`: one file or sub-tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: ObjectKind,
    pub hash: String,
    pub name: String,
    /// Directory path (relative to the tree root, empty for top-level entries).
    #[serde(default)]
    pub subpath: String,
}

/// Ordered list of directory entries. Canonical encoding sorts entries by
/// `(subpath, name)` so insertion order never affects the hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| (&a.subpath, &a.name).cmp(&(&b.subpath, &b.name)));
        let canonical = Tree { entries: sorted };
        serde_json::to_vec(&canonical).expect("tree serialization is infallible")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// `(tree_hash, parent_hashes[], author, timestamp, message, metadata_map)`.
/// Parents form a DAG; the first parent defines linear history for `log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: String,
    #[serde(default)]
    pub parents: Vec<String>,
    pub author: Author,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    pub message: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Commit {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("commit serialization is infallible")
    }

    pub fn first_parent(&self) -> Option<&str> {
        self.parents.first().map(|s| s.as_str())
    }
}

/// `(target_hash, name, tagger, timestamp, message)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub target: String,
    pub name: String,
    pub tagger: Author,
    pub timestamp: String,
    pub message: String,
}

impl Tag {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("tag serialization is infallible")
    }
}

/// A decoded object read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Commit(_) => ObjectKind::Commit,
            Object::Tag(_) => ObjectKind::Tag,
        }
    }

    /// The plaintext canonical bytes whose SHA-256 is the object's content
    /// address (I1). For a blob this is the raw content itself; for the
    /// structured kinds it is deterministic JSON.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Object::Blob(bytes) => bytes.clone(),
            Object::Tree(tree) => tree.canonical_bytes(),
            Object::Commit(commit) => commit.canonical_bytes(),
            Object::Tag(tag) => tag.canonical_bytes(),
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Object::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Object::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Object::Commit(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            Object::Tag(t) => Some(t),
            _ => None,
        }
    }

    pub fn decode(kind: ObjectKind, canonical_bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ObjectKind::Blob => Object::Blob(canonical_bytes.to_vec()),
            ObjectKind::Tree => Object::Tree(serde_json::from_slice(canonical_bytes)?),
            ObjectKind::Commit => Object::Commit(serde_json::from_slice(canonical_bytes)?),
            ObjectKind::Tag => Object::Tag(serde_json::from_slice(canonical_bytes)?),
        })
    }
}
