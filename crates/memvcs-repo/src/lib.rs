//! Refs, staging, and repository orchestration on top of the
//! content-addressed object store: `add -> stage -> commit -> checkout ->
//! log -> diff`, with path safety and an atomic-object-writes-before-refs
//! failure policy.

pub mod diff;
pub mod refs;
pub mod repository;
pub mod staging;
pub mod tree;
mod walk;

pub use diff::{diff_blob_lines, diff_trees, LineChange, TreeDiff};
pub use refs::{Head, RefsError};
pub use repository::{CommitRecord, RepoError, Repository};
pub use staging::{StagedEntry, StagingArea, StagingError, StatusReport};
pub use tree::{build_tree_from_index, flatten_tree};
