//! Content-addressed storage of four object kinds (blob, tree, commit, tag).
//!
//! Canonical serialization is deterministic so the same logical object
//! always yields the same bytes and thus the same hash (I1).

pub mod hash;
pub mod model;
pub mod seal;
pub mod store;

pub use hash::{is_full_hash, sha256_hex};
pub use model::{Author, Commit, Object, ObjectKind, Tag, Tree, TreeEntry};
pub use seal::{NullSealer, PayloadSealer, SealError};
pub use store::{ObjectStore, ObjectStoreError};
