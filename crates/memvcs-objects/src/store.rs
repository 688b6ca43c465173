use std::sync::Arc;

use memvcs_storage::{StorageAdapter, StorageError};
use thiserror::Error;
use tracing::{debug, trace};

use crate::hash::sha256_hex;
use crate::model::{Object, ObjectKind};
use crate::seal::{NullSealer, PayloadSealer, SealError};

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("object not found: {kind:?}/{hash}")]
    NotFound { kind: ObjectKind, hash: String },
}

impl From<SealError> for ObjectStoreError {
    fn from(e: SealError) -> Self {
        ObjectStoreError::Integrity(e.to_string())
    }
}

const ZSTD_LEVEL: i32 = 3;

/// Content-addressed storage of the four object kinds, with compression and
/// an optional AEAD sealing envelope. Content addresses are always computed
/// over the plaintext canonical bytes (I1): enabling or disabling encryption
/// never changes an object's hash.
pub struct ObjectStore {
    storage: Arc<dyn StorageAdapter>,
    sealer: Arc<dyn PayloadSealer>,
}

fn object_path(kind: ObjectKind, hash: &str) -> String {
    format!(
        "objects/{}/{}/{}",
        kind.as_str(),
        &hash[..2.min(hash.len())],
        &hash[2.min(hash.len())..]
    )
}

impl ObjectStore {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            sealer: Arc::new(NullSealer),
        }
    }

    pub fn with_sealer(storage: Arc<dyn StorageAdapter>, sealer: Arc<dyn PayloadSealer>) -> Self {
        Self { storage, sealer }
    }

    /// Compute `hash = SHA-256(canonical_bytes)`; if the object already
    /// exists, return the existing hash (dedup). Otherwise compress, seal,
    /// and write atomically.
    pub fn put(&self, object: &Object) -> Result<String, ObjectStoreError> {
        let canonical = object.canonical_bytes();
        let hash = sha256_hex(&canonical);
        let kind = object.kind();
        let path = object_path(kind, &hash);

        if self.storage.exists(&path)? {
            trace!(%hash, kind = kind.as_str(), "object already present, deduped");
            return Ok(hash);
        }

        let compressed =
            zstd::encode_all(canonical.as_slice(), ZSTD_LEVEL).map_err(|e| {
                ObjectStoreError::Integrity(format!("compression failed: {e}"))
            })?;
        let payload = self.sealer.seal(&compressed)?;
        self.storage.write(&path, &payload)?;
        debug!(%hash, kind = kind.as_str(), bytes = payload.len(), "wrote object");
        Ok(hash)
    }

    /// Reverse of `put`. Verifies the decoded payload hashes back to `hash`
    /// (integrity check). Authenticated-decryption failure surfaces as
    /// `Integrity`, never as corrupted plaintext.
    pub fn get(&self, kind: ObjectKind, hash: &str) -> Result<Object, ObjectStoreError> {
        let path = object_path(kind, hash);
        let payload = match self.storage.read(&path) {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                return Err(ObjectStoreError::NotFound {
                    kind,
                    hash: hash.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let compressed = self.sealer.unseal(&payload)?;
        let canonical = zstd::decode_all(compressed.as_slice())
            .map_err(|e| ObjectStoreError::Integrity(format!("decompression failed: {e}")))?;

        let actual_hash = sha256_hex(&canonical);
        if actual_hash != hash {
            return Err(ObjectStoreError::Integrity(format!(
                "hash mismatch: expected {hash}, computed {actual_hash}"
            )));
        }

        Object::decode(kind, &canonical)
            .map_err(|e| ObjectStoreError::Integrity(format!("corrupt canonical encoding: {e}")))
    }

    pub fn has(&self, kind: ObjectKind, hash: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.storage.exists(&object_path(kind, hash))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempdir().unwrap();
        let adapter = Arc::new(LocalStorageAdapter::new(dir.path()).unwrap());
        (dir, ObjectStore::new(adapter))
    }

    #[test]
    fn put_get_round_trip_blob() {
        let (_dir, store) = store();
        let obj = Object::Blob(b"hello".to_vec());
        let hash = store.put(&obj).unwrap();
        assert_eq!(hash, sha256_hex(b"hello"));
        let round = store.get(ObjectKind::Blob, &hash).unwrap();
        assert_eq!(round.as_blob().unwrap(), b"hello");
    }

    #[test]
    fn dedup_returns_same_hash() {
        let (_dir, store) = store();
        let obj = Object::Blob(b"same content".to_vec());
        let h1 = store.put(&obj).unwrap();
        let h2 = store.put(&obj).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store
            .get(ObjectKind::Blob, &"0".repeat(64))
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound { .. }));
    }

    #[test]
    fn has_reflects_presence() {
        let (_dir, store) = store();
        let obj = Object::Blob(b"x".to_vec());
        assert!(!store.has(ObjectKind::Blob, &sha256_hex(b"x")).unwrap());
        let hash = store.put(&obj).unwrap();
        assert!(store.has(ObjectKind::Blob, &hash).unwrap());
    }
}
