//! Encryption-at-rest envelope.
//!
//! A passphrase-derived key (Argon2id) seals object payloads with
//! AES-256-GCM. The salt and KDF parameters are persisted in clear in
//! `.mem/encryption.json`; the passphrase itself is never persisted, and
//! the derived key lives only in process memory for the life of the
//! process (zeroized on drop).

use std::sync::Arc;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use memvcs_objects::seal::{PayloadSealer, SealError};
use memvcs_storage::StorageAdapter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

const CONFIG_PATH: &str = "encryption.json";
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("config error: {0}")]
    Config(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error(transparent)]
    Storage(#[from] memvcs_storage::StorageError),
    #[error("encryption enabled but no passphrase available")]
    NoPassphrase,
}

/// `{ salt (hex, 16 B), time_cost, memory_cost, parallelism }` persisted at
/// init time; no key material is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub salt_hex: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            salt_hex: String::new(),
            time_cost: 3,
            memory_cost: 65536,
            parallelism: 4,
        }
    }
}

impl EncryptionConfig {
    pub fn load(storage: &dyn StorageAdapter) -> Result<Option<Self>, CryptoError> {
        match storage.read(CONFIG_PATH) {
            Ok(bytes) => {
                let cfg: EncryptionConfig = serde_json::from_slice(&bytes)
                    .map_err(|e| CryptoError::Config(format!("malformed encryption.json: {e}")))?;
                Ok(Some(cfg))
            }
            Err(memvcs_storage::StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, storage: &dyn StorageAdapter) -> Result<(), CryptoError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| CryptoError::Config(format!("serialize encryption.json: {e}")))?;
        storage.write(CONFIG_PATH, &bytes)?;
        Ok(())
    }

    fn salt_bytes(&self) -> Result<[u8; SALT_LEN], CryptoError> {
        let decoded = hex::decode(&self.salt_hex)
            .map_err(|e| CryptoError::Config(format!("invalid salt hex: {e}")))?;
        decoded
            .try_into()
            .map_err(|_| CryptoError::Config("salt must be 16 bytes".into()))
    }
}

/// Create a new encryption config with a random salt and persist it.
pub fn init_encryption(
    storage: &dyn StorageAdapter,
    time_cost: u32,
    memory_cost: u32,
    parallelism: u32,
) -> Result<EncryptionConfig, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let config = EncryptionConfig {
        salt_hex: hex::encode(salt),
        time_cost,
        memory_cost,
        parallelism,
    };
    config.save(storage)?;
    info!("initialized encryption config");
    Ok(config)
}

fn derive_key(passphrase: &[u8], config: &EncryptionConfig) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let salt = config.salt_bytes()?;
    let params = argon2::Params::new(
        config.memory_cost,
        config.time_cost,
        config.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase, &salt, key.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Where the passphrase comes from: an environment variable (read once, on
/// first use) or a value supplied directly by the caller.
enum PassphraseSource {
    Env(String),
    Fixed(Zeroizing<Vec<u8>>),
}

/// Process-scoped key cache plus AEAD sealing, implementing `PayloadSealer`
/// for `memvcs-objects::ObjectStore`. Once derived, the key is held in
/// memory for the life of the process and discarded (zeroized) at drop; it
/// is never written to disk, telemetry, or logs.
pub struct CryptoEnvelope {
    config: EncryptionConfig,
    source: PassphraseSource,
    key: Mutex<Option<Zeroizing<[u8; KEY_LEN]>>>,
}

impl CryptoEnvelope {
    pub fn from_env(config: EncryptionConfig, env_var: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            config,
            source: PassphraseSource::Env(env_var.into()),
            key: Mutex::new(None),
        })
    }

    pub fn with_passphrase(config: EncryptionConfig, passphrase: &str) -> Arc<Self> {
        Arc::new(Self {
            config,
            source: PassphraseSource::Fixed(Zeroizing::new(passphrase.as_bytes().to_vec())),
            key: Mutex::new(None),
        })
    }

    fn get_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        let mut guard = self.key.lock().unwrap();
        if let Some(key) = guard.as_ref() {
            return Ok(Zeroizing::new(**key));
        }
        let passphrase = match &self.source {
            PassphraseSource::Fixed(p) => p.clone(),
            PassphraseSource::Env(var) => {
                let value = std::env::var(var).map_err(|_| CryptoError::NoPassphrase)?;
                Zeroizing::new(value.into_bytes())
            }
        };
        let key = derive_key(&passphrase, &self.config)?;
        *guard = Some(Zeroizing::new(*key));
        Ok(key)
    }
}

impl PayloadSealer for CryptoEnvelope {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        let key = self.get_key().map_err(|e| {
            warn!(error = %e, "seal failed to obtain key");
            SealError::NoKey
        })?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| SealError::NoKey)?;
        let mut iv_bytes = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SealError::AuthenticationFailed)?;
        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
        if sealed.len() < IV_LEN + TAG_LEN {
            return Err(SealError::TooShort);
        }
        let key = self.get_key().map_err(|_| SealError::NoKey)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| SealError::NoKey)?;
        let (iv, ciphertext) = sealed.split_at(IV_LEN);
        let nonce = Nonce::from_slice(iv);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SealError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use tempfile::tempdir;

    fn config() -> EncryptionConfig {
        let dir = tempdir().unwrap();
        let storage = LocalStorageAdapter::new(dir.path()).unwrap();
        init_encryption(&storage, 2, 1024, 1).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let envelope = CryptoEnvelope::with_passphrase(config(), "pw");
        let sealed = envelope.seal(b"secret").unwrap();
        assert!(sealed.len() >= IV_LEN + TAG_LEN);
        let opened = envelope.unseal(&sealed).unwrap();
        assert_eq!(opened, b"secret");
    }

    #[test]
    fn same_plaintext_yields_distinct_ciphertexts() {
        let envelope = CryptoEnvelope::with_passphrase(config(), "pw");
        let a = envelope.seal(b"secret").unwrap();
        let b = envelope.seal(b"secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_passphrase_fails_loudly() {
        let cfg = config();
        let sealed = CryptoEnvelope::with_passphrase(cfg.clone(), "right")
            .seal(b"secret")
            .unwrap();
        let wrong = CryptoEnvelope::with_passphrase(cfg, "wrong");
        let err = wrong.unseal(&sealed).unwrap_err();
        assert!(matches!(err, SealError::AuthenticationFailed));
    }

    #[test]
    fn too_short_payload_is_rejected() {
        let envelope = CryptoEnvelope::with_passphrase(config(), "pw");
        let err = envelope.unseal(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, SealError::TooShort));
    }

    #[test]
    fn bit_flip_breaks_authentication() {
        let envelope = CryptoEnvelope::with_passphrase(config(), "pw");
        let mut sealed = envelope.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        let err = envelope.unseal(&sealed).unwrap_err();
        assert!(matches!(err, SealError::AuthenticationFailed));
    }
}
