//! Optional payload sealing, implemented out-of-crate by `memvcs-crypto`.
//!
//! Keeping the trait here (rather than depending on the crypto crate)
//! avoids forcing every object-store consumer to carry the AEAD/Argon2id
//! dependency stack when encryption is disabled.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SealError {
    #[error("authenticated decryption failed")]
    AuthenticationFailed,
    #[error("sealed payload too short")]
    TooShort,
    #[error("no encryption key available")]
    NoKey,
}

/// Seals/unseals object payloads after compression, before they hit disk.
pub trait PayloadSealer: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError>;
    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError>;
}

/// No-op sealer used when encryption is disabled.
pub struct NullSealer;

impl PayloadSealer for NullSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        Ok(plaintext.to_vec())
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
        Ok(sealed.to_vec())
    }
}
