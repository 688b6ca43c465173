use sha2::{Digest, Sha256};

/// `hex(SHA-256(bytes))`. Used for both object content addresses and Merkle
/// leaves, so the whole crate family shares one hash primitive.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// True if `s` looks like a full 64-hex-char SHA-256 digest.
pub fn is_full_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
