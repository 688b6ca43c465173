//! Tamper detection (Merkle snapshot/proof) and differential-privacy
//! budget accounting for memory content outside the commit graph itself.

pub mod merkle;
pub mod privacy;

pub use merkle::{
    list_files_recursive, load_snapshot, snapshot, verify, MerkleError, MerkleProof,
    MerkleSnapshot, MerkleTree, VerifyReport,
};
pub use privacy::{gaussian_noise, noisy_count, sample_without_replacement, PrivacyBudget, PrivacyError};
