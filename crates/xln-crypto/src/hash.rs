use once_cell::sync::Lazy;
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Keccak256};

/// Keccak-256 of arbitrary bytes → 32-byte array. Matches Solidity's
/// `keccak256`, so function selectors and frame hashes line up with the
/// jurisdiction contracts.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of arbitrary bytes → 32-byte array. WAL integrity only.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

static GENESIS_PREV_HASH: Lazy<[u8; 32]> = Lazy::new(|| keccak256(b"xln-genesis"));

/// The fixed `prev_frame_hash` sentinel of every genesis account frame.
/// Distinct from the zero hash so an uninitialised field can never pass
/// for a valid chain anchor.
pub fn genesis_prev_hash() -> [u8; 32] {
    *GENESIS_PREV_HASH
}
