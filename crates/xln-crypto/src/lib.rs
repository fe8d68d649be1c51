//! Hashing, ECDSA and Merkle primitives for the XLN kernel.
//!
//! Keccak-256 binds frames and states to signatures (and must match the
//! EVM jurisdiction layer byte for byte); SHA-256 is used only for
//! write-ahead-log integrity checksums. Signing is secp256k1 ECDSA with
//! Ethereum-style recovery, deterministic per RFC 6979 so that replaying
//! a tick reproduces identical output bytes.

use thiserror::Error;

pub mod hash;
pub mod keypair;
pub mod merkle;

pub use hash::{genesis_prev_hash, keccak256, sha256};
pub use keypair::{Keypair, Signature};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("bad recovery id: {0}")]
    BadRecoveryId(u8),

    #[error("invalid secret key")]
    InvalidKey,
}
