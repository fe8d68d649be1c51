use thiserror::Error;

use xln_crypto::CryptoError;

use crate::types::{EntityId, Hash32, TokenId};

/// Consensus faults at both the entity (BFT) and account (2-of-2) layers.
///
/// Inside the tick reducer these are data values attached to the offending
/// input: remote-party faults become outbox diagnostics, local ones are
/// logged, and in neither case does an error unwind past the input that
/// caused it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // ── Account layer ────────────────────────────────────────────────────────
    #[error("replayed account input: expected counter {expected}, got {got}")]
    Replay { expected: u64, got: u64 },

    #[error("frame chain broken: expected prev {expected}, got {got}")]
    ChainBroken { expected: Hash32, got: Hash32 },

    #[error("state divergence: counterparty deltas do not match re-execution")]
    StateDivergence,

    #[error("rcpan violation on {token_id}: attempted delta {attempted_delta}")]
    RcpanViolation { token_id: TokenId, attempted_delta: i128 },

    #[error("no account with counterparty {0}")]
    UnknownAccount(EntityId),

    // ── Entity layer ─────────────────────────────────────────────────────────
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("frame hash mismatch")]
    FrameHashMismatch,

    #[error("locked on a different frame at this height")]
    LockedOnDifferentFrame,

    #[error("insufficient power: {power} of {threshold} required")]
    InsufficientPower { power: u64, threshold: u64 },

    #[error("double sign detected for signer")]
    DoubleSign,

    // ── Signature faults surfaced by either layer ────────────────────────────
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
