//! Persistence: append-only write-ahead log plus Merkle-rooted snapshots.
//!
//! Both on-disk formats are bit-exact: canonical RLP with big-endian
//! integers, so `save(env)` produces identical bytes on every platform
//! and `load(save(env))` reconstructs the same env. The driver owns all
//! writes; the tick reducer never touches a file.

use thiserror::Error;

use xln_codec::CodecError;
use xln_core::SignerId;

pub mod snapshot;
pub mod wal;

pub use snapshot::{load_snapshot, replay, save_snapshot};
pub use wal::{append_wal, read_wal, WalRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checksum mismatch in log entry")]
    ChecksumMismatch,

    #[error("snapshot state root does not match its contents")]
    MerkleMismatch,

    #[error("log truncated: missing tick {expected}")]
    TruncatedLog { expected: u64 },

    #[error("unrecognized snapshot layout")]
    UnknownVersion,

    #[error("replay diverged from recorded outputs at tick {tick}")]
    ReplayDivergence { tick: u64 },

    #[error("no signing key for {0}")]
    MissingKey(SignerId),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
