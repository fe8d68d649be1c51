//! Core identifiers, protocol constants and the consensus error family
//! shared by every layer of the XLN kernel.

pub mod constants;
pub mod error;
pub mod types;

pub use error::ConsensusError;
pub use types::{AccountKey, EntityId, Hash32, SignerId, TokenId};
