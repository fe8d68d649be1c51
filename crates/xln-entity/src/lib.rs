//! Entity-level BFT consensus: one replicated state machine per entity,
//! one [`replica::EntityReplica`] per `(entity, signer)` slot.
//!
//! The frame lifecycle is ADD_TX → PROPOSE → PRECOMMIT → COMMIT with a
//! shares-weighted quorum and CometBFT-style frame locking. Bilateral
//! account machines live inside the entity state and advance through
//! ordinary entity txs, so every validator replays the same account
//! history.

pub mod input;
pub mod jurisdiction;
pub mod replica;
pub mod state;
pub mod tx;

pub use input::{EntityInput, ProposedEntityFrame};
pub use jurisdiction::{JurisdictionEvent, JurisdictionIntent};
pub use replica::{Diagnostic, EntityOutbox, EntityReplica};
pub use state::{ConsensusConfig, ConsensusMode, DomainState, EntityState};
pub use tx::{EntityOp, EntityTx};
