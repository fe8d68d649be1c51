//! Bilateral account consensus: the 2-of-2 state machine each pair of
//! entities runs over a shared per-token delta table.
//!
//! Every mutation travels as a hash-chained [`frame::AccountFrame`]
//! proposed by one party and countersigned by the other; the RCPAN credit
//! invariant `−L_l ≤ Δ ≤ C + L_r` is enforced on every affected token
//! before a frame may exist.

pub mod delta;
pub mod frame;
pub mod machine;
pub mod subcontract;
pub mod tx;
pub mod wire;

pub use delta::{CapacityPair, Delta};
pub use frame::AccountFrame;
pub use machine::{AccountAction, AccountMachine, PendingForward};
pub use subcontract::Subcontract;
pub use tx::AccountTx;
pub use wire::AccountInput;
