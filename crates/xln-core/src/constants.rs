//! ─── XLN Protocol Constants ─────────────────────────────────────────────────
//!
//! Off-chain settlement kernel parameters. The genesis sentinel hash lives
//! in `xln_crypto::genesis_prev_hash` (it is computed, not literal).

// ── Fees / routing ───────────────────────────────────────────────────────────

/// Proportional fees are expressed in parts per million of the forwarded
/// amount.
pub const FEE_SCALE: u64 = 1_000_000;

/// Maximum number of routes a path-finding query returns.
pub const MAX_ROUTES: usize = 100;

// ── Consensus ────────────────────────────────────────────────────────────────

/// Default BFT threshold for a validator set with `total_shares` voting
/// power: `⌊2·total/3⌋ + 1`. Tolerates `⌊(n−1)/3⌋` Byzantine validators
/// with equal shares.
pub const fn bft_default_threshold(total_shares: u64) -> u64 {
    2 * total_shares / 3 + 1
}

/// Logical ticks a proposal may remain uncommitted before it is abandoned
/// and proposer selection rotates. Timeouts are measured in ticks, never
/// in wall-clock time.
pub const PROPOSAL_TIMEOUT_TICKS: u64 = 10;

// ── Persistence ──────────────────────────────────────────────────────────────

/// Default snapshot cadence: one snapshot every N committed runtime ticks.
pub const SNAPSHOT_EVERY_N_HEIGHTS: u64 = 5;

// ── Entity domain state ──────────────────────────────────────────────────────

/// Maximum chat message size in bytes (enforced at consensus level).
pub const MAX_CHAT_BYTES: usize = 256;
