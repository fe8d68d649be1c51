//! Jurisdiction boundary types. The kernel never talks to a chain: it
//! emits intents into the outbox for an external adapter to translate
//! into transactions, and consumes confirmed events fed back as ordinary
//! entity txs.

use xln_codec::{CodecError, Item, Rlp};
use xln_core::types::{item_sint, sint_item};
use xln_core::{EntityId, Hash32, TokenId};
use xln_crypto::Signature;

// ── Intents (kernel → chain adapter) ─────────────────────────────────────────

/// An on-chain action the kernel wants performed. Signatures, gas and ABI
/// encoding are the adapter's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JurisdictionIntent {
    RegisterEntity {
        entity_id: EntityId,
        board_hash: Hash32,
    },

    /// Cooperative settlement of a bilateral account: per-token net deltas
    /// plus the signatures proving both parties agreed to the state they
    /// derive from.
    SettleDiffs {
        left: EntityId,
        right: EntityId,
        token_diffs: Vec<(TokenId, i128)>,
        signatures: Vec<Signature>,
    },

    FinalizeDispute {
        proof_body: Vec<u8>,
    },
}

// ── Events (chain adapter → kernel) ──────────────────────────────────────────

/// A confirmed on-chain fact. Both parties of an account receive the same
/// event, so applying it directly to local state keeps them convergent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JurisdictionEvent {
    ReserveUpdated {
        token_id: TokenId,
        amount: u128,
    },

    EntityRegistered {
        entity_id: EntityId,
    },

    /// Collateral and on-chain delta movement for one bilateral account.
    SettlementProcessed {
        counterparty: EntityId,
        token_id: TokenId,
        collateral: u128,
        ondelta: i128,
    },
}

const TAG_RESERVE_UPDATED: u64 = 0;
const TAG_ENTITY_REGISTERED: u64 = 1;
const TAG_SETTLEMENT_PROCESSED: u64 = 2;

impl Rlp for JurisdictionEvent {
    fn to_item(&self) -> Item {
        match self {
            JurisdictionEvent::ReserveUpdated { token_id, amount } => Item::list(vec![
                Item::uint(TAG_RESERVE_UPDATED as u128),
                token_id.to_item(),
                Item::uint(*amount),
            ]),
            JurisdictionEvent::EntityRegistered { entity_id } => Item::list(vec![
                Item::uint(TAG_ENTITY_REGISTERED as u128),
                entity_id.to_item(),
            ]),
            JurisdictionEvent::SettlementProcessed {
                counterparty,
                token_id,
                collateral,
                ondelta,
            } => Item::list(vec![
                Item::uint(TAG_SETTLEMENT_PROCESSED as u128),
                counterparty.to_item(),
                token_id.to_item(),
                Item::uint(*collateral),
                sint_item(*ondelta),
            ]),
        }
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        let fields = item.as_list()?;
        let tag = fields
            .first()
            .ok_or(CodecError::Malformed("empty jurisdiction event"))?
            .as_u64()?;
        match (tag, fields) {
            (TAG_RESERVE_UPDATED, [_, token, amount]) => Ok(JurisdictionEvent::ReserveUpdated {
                token_id: xln_core::TokenId::from_item(token)?,
                amount: amount.as_uint()?,
            }),
            (TAG_ENTITY_REGISTERED, [_, entity]) => Ok(JurisdictionEvent::EntityRegistered {
                entity_id: EntityId::from_item(entity)?,
            }),
            (TAG_SETTLEMENT_PROCESSED, [_, counterparty, token, collateral, ondelta]) => {
                Ok(JurisdictionEvent::SettlementProcessed {
                    counterparty: EntityId::from_item(counterparty)?,
                    token_id: xln_core::TokenId::from_item(token)?,
                    collateral: collateral.as_uint()?,
                    ondelta: item_sint(ondelta)?,
                })
            }
            _ => Err(CodecError::Malformed("unknown jurisdiction event shape")),
        }
    }
}
