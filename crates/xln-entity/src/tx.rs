use xln_account::AccountInput;
use xln_codec::{list_of, vec_of, CodecError, Item, Rlp};
use xln_core::{EntityId, Hash32, SignerId, TokenId};

use crate::jurisdiction::JurisdictionEvent;

// ── EntityOp ─────────────────────────────────────────────────────────────────

/// Every state-changing operation an entity frame can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOp {
    /// Append a message to the entity's domain log.
    Chat { message: String },

    /// Open a bilateral account toward `counterparty`. The opener names
    /// the peer's account signing address; the peer binds ours from our
    /// first signed frame.
    OpenAccount { counterparty: EntityId, counterparty_signer: SignerId },

    /// Queue a payment on the account with the first hop. `route_tail`
    /// holds the hops after that first counterparty, final recipient last.
    DirectPayment {
        counterparty: EntityId,
        token_id: TokenId,
        amount: u128,
        route_tail: Vec<EntityId>,
    },

    /// A bilateral wire message ridden on the entity wire. Authenticated
    /// by its own counters and signatures, not by a validator nonce.
    AccountInput(AccountInput),

    /// A confirmed on-chain event fed back by the jurisdiction adapter.
    JEvent(JurisdictionEvent),

    /// Raise a cooperative `settle_diffs` intent from the committed deltas
    /// of one account.
    SubmitSettlement { counterparty: EntityId },

    /// Raise a `register_entity` intent committing to the entity's board.
    RegisterEntity { board_hash: Hash32 },

    /// Push one account's finalized delta vector (subcontracts applied)
    /// to the jurisdiction layer as a dispute proof.
    FinalizeDispute { counterparty: EntityId },
}

impl EntityOp {
    /// Stable tag used both for RLP and for canonical tx ordering.
    pub fn kind(&self) -> u64 {
        match self {
            EntityOp::Chat { .. } => 0,
            EntityOp::OpenAccount { .. } => 1,
            EntityOp::DirectPayment { .. } => 2,
            EntityOp::AccountInput(_) => 3,
            EntityOp::JEvent(_) => 4,
            EntityOp::SubmitSettlement { .. } => 5,
            EntityOp::RegisterEntity { .. } => 6,
            EntityOp::FinalizeDispute { .. } => 7,
        }
    }
}

impl Rlp for EntityOp {
    fn to_item(&self) -> Item {
        match self {
            EntityOp::Chat { message } => {
                Item::list(vec![Item::uint(0), Item::bytes(message.as_bytes())])
            }
            EntityOp::OpenAccount { counterparty, counterparty_signer } => Item::list(vec![
                Item::uint(1),
                counterparty.to_item(),
                counterparty_signer.to_item(),
            ]),
            EntityOp::DirectPayment { counterparty, token_id, amount, route_tail } => {
                Item::list(vec![
                    Item::uint(2),
                    counterparty.to_item(),
                    token_id.to_item(),
                    Item::uint(*amount),
                    list_of(route_tail),
                ])
            }
            EntityOp::AccountInput(input) => Item::list(vec![Item::uint(3), input.to_item()]),
            EntityOp::JEvent(event) => Item::list(vec![Item::uint(4), event.to_item()]),
            EntityOp::SubmitSettlement { counterparty } => {
                Item::list(vec![Item::uint(5), counterparty.to_item()])
            }
            EntityOp::RegisterEntity { board_hash } => {
                Item::list(vec![Item::uint(6), board_hash.to_item()])
            }
            EntityOp::FinalizeDispute { counterparty } => {
                Item::list(vec![Item::uint(7), counterparty.to_item()])
            }
        }
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        let fields = item.as_list()?;
        let tag = fields
            .first()
            .ok_or(CodecError::Malformed("empty entity op"))?
            .as_u64()?;
        match (tag, fields) {
            (0, [_, message]) => Ok(EntityOp::Chat {
                message: String::from_utf8(message.as_bytes()?.to_vec())
                    .map_err(|_| CodecError::Malformed("chat message is not utf-8"))?,
            }),
            (1, [_, counterparty, signer]) => Ok(EntityOp::OpenAccount {
                counterparty: EntityId::from_item(counterparty)?,
                counterparty_signer: SignerId::from_item(signer)?,
            }),
            (2, [_, counterparty, token, amount, tail]) => Ok(EntityOp::DirectPayment {
                counterparty: EntityId::from_item(counterparty)?,
                token_id: TokenId::from_item(token)?,
                amount: amount.as_uint()?,
                route_tail: vec_of(tail)?,
            }),
            (3, [_, input]) => Ok(EntityOp::AccountInput(AccountInput::from_item(input)?)),
            (4, [_, event]) => Ok(EntityOp::JEvent(JurisdictionEvent::from_item(event)?)),
            (5, [_, counterparty]) => Ok(EntityOp::SubmitSettlement {
                counterparty: EntityId::from_item(counterparty)?,
            }),
            (6, [_, board]) => Ok(EntityOp::RegisterEntity { board_hash: Hash32::from_item(board)? }),
            (7, [_, counterparty]) => Ok(EntityOp::FinalizeDispute {
                counterparty: EntityId::from_item(counterparty)?,
            }),
            _ => Err(CodecError::Malformed("unknown entity op shape")),
        }
    }
}

// ── EntityTx ─────────────────────────────────────────────────────────────────

/// A signer-attributed operation. `sender`/`nonce` give local signers
/// replay protection; external ops (account inputs, jurisdiction events)
/// carry the unrouted sender and are authenticated by their payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTx {
    pub sender: SignerId,
    pub nonce: u64,
    pub op: EntityOp,
}

impl EntityTx {
    pub fn new(sender: SignerId, nonce: u64, op: EntityOp) -> Self {
        Self { sender, nonce, op }
    }

    /// An externally-authenticated tx: no validator nonce applies.
    pub fn external(op: EntityOp) -> Self {
        Self { sender: SignerId::UNROUTED, nonce: 0, op }
    }

    pub fn is_external(&self) -> bool {
        self.sender == SignerId::UNROUTED
    }

    /// Canonical ordering key: `(nonce, sender bytes, kind, insertion)`.
    pub fn order_key(&self, insertion_index: usize) -> (u64, SignerId, u64, usize) {
        (self.nonce, self.sender, self.op.kind(), insertion_index)
    }
}

impl Rlp for EntityTx {
    fn to_item(&self) -> Item {
        Item::list(vec![
            self.sender.to_item(),
            Item::uint(self.nonce as u128),
            self.op.to_item(),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [sender, nonce, op] => Ok(Self {
                sender: SignerId::from_item(sender)?,
                nonce: nonce.as_u64()?,
                op: EntityOp::from_item(op)?,
            }),
            _ => Err(CodecError::Malformed("entity tx must have three fields")),
        }
    }
}

/// Sort txs canonically and drop every duplicate `(sender, nonce)` pair
/// except the first. External txs are exempt from the pair dedup; their
/// replay protection lives in the payload.
pub fn canonical_order(txs: Vec<EntityTx>) -> Vec<EntityTx> {
    let mut indexed: Vec<(usize, EntityTx)> = txs.into_iter().enumerate().collect();
    indexed.sort_by_key(|(i, tx)| tx.order_key(*i));

    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::with_capacity(indexed.len());
    for (_, tx) in indexed {
        if !tx.is_external() && !seen.insert((tx.sender, tx.nonce)) {
            continue;
        }
        out.push(tx);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(b: u8) -> SignerId {
        SignerId::from_bytes([b; 20])
    }

    #[test]
    fn canonical_order_sorts_and_dedups() {
        let a = signer(1);
        let b = signer(2);
        let chat = |m: &str| EntityOp::Chat { message: m.into() };
        let txs = vec![
            EntityTx::new(b, 2, chat("b2")),
            EntityTx::new(a, 1, chat("a1")),
            EntityTx::new(a, 1, chat("a1-dup")),
            EntityTx::new(b, 1, chat("b1")),
        ];
        let ordered = canonical_order(txs);
        let msgs: Vec<&str> = ordered
            .iter()
            .map(|t| match &t.op {
                EntityOp::Chat { message } => message.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(msgs, vec!["a1", "b1", "b2"]);
    }

    #[test]
    fn external_txs_are_never_deduped() {
        let ev = |n: u64| {
            EntityTx::external(EntityOp::JEvent(JurisdictionEvent::ReserveUpdated {
                token_id: TokenId(n),
                amount: n as u128,
            }))
        };
        let ordered = canonical_order(vec![ev(1), ev(2)]);
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn tx_rlp_roundtrip() {
        let tx = EntityTx::new(
            signer(7),
            3,
            EntityOp::DirectPayment {
                counterparty: EntityId::from_low_u64(2),
                token_id: TokenId(1),
                amount: 500,
                route_tail: vec![EntityId::from_low_u64(3)],
            },
        );
        assert_eq!(EntityTx::from_rlp(&tx.to_rlp()).unwrap(), tx);

        let ext = EntityTx::external(EntityOp::RegisterEntity {
            board_hash: Hash32::from_bytes([1u8; 32]),
        });
        assert_eq!(EntityTx::from_rlp(&ext.to_rlp()).unwrap(), ext);

        let dispute = EntityTx::new(
            signer(7),
            4,
            EntityOp::FinalizeDispute { counterparty: EntityId::from_low_u64(2) },
        );
        assert_eq!(EntityTx::from_rlp(&dispute.to_rlp()).unwrap(), dispute);
    }
}
