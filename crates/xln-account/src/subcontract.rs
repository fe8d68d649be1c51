//! Subcontracts transform an account's delta vector at dispute or
//! cooperative finalization time. They never run during normal frame
//! exchange; the engine here is invoked on a working copy and the whole
//! finalization is rejected if the transformed vector breaks RCPAN on any
//! token.

use std::collections::BTreeMap;

use xln_codec::{vec_of, CodecError, Item, Rlp};
use xln_core::types::{item_sint, sint_item};
use xln_core::{ConsensusError, Hash32};
use xln_crypto::keccak256;

use crate::delta::Delta;

// ── Subcontract ──────────────────────────────────────────────────────────────

/// A conditional delta transformation attached to a token's delta entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subcontract {
    /// Hashlocked, time-bounded transfer. If a preimage of `hash` is
    /// revealed no later than `reveal_deadline`, `amount` is applied to
    /// the delta at `delta_index`; otherwise the lock simply expires.
    Htlc {
        delta_index: usize,
        amount: i128,
        reveal_deadline: u64,
        hash: Hash32,
    },

    /// Limit-order swap: the owner receives `add_amount` of the token at
    /// `add_index` and gives up `sub_amount` of the token at `sub_index`.
    Swap {
        owner_is_left: bool,
        add_index: usize,
        add_amount: u128,
        sub_index: usize,
        sub_amount: u128,
    },
}

const TAG_HTLC: u64 = 0;
const TAG_SWAP: u64 = 1;

impl Rlp for Subcontract {
    fn to_item(&self) -> Item {
        match self {
            Subcontract::Htlc { delta_index, amount, reveal_deadline, hash } => Item::list(vec![
                Item::uint(TAG_HTLC as u128),
                Item::uint(*delta_index as u128),
                sint_item(*amount),
                Item::uint(*reveal_deadline as u128),
                hash.to_item(),
            ]),
            Subcontract::Swap { owner_is_left, add_index, add_amount, sub_index, sub_amount } => {
                Item::list(vec![
                    Item::uint(TAG_SWAP as u128),
                    Item::uint(*owner_is_left as u128),
                    Item::uint(*add_index as u128),
                    Item::uint(*add_amount),
                    Item::uint(*sub_index as u128),
                    Item::uint(*sub_amount),
                ])
            }
        }
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        let fields = item.as_list()?;
        let tag = fields
            .first()
            .ok_or(CodecError::Malformed("empty subcontract"))?
            .as_u64()?;
        match (tag, fields) {
            (TAG_HTLC, [_, delta_index, amount, deadline, hash]) => Ok(Subcontract::Htlc {
                delta_index: delta_index.as_u64()? as usize,
                amount: item_sint(amount)?,
                reveal_deadline: deadline.as_u64()?,
                hash: Hash32::from_item(hash)?,
            }),
            (TAG_SWAP, [_, owner, add_index, add_amount, sub_index, sub_amount]) => {
                Ok(Subcontract::Swap {
                    owner_is_left: owner.as_u64()? != 0,
                    add_index: add_index.as_u64()? as usize,
                    add_amount: add_amount.as_uint()?,
                    sub_index: sub_index.as_u64()? as usize,
                    sub_amount: sub_amount.as_uint()?,
                })
            }
            _ => Err(CodecError::Malformed("unknown subcontract shape")),
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Apply every subcontract of every delta to a working copy of the vector.
///
/// `reveals` maps hashlocks to claimed preimages; each preimage is checked
/// against keccak-256 before its HTLC pays out. Returns the transformed
/// vector, or the first RCPAN violation, in which case the caller must
/// abandon the entire finalization.
pub fn apply_subcontracts(
    deltas: &[Delta],
    now: u64,
    reveals: &BTreeMap<Hash32, Vec<u8>>,
) -> Result<Vec<Delta>, ConsensusError> {
    let mut out: Vec<Delta> = deltas.to_vec();
    let contracts: Vec<Subcontract> =
        deltas.iter().flat_map(|d| d.subcontracts.iter().cloned()).collect();

    for contract in &contracts {
        match contract {
            Subcontract::Htlc { delta_index, amount, reveal_deadline, hash } => {
                let revealed = reveals
                    .get(hash)
                    .map(|pre| Hash32::from_bytes(keccak256(pre)) == *hash)
                    .unwrap_or(false);
                if revealed && now <= *reveal_deadline {
                    shift(&mut out, *delta_index, *amount)?;
                }
                // Past the deadline (or never revealed): refund, no effect.
            }
            Subcontract::Swap { owner_is_left, add_index, add_amount, sub_index, sub_amount } => {
                // Receiving moves the delta toward the owner's side, paying
                // moves it away; signs flip with the owner's perspective.
                let (add, sub) = if *owner_is_left {
                    (-(*add_amount as i128), *sub_amount as i128)
                } else {
                    (*add_amount as i128, -(*sub_amount as i128))
                };
                shift(&mut out, *add_index, add)?;
                shift(&mut out, *sub_index, sub)?;
            }
        }
    }

    for delta in &out {
        if !delta.rcpan_ok() {
            return Err(ConsensusError::RcpanViolation {
                token_id: delta.token_id,
                attempted_delta: delta.total(),
            });
        }
    }
    // Settled locks do not survive finalization.
    for delta in &mut out {
        delta.subcontracts.clear();
    }
    Ok(out)
}

fn shift(deltas: &mut [Delta], index: usize, amount: i128) -> Result<(), ConsensusError> {
    let delta = deltas
        .get_mut(index)
        .ok_or(ConsensusError::StateDivergence)?;
    delta.offdelta = delta
        .offdelta
        .checked_add(amount)
        .ok_or(ConsensusError::RcpanViolation {
            token_id: delta.token_id,
            attempted_delta: i128::MAX,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use xln_core::TokenId;

    fn funded_delta(token: u64, collateral: u128) -> Delta {
        let mut d = Delta::new(TokenId(token));
        d.collateral = collateral;
        d
    }

    fn hashlock(preimage: &[u8]) -> Hash32 {
        Hash32::from_bytes(keccak256(preimage))
    }

    #[test]
    fn htlc_pays_out_on_timely_reveal() {
        let mut d = funded_delta(1, 1_000);
        let hash = hashlock(b"secret");
        d.subcontracts.push(Subcontract::Htlc {
            delta_index: 0,
            amount: 250,
            reveal_deadline: 100,
            hash,
        });
        let mut reveals = BTreeMap::new();
        reveals.insert(hash, b"secret".to_vec());

        let out = apply_subcontracts(&[d], 90, &reveals).unwrap();
        assert_eq!(out[0].offdelta, 250);
        assert!(out[0].subcontracts.is_empty());
    }

    #[test]
    fn htlc_refunds_after_deadline() {
        let mut d = funded_delta(1, 1_000);
        let hash = hashlock(b"secret");
        d.subcontracts.push(Subcontract::Htlc {
            delta_index: 0,
            amount: 250,
            reveal_deadline: 100,
            hash,
        });
        let mut reveals = BTreeMap::new();
        reveals.insert(hash, b"secret".to_vec());

        let out = apply_subcontracts(&[d], 101, &reveals).unwrap();
        assert_eq!(out[0].offdelta, 0);
    }

    #[test]
    fn htlc_ignores_wrong_preimage() {
        let mut d = funded_delta(1, 1_000);
        let hash = hashlock(b"secret");
        d.subcontracts.push(Subcontract::Htlc {
            delta_index: 0,
            amount: 250,
            reveal_deadline: 100,
            hash,
        });
        let mut reveals = BTreeMap::new();
        reveals.insert(hash, b"guess".to_vec());

        let out = apply_subcontracts(&[d], 50, &reveals).unwrap();
        assert_eq!(out[0].offdelta, 0);
    }

    #[test]
    fn swap_moves_both_legs() {
        let mut base = funded_delta(1, 1_000);
        let mut quote = funded_delta(2, 1_000);
        quote.credit_left = 500;
        base.subcontracts.push(Subcontract::Swap {
            owner_is_left: false,
            add_index: 0,
            add_amount: 300,
            sub_index: 1,
            sub_amount: 200,
        });
        let out = apply_subcontracts(&[base, quote], 10, &BTreeMap::new()).unwrap();
        assert_eq!(out[0].offdelta, 300);
        assert_eq!(out[1].offdelta, -200);
    }

    #[test]
    fn finalization_rejected_when_result_breaks_rcpan() {
        // No credit anywhere: a swap leg pushing a delta negative must sink
        // the whole finalization.
        let base = funded_delta(1, 1_000);
        let mut quote = funded_delta(2, 100);
        quote.subcontracts.push(Subcontract::Swap {
            owner_is_left: true,
            add_index: 0,
            add_amount: 50,
            sub_index: 1,
            sub_amount: 50,
        });
        let err = apply_subcontracts(&[base, quote], 10, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConsensusError::RcpanViolation { token_id: TokenId(1), .. }));
    }

    #[test]
    fn rlp_roundtrip() {
        let contracts = vec![
            Subcontract::Htlc {
                delta_index: 2,
                amount: -40,
                reveal_deadline: 9_000,
                hash: hashlock(b"x"),
            },
            Subcontract::Swap {
                owner_is_left: true,
                add_index: 0,
                add_amount: 10,
                sub_index: 1,
                sub_amount: 20,
            },
        ];
        for c in contracts {
            assert_eq!(Subcontract::from_rlp(&c.to_rlp()).unwrap(), c);
        }
    }

    #[test]
    fn vec_roundtrip_via_list() {
        let contracts = vec![Subcontract::Swap {
            owner_is_left: false,
            add_index: 1,
            add_amount: 5,
            sub_index: 0,
            sub_amount: 6,
        }];
        let item = xln_codec::list_of(&contracts);
        assert_eq!(vec_of::<Subcontract>(&item).unwrap(), contracts);
    }
}
