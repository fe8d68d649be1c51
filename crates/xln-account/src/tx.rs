use xln_codec::{list_of, vec_of, CodecError, Item, Rlp};
use xln_core::{EntityId, TokenId};

use crate::subcontract::Subcontract;

/// A state-changing operation inside a bilateral account frame. Every tx
/// in a frame originates with the frame's proposer; direction is derived
/// from which side proposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountTx {
    /// Pay `amount` of `token_id` to the counterparty. A non-empty
    /// `route_tail` asks the receiver to forward onward: the remaining
    /// hops after itself, final recipient last.
    Payment { token_id: TokenId, amount: u128, route_tail: Vec<EntityId> },

    /// Raise the credit line this party extends to the counterparty.
    SetCredit { token_id: TokenId, amount: u128 },

    /// Attach a subcontract to a token's delta entry for the dispute /
    /// finalization path.
    AddSubcontract { token_id: TokenId, contract: Subcontract },
}

const TAG_PAYMENT: u64 = 0;
const TAG_SET_CREDIT: u64 = 1;
const TAG_ADD_SUBCONTRACT: u64 = 2;

impl AccountTx {
    pub fn token_id(&self) -> TokenId {
        match self {
            AccountTx::Payment { token_id, .. }
            | AccountTx::SetCredit { token_id, .. }
            | AccountTx::AddSubcontract { token_id, .. } => *token_id,
        }
    }
}

impl Rlp for AccountTx {
    fn to_item(&self) -> Item {
        match self {
            AccountTx::Payment { token_id, amount, route_tail } => Item::list(vec![
                Item::uint(TAG_PAYMENT as u128),
                token_id.to_item(),
                Item::uint(*amount),
                list_of(route_tail),
            ]),
            AccountTx::SetCredit { token_id, amount } => Item::list(vec![
                Item::uint(TAG_SET_CREDIT as u128),
                token_id.to_item(),
                Item::uint(*amount),
            ]),
            AccountTx::AddSubcontract { token_id, contract } => Item::list(vec![
                Item::uint(TAG_ADD_SUBCONTRACT as u128),
                token_id.to_item(),
                contract.to_item(),
            ]),
        }
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        let fields = item.as_list()?;
        let tag = fields
            .first()
            .ok_or(CodecError::Malformed("empty account tx"))?
            .as_u64()?;
        match (tag, fields) {
            (TAG_PAYMENT, [_, token, amount, tail]) => Ok(AccountTx::Payment {
                token_id: TokenId::from_item(token)?,
                amount: amount.as_uint()?,
                route_tail: vec_of(tail)?,
            }),
            (TAG_SET_CREDIT, [_, token, amount]) => Ok(AccountTx::SetCredit {
                token_id: TokenId::from_item(token)?,
                amount: amount.as_uint()?,
            }),
            (TAG_ADD_SUBCONTRACT, [_, token, contract]) => Ok(AccountTx::AddSubcontract {
                token_id: TokenId::from_item(token)?,
                contract: Subcontract::from_item(contract)?,
            }),
            _ => Err(CodecError::Malformed("unknown account tx shape")),
        }
    }
}
