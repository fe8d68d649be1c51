use xln_codec::{list_of, vec_of, CodecError, Item, Rlp};
use xln_core::{Hash32, TokenId};
use xln_crypto::{genesis_prev_hash, keccak256};

use crate::delta::Delta;
use crate::tx::AccountTx;

/// An atomic, hash-chained bilateral state transition. `height` grows by
/// exactly one per committed frame; `deltas_post` is the full delta table
/// after applying `txs`, sorted by token id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFrame {
    pub height: u64,
    pub timestamp: u64,
    pub prev_frame_hash: Hash32,
    pub txs: Vec<AccountTx>,
    pub token_ids: Vec<TokenId>,
    pub deltas_post: Vec<Delta>,
}

impl AccountFrame {
    /// The anchor frame every account chain starts from. Its
    /// `prev_frame_hash` is the fixed genesis sentinel, distinct from the
    /// zero hash.
    pub fn genesis(timestamp: u64) -> Self {
        Self {
            height: 0,
            timestamp,
            prev_frame_hash: Hash32::from_bytes(genesis_prev_hash()),
            txs: Vec::new(),
            token_ids: Vec::new(),
            deltas_post: Vec::new(),
        }
    }

    /// keccak-256 over the canonical RLP of the whole frame. This is what
    /// both parties sign.
    pub fn state_hash(&self) -> Hash32 {
        Hash32::from_bytes(keccak256(&self.to_rlp()))
    }
}

impl Rlp for AccountFrame {
    fn to_item(&self) -> Item {
        Item::list(vec![
            Item::uint(self.height as u128),
            Item::uint(self.timestamp as u128),
            self.prev_frame_hash.to_item(),
            list_of(&self.txs),
            list_of(&self.token_ids),
            list_of(&self.deltas_post),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [height, timestamp, prev, txs, tokens, deltas] => Ok(Self {
                height: height.as_u64()?,
                timestamp: timestamp.as_u64()?,
                prev_frame_hash: Hash32::from_item(prev)?,
                txs: vec_of(txs)?,
                token_ids: vec_of(tokens)?,
                deltas_post: vec_of(deltas)?,
            }),
            _ => Err(CodecError::Malformed("account frame must have six fields")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_uses_sentinel_anchor() {
        let g = AccountFrame::genesis(0);
        assert_eq!(g.height, 0);
        assert_eq!(g.prev_frame_hash.as_bytes(), &genesis_prev_hash());
        assert_ne!(g.prev_frame_hash, Hash32::ZERO);
    }

    #[test]
    fn state_hash_is_stable_and_binding() {
        let g = AccountFrame::genesis(5);
        let h1 = g.state_hash();
        assert_eq!(h1, g.state_hash());

        let mut other = g.clone();
        other.timestamp = 6;
        assert_ne!(h1, other.state_hash());
    }

    #[test]
    fn rlp_roundtrip() {
        let mut frame = AccountFrame::genesis(42);
        frame.height = 3;
        frame.txs.push(AccountTx::Payment {
            token_id: TokenId(1),
            amount: 9,
            route_tail: vec![],
        });
        frame.token_ids.push(TokenId(1));
        frame.deltas_post.push(Delta::new(TokenId(1)));
        assert_eq!(AccountFrame::from_rlp(&frame.to_rlp()).unwrap(), frame);
    }
}
