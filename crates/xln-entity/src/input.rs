use std::collections::BTreeMap;

use xln_codec::{encode, list_of, CodecError, Item, Rlp};
use xln_core::{EntityId, Hash32, SignerId};
use xln_crypto::{keccak256, Signature};

use crate::state::EntityState;
use crate::tx::EntityTx;

/// `keccak256(RLP([height, canonical_tx_list]))`: the value precommits
/// sign. The resulting state is verified by re-execution, not by hash.
pub fn entity_frame_hash(height: u64, txs: &[EntityTx]) -> Hash32 {
    let item = Item::list(vec![Item::uint(height as u128), list_of(txs)]);
    Hash32::from_bytes(keccak256(&encode(&item)))
}

// ── ProposedEntityFrame ──────────────────────────────────────────────────────

/// A frame in flight: the ordered tx list, the proposer's fold of it, and
/// every signature collected so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEntityFrame {
    pub height: u64,
    pub txs: Vec<EntityTx>,
    pub frame_hash: Hash32,
    pub new_state: EntityState,
    pub signatures: BTreeMap<SignerId, Signature>,
}

impl ProposedEntityFrame {
    /// Sum of shares behind signatures that actually verify: each entry
    /// must recover to its claimed signer over `frame_hash`.
    pub fn verified_power(&self, config: &crate::state::ConsensusConfig) -> u64 {
        self.signatures
            .iter()
            .filter(|(signer, sig)| {
                sig.recover(self.frame_hash.as_bytes())
                    .map(|addr| addr == signer.0)
                    .unwrap_or(false)
            })
            .map(|(signer, _)| config.share_of(signer))
            .sum()
    }
}

fn signatures_item(signatures: &BTreeMap<SignerId, Signature>) -> Item {
    Item::List(
        signatures
            .iter()
            .map(|(signer, sig)| Item::list(vec![signer.to_item(), Item::bytes(sig.to_bytes())]))
            .collect(),
    )
}

fn signatures_from(item: &Item) -> Result<BTreeMap<SignerId, Signature>, CodecError> {
    let mut out = BTreeMap::new();
    for entry in item.as_list()? {
        match entry.as_list()? {
            [signer, sig] => {
                out.insert(
                    SignerId::from_item(signer)?,
                    Signature::from_bytes(sig.as_bytes()?)
                        .map_err(|_| CodecError::Malformed("invalid signature bytes"))?,
                );
            }
            _ => return Err(CodecError::Malformed("signature entry must be a pair")),
        }
    }
    Ok(out)
}

impl Rlp for ProposedEntityFrame {
    fn to_item(&self) -> Item {
        Item::list(vec![
            Item::uint(self.height as u128),
            list_of(&self.txs),
            self.frame_hash.to_item(),
            self.new_state.to_item(),
            signatures_item(&self.signatures),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [height, txs, frame_hash, new_state, signatures] => Ok(Self {
                height: height.as_u64()?,
                txs: xln_codec::vec_of(txs)?,
                frame_hash: Hash32::from_item(frame_hash)?,
                new_state: EntityState::from_item(new_state)?,
                signatures: signatures_from(signatures)?,
            }),
            _ => Err(CodecError::Malformed("proposed frame must have five fields")),
        }
    }
}

// ── EntityInput ──────────────────────────────────────────────────────────────

/// The entity-layer wire message. `signer_id` is a routing hint only;
/// the runtime strips it before anything is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInput {
    pub entity_id: EntityId,
    pub signer_id: SignerId,
    pub entity_txs: Vec<EntityTx>,
    pub proposed_frame: Option<ProposedEntityFrame>,
    pub precommits: BTreeMap<SignerId, Signature>,
    pub commit_notification: Option<ProposedEntityFrame>,
}

impl EntityInput {
    /// An empty message addressed to one replica slot.
    pub fn to(entity_id: EntityId, signer_id: SignerId) -> Self {
        Self {
            entity_id,
            signer_id,
            entity_txs: Vec::new(),
            proposed_frame: None,
            precommits: BTreeMap::new(),
            commit_notification: None,
        }
    }

    pub fn with_txs(mut self, txs: Vec<EntityTx>) -> Self {
        self.entity_txs = txs;
        self
    }
}

impl Rlp for EntityInput {
    fn to_item(&self) -> Item {
        Item::list(vec![
            self.entity_id.to_item(),
            self.signer_id.to_item(),
            list_of(&self.entity_txs),
            Item::opt(self.proposed_frame.as_ref().map(Rlp::to_item)),
            signatures_item(&self.precommits),
            Item::opt(self.commit_notification.as_ref().map(Rlp::to_item)),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [entity, signer, txs, frame, precommits, notification] => Ok(Self {
                entity_id: EntityId::from_item(entity)?,
                signer_id: SignerId::from_item(signer)?,
                entity_txs: xln_codec::vec_of(txs)?,
                proposed_frame: frame.as_opt()?.map(ProposedEntityFrame::from_item).transpose()?,
                precommits: signatures_from(precommits)?,
                commit_notification: notification
                    .as_opt()?
                    .map(ProposedEntityFrame::from_item)
                    .transpose()?,
            }),
            _ => Err(CodecError::Malformed("entity input must have six fields")),
        }
    }
}
