use xln_codec::{CodecError, Item, Rlp};
use xln_core::EntityId;
use xln_crypto::Signature;

use crate::frame::AccountFrame;

/// The single bilateral wire message. A proposal carries
/// `new_account_frame` plus the proposer's signature; an acknowledgement
/// carries both parties' signatures and no frame. `prev_signatures` bind
/// the sender to the committed frame it builds on, and `counter` is the
/// per-direction replay guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInput {
    pub from_entity_id: EntityId,
    pub to_entity_id: EntityId,
    pub height: u64,
    pub new_account_frame: Option<AccountFrame>,
    pub new_signatures: Vec<Signature>,
    pub prev_signatures: Vec<Signature>,
    pub counter: u64,
}

fn sig_item(sig: &Signature) -> Item {
    Item::bytes(sig.to_bytes())
}

fn sig_from(item: &Item) -> Result<Signature, CodecError> {
    Signature::from_bytes(item.as_bytes()?)
        .map_err(|_| CodecError::Malformed("invalid signature bytes"))
}

impl Rlp for AccountInput {
    fn to_item(&self) -> Item {
        Item::list(vec![
            self.from_entity_id.to_item(),
            self.to_entity_id.to_item(),
            Item::uint(self.height as u128),
            Item::opt(self.new_account_frame.as_ref().map(Rlp::to_item)),
            Item::List(self.new_signatures.iter().map(sig_item).collect()),
            Item::List(self.prev_signatures.iter().map(sig_item).collect()),
            Item::uint(self.counter as u128),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [from, to, height, frame, new_sigs, prev_sigs, counter] => Ok(Self {
                from_entity_id: EntityId::from_item(from)?,
                to_entity_id: EntityId::from_item(to)?,
                height: height.as_u64()?,
                new_account_frame: frame
                    .as_opt()?
                    .map(AccountFrame::from_item)
                    .transpose()?,
                new_signatures: new_sigs.as_list()?.iter().map(sig_from).collect::<Result<_, _>>()?,
                prev_signatures: prev_sigs.as_list()?.iter().map(sig_from).collect::<Result<_, _>>()?,
                counter: counter.as_u64()?,
            }),
            _ => Err(CodecError::Malformed("account input must have seven fields")),
        }
    }
}
