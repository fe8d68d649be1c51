//! Last-writer-wins profile gossip.
//!
//! Profiles are an eventually-consistent lattice: a stored profile is
//! replaced only by a strictly newer timestamp (ties broken on the
//! canonical encoding), so merge order and delivery reliability never
//! affect the converged state. Capacities are *derived* from account
//! deltas at announce time and cannot be set directly.

use std::collections::BTreeMap;

use tracing::debug;

use xln_account::AccountMachine;
use xln_codec::{CodecError, Item, Rlp};
use xln_core::{EntityId, TokenId};

// ── Profile ──────────────────────────────────────────────────────────────────

/// Fee policy advertised for forwarding through this entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMetadata {
    pub routing_fee_ppm: u64,
    pub base_fee: u128,
}

/// Per-counterparty, per-token headroom as seen from the announcing
/// entity's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCapacity {
    pub token_id: TokenId,
    pub inbound: u128,
    pub outbound: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub entity_id: EntityId,
    pub capabilities: Vec<String>,
    pub metadata: ProfileMetadata,
    pub capacities: BTreeMap<EntityId, Vec<TokenCapacity>>,
    pub timestamp: u64,
}

/// Snapshot an entity's account layer into an announceable profile.
pub fn derive_profile(
    entity_id: EntityId,
    accounts: &BTreeMap<EntityId, AccountMachine>,
    metadata: ProfileMetadata,
    capabilities: Vec<String>,
    timestamp: u64,
) -> Profile {
    let capacities = accounts
        .iter()
        .map(|(counterparty, machine)| {
            let per_token = machine
                .deltas_vec()
                .iter()
                .map(|delta| {
                    let pair = delta.capacities(machine.is_left());
                    TokenCapacity {
                        token_id: delta.token_id,
                        inbound: pair.inbound,
                        outbound: pair.outbound,
                    }
                })
                .collect();
            (*counterparty, per_token)
        })
        .collect();
    Profile { entity_id, capabilities, metadata, capacities, timestamp }
}

impl Rlp for Profile {
    fn to_item(&self) -> Item {
        Item::list(vec![
            self.entity_id.to_item(),
            Item::List(self.capabilities.iter().map(|c| Item::bytes(c.as_bytes())).collect()),
            Item::list(vec![
                Item::uint(self.metadata.routing_fee_ppm as u128),
                Item::uint(self.metadata.base_fee),
            ]),
            Item::List(
                self.capacities
                    .iter()
                    .map(|(counterparty, tokens)| {
                        Item::list(vec![
                            counterparty.to_item(),
                            Item::List(
                                tokens
                                    .iter()
                                    .map(|t| {
                                        Item::list(vec![
                                            t.token_id.to_item(),
                                            Item::uint(t.inbound),
                                            Item::uint(t.outbound),
                                        ])
                                    })
                                    .collect(),
                            ),
                        ])
                    })
                    .collect(),
            ),
            Item::uint(self.timestamp as u128),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [entity, capabilities, metadata, capacities, timestamp] => {
                let meta = match metadata.as_list()? {
                    [fee_ppm, base_fee] => ProfileMetadata {
                        routing_fee_ppm: fee_ppm.as_u64()?,
                        base_fee: base_fee.as_uint()?,
                    },
                    _ => return Err(CodecError::Malformed("profile metadata must be a pair")),
                };
                let mut capacity_map = BTreeMap::new();
                for entry in capacities.as_list()? {
                    match entry.as_list()? {
                        [counterparty, tokens] => {
                            let per_token = tokens
                                .as_list()?
                                .iter()
                                .map(|t| match t.as_list()? {
                                    [token, inbound, outbound] => Ok(TokenCapacity {
                                        token_id: TokenId::from_item(token)?,
                                        inbound: inbound.as_uint()?,
                                        outbound: outbound.as_uint()?,
                                    }),
                                    _ => Err(CodecError::Malformed("capacity must be a triple")),
                                })
                                .collect::<Result<_, _>>()?;
                            capacity_map.insert(EntityId::from_item(counterparty)?, per_token);
                        }
                        _ => return Err(CodecError::Malformed("capacity entry must be a pair")),
                    }
                }
                Ok(Self {
                    entity_id: EntityId::from_item(entity)?,
                    capabilities: capabilities
                        .as_list()?
                        .iter()
                        .map(|c| {
                            String::from_utf8(c.as_bytes()?.to_vec())
                                .map_err(|_| CodecError::Malformed("capability is not utf-8"))
                        })
                        .collect::<Result<_, _>>()?,
                    metadata: meta,
                    capacities: capacity_map,
                    timestamp: timestamp.as_u64()?,
                })
            }
            _ => Err(CodecError::Malformed("profile must have five fields")),
        }
    }
}

// ── GossipMap ────────────────────────────────────────────────────────────────

/// The converging profile store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GossipMap {
    profiles: BTreeMap<EntityId, Profile>,
}

impl GossipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// LWW merge. Returns whether the update was accepted. Strictly newer
    /// timestamps win; equal timestamps fall back to comparing canonical
    /// encodings so every node picks the same winner.
    pub fn merge(&mut self, profile: Profile) -> bool {
        match self.profiles.get(&profile.entity_id) {
            Some(stored) if profile.timestamp < stored.timestamp => false,
            Some(stored) if profile.timestamp == stored.timestamp => {
                if profile.to_rlp() > stored.to_rlp() {
                    self.profiles.insert(profile.entity_id, profile);
                    true
                } else {
                    false
                }
            }
            _ => {
                debug!(entity = %profile.entity_id, ts = profile.timestamp, "profile accepted");
                self.profiles.insert(profile.entity_id, profile);
                true
            }
        }
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<&Profile> {
        self.profiles.get(entity_id)
    }

    /// Profiles in entity order, for deterministic traversal.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Profile)> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xln_core::SignerId;

    fn profile(ts: u64, fee: u64) -> Profile {
        Profile {
            entity_id: EntityId::from_low_u64(1),
            capabilities: vec!["route".into()],
            metadata: ProfileMetadata { routing_fee_ppm: fee, base_fee: 0 },
            capacities: BTreeMap::new(),
            timestamp: ts,
        }
    }

    #[test]
    fn newer_timestamp_wins() {
        let mut map = GossipMap::new();
        assert!(map.merge(profile(5, 100)));
        assert!(!map.merge(profile(4, 200)), "older update discarded");
        assert!(map.merge(profile(6, 300)));
        assert_eq!(map.get(&EntityId::from_low_u64(1)).unwrap().metadata.routing_fee_ppm, 300);
    }

    #[test]
    fn equal_timestamps_tie_break_deterministically() {
        let a = profile(5, 100);
        let b = profile(5, 200);

        let mut one = GossipMap::new();
        one.merge(a.clone());
        one.merge(b.clone());

        let mut two = GossipMap::new();
        two.merge(b);
        two.merge(a);

        assert_eq!(one, two, "merge order must not matter");
    }

    #[test]
    fn capacities_derive_from_deltas() {
        let alice = EntityId::from_low_u64(1);
        let bob = EntityId::from_low_u64(2);
        let mut machine =
            AccountMachine::new(alice, bob, SignerId::UNROUTED, SignerId::UNROUTED);
        machine.apply_onchain_deposit(TokenId(1), 1_000, 0);
        machine
            .deltas
            .get_mut(&TokenId(1))
            .unwrap()
            .apply_payment(250, true)
            .unwrap();

        let mut accounts = BTreeMap::new();
        accounts.insert(bob, machine);
        let p = derive_profile(
            alice,
            &accounts,
            ProfileMetadata { routing_fee_ppm: 0, base_fee: 0 },
            vec![],
            9,
        );
        let caps = &p.capacities[&bob];
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].outbound, 750);
        assert_eq!(caps[0].inbound, 250);
    }

    #[test]
    fn profile_rlp_roundtrip() {
        let mut p = profile(7, 42);
        p.capacities.insert(
            EntityId::from_low_u64(2),
            vec![TokenCapacity { token_id: TokenId(1), inbound: 3, outbound: 4 }],
        );
        assert_eq!(Profile::from_rlp(&p.to_rlp()).unwrap(), p);
    }
}
