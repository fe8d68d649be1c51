use std::collections::BTreeMap;

use xln_core::{EntityId, SignerId};
use xln_crypto::{CryptoError, Keypair};
use xln_entity::{Diagnostic, EntityInput, EntityReplica, EntityState, JurisdictionIntent};
use xln_gossip::GossipMap;

/// Composite replica address: one slot per `(entity, signer)`.
pub type ReplicaKey = (EntityId, SignerId);

// ── Outbox ───────────────────────────────────────────────────────────────────

/// Everything a tick produced, in emission order. The driver delivers
/// `messages` (next tick, never this one), hands `intents` to the
/// jurisdiction adapter, and may log `diagnostics` and `dead_letters`.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    pub messages: Vec<EntityInput>,
    pub intents: Vec<JurisdictionIntent>,
    pub diagnostics: Vec<Diagnostic>,
    pub dead_letters: Vec<EntityInput>,
}

impl Outbox {
    pub fn absorb(&mut self, entity_out: xln_entity::EntityOutbox) {
        self.messages.extend(entity_out.messages);
        self.intents.extend(entity_out.intents);
        self.diagnostics.extend(entity_out.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.intents.is_empty()
            && self.diagnostics.is_empty()
            && self.dead_letters.is_empty()
    }
}

// ── KeyStore ─────────────────────────────────────────────────────────────────

/// Signer seeds held by the driver. Key management proper is outside this
/// kernel; replicas only ever see the derived `Keypair`, and snapshots
/// never contain any of this.
#[derive(Debug, Default, Clone)]
pub struct KeyStore {
    seeds: BTreeMap<SignerId, [u8; 32]>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a seed; returns the derived signer address.
    pub fn insert(&mut self, seed: [u8; 32]) -> Result<SignerId, CryptoError> {
        let signer = SignerId(Keypair::from_seed(seed)?.address());
        self.seeds.insert(signer, seed);
        Ok(signer)
    }

    pub fn keypair(&self, signer: &SignerId) -> Result<Keypair, CryptoError> {
        let seed = self.seeds.get(signer).ok_or(CryptoError::InvalidKey)?;
        Keypair::from_seed(*seed)
    }
}

// ── Env ──────────────────────────────────────────────────────────────────────

/// Top-level runtime state: every replica this process hosts, the gossip
/// layer, and the most recent tick's outbox.
#[derive(Debug, Clone)]
pub struct Env {
    pub runtime_id: u64,
    pub tick: u64,
    pub timestamp: u64,
    pub replicas: BTreeMap<ReplicaKey, EntityReplica>,
    pub gossip: GossipMap,
    pub outbox: Outbox,
    pub history_cursor: u64,
    /// Set instead of panicking; the driver inspects it and halts.
    pub fatal: Option<String>,
}

/// Fresh, empty runtime.
pub fn create_env(runtime_id: u64) -> Env {
    Env {
        runtime_id,
        tick: 0,
        timestamp: 0,
        replicas: BTreeMap::new(),
        gossip: GossipMap::new(),
        outbox: Outbox::default(),
        history_cursor: 0,
        fatal: None,
    }
}

impl Env {
    /// Mount a replica into its `(entity, signer)` slot. Attachment is an
    /// external operation: the driver decides which slots this process
    /// hosts and provides the signing key.
    pub fn attach_replica(&mut self, state: EntityState, signer_id: SignerId, keypair: Keypair) {
        let key = (state.entity_id, signer_id);
        self.replicas.insert(key, EntityReplica::new(state, signer_id, keypair));
    }

    pub fn replica(&self, entity_id: EntityId, signer_id: SignerId) -> Option<&EntityReplica> {
        self.replicas.get(&(entity_id, signer_id))
    }

    /// Resolve a routing hint to a live slot. `SignerId::UNROUTED` picks
    /// the addressee entity's first replica in key order, which is the
    /// same on every run.
    pub fn resolve(&self, entity_id: EntityId, signer_id: SignerId) -> Option<ReplicaKey> {
        if signer_id != SignerId::UNROUTED {
            return self.replicas.contains_key(&(entity_id, signer_id)).then_some((entity_id, signer_id));
        }
        self.replicas
            .range((entity_id, SignerId::UNROUTED)..)
            .next()
            .filter(|((e, _), _)| *e == entity_id)
            .map(|(key, _)| *key)
    }

    /// Equality of everything a snapshot captures: replica states plus the
    /// logical clock. Mempools, proposals and gossip are transient.
    pub fn persistent_eq(&self, other: &Env) -> bool {
        self.tick == other.tick
            && self.timestamp == other.timestamp
            && self.replicas.len() == other.replicas.len()
            && self
                .replicas
                .iter()
                .zip(other.replicas.iter())
                .all(|((ka, ra), (kb, rb))| ka == kb && ra.state == rb.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xln_entity::ConsensusConfig;

    #[test]
    fn resolve_prefers_exact_slot_and_falls_back_deterministically() {
        let mut keys = KeyStore::new();
        let s1 = keys.insert([1u8; 32]).unwrap();
        let s2 = keys.insert([2u8; 32]).unwrap();
        let entity = EntityId::from_low_u64(1);

        let mut env = create_env(0);
        let state = EntityState::genesis(entity, ConsensusConfig::solo(s1));
        env.attach_replica(state.clone(), s1, keys.keypair(&s1).unwrap());
        env.attach_replica(state, s2, keys.keypair(&s2).unwrap());

        assert_eq!(env.resolve(entity, s2), Some((entity, s2)));
        let low = s1.min(s2);
        assert_eq!(env.resolve(entity, SignerId::UNROUTED), Some((entity, low)));
        assert_eq!(env.resolve(EntityId::from_low_u64(9), SignerId::UNROUTED), None);
    }

    #[test]
    fn keystore_roundtrip() {
        let mut keys = KeyStore::new();
        let signer = keys.insert([7u8; 32]).unwrap();
        let kp = keys.keypair(&signer).unwrap();
        assert_eq!(SignerId(kp.address()), signer);
        assert!(keys.keypair(&SignerId::UNROUTED).is_err());
    }
}
