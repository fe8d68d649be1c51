//! Merkle-rooted snapshots.
//!
//! Binary form (authoritative):
//! `RLP([tick, timestamp, state_root, [replica_entry]*])` with
//! `replica_entry = [composite_key, entity_id, signer_id, height,
//! RLP(entity_state)]`, entries sorted by composite key, and
//! `state_root = merkle_root([keccak256(RLP(replica_entry))…])`.
//! A human-readable `.debug.json` sibling carries the same data with hex
//! hashes; the binary form is the one that is verified.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use xln_codec::{decode, encode, Item, Rlp};
use xln_core::{EntityId, Hash32, SignerId};
use xln_crypto::merkle::merkle_root;
use xln_crypto::keccak256;
use xln_entity::EntityState;
use xln_gossip::{derive_profile, ProfileMetadata};
use xln_runtime::{apply_runtime_tick, create_env, Env, KeyStore};

use crate::wal::{read_wal, WalRecord};
use crate::StoreError;

fn composite_key(entity_id: &EntityId, signer_id: &SignerId) -> Vec<u8> {
    let mut key = entity_id.as_bytes().to_vec();
    key.extend_from_slice(signer_id.as_bytes());
    key
}

fn replica_entry(entity_id: &EntityId, signer_id: &SignerId, state: &EntityState) -> Item {
    Item::list(vec![
        Item::bytes(composite_key(entity_id, signer_id)),
        entity_id.to_item(),
        signer_id.to_item(),
        Item::uint(state.height as u128),
        Item::bytes(state.to_rlp()),
    ])
}

/// The Merkle root over an env's replica entries, iterated in composite
/// key order. Any other iteration order would break integrity checks.
pub fn state_root(env: &Env) -> Hash32 {
    let leaves: Vec<[u8; 32]> = env
        .replicas
        .iter()
        .map(|((entity, signer), replica)| {
            keccak256(&encode(&replica_entry(entity, signer, &replica.state)))
        })
        .collect();
    Hash32::from_bytes(merkle_root(&leaves))
}

// ── Save ─────────────────────────────────────────────────────────────────────

/// Write the binary snapshot and its debug sibling. Returns the state
/// root that was embedded.
pub fn save_snapshot<P: AsRef<Path>>(env: &Env, path: P) -> Result<Hash32, StoreError> {
    let root = state_root(env);
    let entries: Vec<Item> = env
        .replicas
        .iter()
        .map(|((entity, signer), replica)| replica_entry(entity, signer, &replica.state))
        .collect();
    let body = encode(&Item::list(vec![
        Item::uint(env.tick as u128),
        Item::uint(env.timestamp as u128),
        root.to_item(),
        Item::List(entries),
    ]));
    std::fs::write(&path, &body)?;
    write_debug_sibling(env, &path, &root)?;

    info!(
        tick = env.tick,
        root = %root,
        bytes = body.len(),
        "snapshot written"
    );
    Ok(root)
}

/// Self-describing textual twin of the binary snapshot. Handy under a
/// pager; never read back by the kernel.
#[derive(Serialize)]
struct DebugSnapshot {
    tick: u64,
    timestamp: u64,
    state_root: String,
    replicas: Vec<DebugReplica>,
}

#[derive(Serialize)]
struct DebugReplica {
    composite_key: String,
    entity_id: String,
    signer_id: String,
    height: u64,
    state_hash: String,
}

fn write_debug_sibling<P: AsRef<Path>>(env: &Env, path: P, root: &Hash32) -> Result<(), StoreError> {
    let doc = DebugSnapshot {
        tick: env.tick,
        timestamp: env.timestamp,
        state_root: root.to_hex(),
        replicas: env
            .replicas
            .iter()
            .map(|((entity, signer), replica)| DebugReplica {
                composite_key: hex::encode(composite_key(entity, signer)),
                entity_id: entity.to_hex(),
                signer_id: signer.to_hex(),
                height: replica.state.height,
                state_hash: replica.state.state_hash().to_hex(),
            })
            .collect(),
    };
    let sibling = path.as_ref().with_extension("debug.json");
    std::fs::write(sibling, serde_json::to_vec_pretty(&doc).expect("plain struct serializes"))?;
    Ok(())
}

// ── Load ─────────────────────────────────────────────────────────────────────

/// Decode, verify and mount a snapshot. The stored root must match the
/// recomputed one or the snapshot is refused. Signing keys are external:
/// the caller's keystore must cover every signer in the file.
pub fn load_snapshot<P: AsRef<Path>>(
    path: P,
    keys: &KeyStore,
) -> Result<(Env, Hash32), StoreError> {
    let bytes = std::fs::read(&path)?;
    let item = decode(&bytes)?;
    let [tick, timestamp, stored_root, entries] = item.as_list()? else {
        return Err(StoreError::UnknownVersion);
    };
    let stored_root = Hash32::from_item(stored_root)?;

    let mut env = create_env(0);
    env.tick = tick.as_u64()?;
    env.timestamp = timestamp.as_u64()?;
    let mut leaves = Vec::new();

    for entry in entries.as_list()? {
        let [composite, entity, signer, height, state_bytes] = entry.as_list()? else {
            return Err(StoreError::UnknownVersion);
        };
        leaves.push(keccak256(&encode(entry)));

        let entity_id = EntityId::from_item(entity)?;
        let signer_id = SignerId::from_item(signer)?;
        let state = EntityState::from_rlp(state_bytes.as_bytes()?)?;
        if composite.as_bytes()? != composite_key(&entity_id, &signer_id).as_slice()
            || state.entity_id != entity_id
            || state.height != height.as_u64()?
        {
            warn!(entity = %entity_id, "inconsistent replica entry");
            return Err(StoreError::MerkleMismatch);
        }

        let keypair = keys.keypair(&signer_id).map_err(|_| StoreError::MissingKey(signer_id))?;
        env.attach_replica(state, signer_id, keypair);
    }

    let recomputed = Hash32::from_bytes(merkle_root(&leaves));
    if recomputed != stored_root {
        return Err(StoreError::MerkleMismatch);
    }
    // Double-check against the freshly mounted replicas.
    if state_root(&env) != stored_root {
        return Err(StoreError::MerkleMismatch);
    }

    // Gossip is soft state: re-derive every hosted entity's profile as of
    // the snapshot instant.
    for replica in env.replicas.values() {
        if replica.state.config.account_signer() != replica.signer_id {
            continue;
        }
        let profile = derive_profile(
            replica.entity_id,
            &replica.state.accounts,
            ProfileMetadata {
                routing_fee_ppm: replica.state.domain.routing_fee_ppm,
                base_fee: replica.state.domain.base_fee,
            },
            Vec::new(),
            env.timestamp,
        );
        env.gossip.merge(profile);
    }

    info!(tick = env.tick, root = %stored_root, "snapshot mounted");
    Ok((env, stored_root))
}

// ── Replay ───────────────────────────────────────────────────────────────────

/// Reconstruct the env by mounting a snapshot and re-running every logged
/// tick after it. Recorded outputs, where present, are cross-checked
/// against the re-run; any divergence is an integrity failure.
pub fn replay<P: AsRef<Path>, Q: AsRef<Path>>(
    snapshot_path: P,
    wal_path: Q,
    keys: &KeyStore,
) -> Result<Env, StoreError> {
    let (mut env, _) = load_snapshot(snapshot_path, keys)?;

    for record in read_wal(wal_path)? {
        match record {
            WalRecord::TickInput { tick, now_ts, inputs } => {
                if tick <= env.tick {
                    continue; // predates the snapshot
                }
                if tick != env.tick + 1 {
                    return Err(StoreError::TruncatedLog { expected: env.tick + 1 });
                }
                let (next, _) = apply_runtime_tick(env, inputs, now_ts);
                env = next;
            }
            WalRecord::TickOutput { tick, messages } => {
                if tick == env.tick && env.outbox.messages != messages {
                    return Err(StoreError::ReplayDivergence { tick });
                }
            }
            WalRecord::SnapshotRef { .. } => {}
        }
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xln_core::{SignerId, TokenId};
    use xln_entity::{
        ConsensusConfig, EntityInput, EntityOp, EntityTx, JurisdictionEvent,
    };

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("xln_snapshot_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn two_entity_env() -> (Env, KeyStore, EntityId, EntityId, SignerId, SignerId) {
        let mut keys = KeyStore::new();
        let sa = keys.insert([0xA1; 32]).unwrap();
        let sb = keys.insert([0xB1; 32]).unwrap();
        let alice = EntityId::from_low_u64(1);
        let bob = EntityId::from_low_u64(2);
        let mut env = create_env(3);
        env.attach_replica(
            EntityState::genesis(alice, ConsensusConfig::solo(sa)),
            sa,
            keys.keypair(&sa).unwrap(),
        );
        env.attach_replica(
            EntityState::genesis(bob, ConsensusConfig::solo(sb)),
            sb,
            keys.keypair(&sb).unwrap(),
        );
        (env, keys, alice, bob, sa, sb)
    }

    fn chat(entity: EntityId, signer: SignerId, nonce: u64, msg: &str) -> EntityInput {
        EntityInput::to(entity, SignerId::UNROUTED).with_txs(vec![EntityTx::new(
            signer,
            nonce,
            EntityOp::Chat { message: msg.into() },
        )])
    }

    #[test]
    fn save_load_roundtrip_preserves_state_and_root() {
        let (env, keys, alice, bob, _sa, sb) = two_entity_env();
        let fund = EntityInput::to(alice, SignerId::UNROUTED).with_txs(vec![EntityTx::external(
            EntityOp::JEvent(JurisdictionEvent::SettlementProcessed {
                counterparty: bob,
                token_id: TokenId(1),
                collateral: 900,
                ondelta: 0,
            }),
        )]);
        let (env, _) = apply_runtime_tick(env, vec![fund, chat(bob, sb, 1, "hello")], 10);

        let path = temp_path("roundtrip.snap");
        let saved_root = save_snapshot(&env, &path).unwrap();
        let (loaded, loaded_root) = load_snapshot(&path, &keys).unwrap();

        assert_eq!(saved_root, loaded_root);
        assert!(env.persistent_eq(&loaded));
        assert_eq!(state_root(&loaded), saved_root);
        assert!(path.with_extension("debug.json").exists());
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("debug.json"));
    }

    #[test]
    fn snapshot_bytes_are_deterministic() {
        let (env, _, _, _, _, sb) = two_entity_env();
        let (env, _) = apply_runtime_tick(env, vec![chat(EntityId::from_low_u64(2), sb, 1, "x")], 5);

        let p1 = temp_path("det-a.snap");
        let p2 = temp_path("det-b.snap");
        save_snapshot(&env, &p1).unwrap();
        save_snapshot(&env, &p2).unwrap();
        assert_eq!(std::fs::read(&p1).unwrap(), std::fs::read(&p2).unwrap());
        for p in [p1, p2] {
            let _ = std::fs::remove_file(p.with_extension("debug.json"));
            let _ = std::fs::remove_file(p);
        }
    }

    #[test]
    fn tampered_snapshot_is_refused() {
        let (env, keys, ..) = two_entity_env();
        let path = temp_path("tampered.snap");
        save_snapshot(&env, &path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let len = bytes.len();
        bytes[len - 10] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        match load_snapshot(&path, &keys) {
            Err(StoreError::MerkleMismatch) | Err(StoreError::Codec(_)) => {}
            other => panic!("tampered snapshot must be refused, got {other:?}"),
        }
        let _ = std::fs::remove_file(path.with_extension("debug.json"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_signer_key_is_refused() {
        let (env, _, ..) = two_entity_env();
        let path = temp_path("nokeys.snap");
        save_snapshot(&env, &path).unwrap();
        let empty = KeyStore::new();
        assert!(matches!(load_snapshot(&path, &empty), Err(StoreError::MissingKey(_))));
        let _ = std::fs::remove_file(path.with_extension("debug.json"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn replay_from_mid_run_snapshot_matches_uninterrupted_run() {
        let (env, keys, _, bob, _, sb) = two_entity_env();
        let wal = temp_path("replay.wal");
        let snap = temp_path("replay.snap");

        // Uninterrupted run: five chat ticks, snapshot after the second.
        let mut live = env;
        for n in 1..=5u64 {
            let inputs = vec![chat(bob, sb, n, &format!("msg-{n}"))];
            append_wal_inputs(&wal, live.tick + 1, 100 + n, &inputs);
            let (next, outbox) = apply_runtime_tick(live, inputs, 100 + n);
            live = next;
            crate::wal::append_wal(
                &wal,
                &WalRecord::TickOutput { tick: live.tick, messages: outbox.messages },
            )
            .unwrap();
            if n == 2 {
                save_snapshot(&live, &snap).unwrap();
            }
        }

        let replayed = replay(&snap, &wal, &keys).unwrap();
        assert!(replayed.persistent_eq(&live), "replay must land on the same env");
        assert_eq!(state_root(&replayed), state_root(&live));

        let _ = std::fs::remove_file(snap.with_extension("debug.json"));
        for p in [wal, snap] {
            let _ = std::fs::remove_file(p);
        }
    }

    fn append_wal_inputs(path: &std::path::Path, tick: u64, now_ts: u64, inputs: &[EntityInput]) {
        crate::wal::append_wal(
            path,
            &WalRecord::TickInput { tick, now_ts, inputs: inputs.to_vec() },
        )
        .unwrap();
    }
}
