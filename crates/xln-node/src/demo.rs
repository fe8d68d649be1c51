//! The built-in scenario: Alice and Bob settle through a fee-charging hub.
//!
//! Entities are single-signer for legibility; the consensus path they run
//! is the same one multi-validator entities use. All randomness is a
//! seeded generator feeding payment amounts; the kernel itself sees only
//! its inputs.

use std::path::Path;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use xln_core::{EntityId, SignerId, TokenId};
use xln_entity::{ConsensusConfig, EntityInput, EntityOp, EntityState, EntityTx};
use xln_routing::find_routes;
use xln_runtime::{
    apply_runtime_tick, create_env, Env, Jurisdiction, KeyStore, LoopbackTransport,
    MockJurisdiction, Transport,
};
use xln_store::{append_wal, save_snapshot, WalRecord};

const TOKEN: TokenId = TokenId(1);
const ALICE_SEED: [u8; 32] = [0xA1; 32];
const HUB_SEED: [u8; 32] = [0xB2; 32];
const BOB_SEED: [u8; 32] = [0xC3; 32];

/// The fixed demo keystore. Real deployments source keys externally; the
/// demo pins them so `replay` can re-mount its own snapshots.
pub fn demo_keystore() -> anyhow::Result<KeyStore> {
    let mut keys = KeyStore::new();
    for seed in [ALICE_SEED, HUB_SEED, BOB_SEED] {
        keys.insert(seed).context("deriving demo signer")?;
    }
    Ok(keys)
}

struct Actor {
    entity: EntityId,
    signer: SignerId,
    next_nonce: u64,
}

impl Actor {
    fn tx(&mut self, op: EntityOp) -> EntityInput {
        self.next_nonce += 1;
        EntityInput::to(self.entity, SignerId::UNROUTED)
            .with_txs(vec![EntityTx::new(self.signer, self.next_nonce, op)])
    }
}

pub fn run(data_dir: &Path, ticks: u64, snapshot_every: u64, seed: u64) -> anyhow::Result<()> {
    let wal_path = data_dir.join("demo.wal");
    let _ = std::fs::remove_file(&wal_path);

    let keys = demo_keystore()?;
    let mut env = create_env(seed);
    let mut rng = StdRng::seed_from_u64(seed);

    // ── Entities ─────────────────────────────────────────────────────────────
    let mut alice = attach_solo(&mut env, &keys, 1, ALICE_SEED, 0, 0)?;
    let mut hub = attach_solo(&mut env, &keys, 2, HUB_SEED, 10_000, 1)?;
    let mut bob = attach_solo(&mut env, &keys, 3, BOB_SEED, 0, 0)?;

    // ── Collaborators ────────────────────────────────────────────────────────
    let mut transport = LoopbackTransport::new();
    let mut chain = MockJurisdiction::new();
    chain.deposit(alice.entity, hub.entity, TOKEN, 1_000_000);
    chain.deposit(hub.entity, bob.entity, TOKEN, 1_000_000);

    // First tick's user inputs: open both accounts from each side.
    let mut scheduled: Vec<EntityInput> = vec![
        alice.tx(EntityOp::OpenAccount { counterparty: hub.entity, counterparty_signer: hub.signer }),
        hub.tx(EntityOp::OpenAccount { counterparty: alice.entity, counterparty_signer: alice.signer }),
        hub.tx(EntityOp::OpenAccount { counterparty: bob.entity, counterparty_signer: bob.signer }),
        bob.tx(EntityOp::OpenAccount { counterparty: hub.entity, counterparty_signer: hub.signer }),
    ];

    let mut last_snapshot: Option<std::path::PathBuf> = None;
    for _ in 0..ticks {
        let mut inputs = transport.collect();
        inputs.extend(chain.poll());
        inputs.append(&mut scheduled);

        let now_ts = 1_700_000_000 + env.tick + 1;
        append_wal(&wal_path, &WalRecord::TickInput {
            tick: env.tick + 1,
            now_ts,
            inputs: inputs.clone(),
        })?;

        let (next, outbox) = apply_runtime_tick(env, inputs, now_ts);
        env = next;

        append_wal(&wal_path, &WalRecord::TickOutput {
            tick: env.tick,
            messages: outbox.messages.clone(),
        })?;

        for intent in &outbox.intents {
            chain.submit(intent);
        }
        for diagnostic in &outbox.diagnostics {
            warn!(addressee = %diagnostic.addressee, error = %diagnostic.error, "diagnostic");
        }
        for dead in &outbox.dead_letters {
            warn!(entity = %dead.entity_id, "dead-lettered input");
        }
        transport.deliver(outbox.messages);

        // A routed payment every few ticks, once gossip knows the graph.
        if env.tick % 4 == 0 {
            let amount = rng.gen_range(50u128..500);
            match find_routes(&env.gossip, alice.entity, bob.entity, TOKEN, amount) {
                Ok(routes) => {
                    let route = &routes[0];
                    info!(
                        amount,
                        sending = route.amounts[0],
                        hops = route.hops.len(),
                        fee = route.total_fee,
                        "issuing routed payment"
                    );
                    scheduled.push(alice.tx(EntityOp::DirectPayment {
                        counterparty: route.hops[1],
                        token_id: TOKEN,
                        amount: route.amounts[0],
                        route_tail: route.hops[2..].to_vec(),
                    }));
                }
                Err(e) => info!(%e, "no route yet"),
            }
        }

        if let Some(kind) = &env.fatal {
            anyhow::bail!("kernel reported a fatal condition: {kind}");
        }

        if snapshot_every > 0 && env.tick % snapshot_every == 0 {
            let path = data_dir.join(format!("demo-{:04}.snap", env.tick));
            let root = save_snapshot(&env, &path)?;
            append_wal(&wal_path, &WalRecord::SnapshotRef {
                tick: env.tick,
                path: path.display().to_string(),
            })?;
            env.history_cursor = env.tick;
            info!(tick = env.tick, root = %root, "snapshot");
            last_snapshot = Some(path);
        }
    }

    // ── Verify crash recovery against the live run ───────────────────────────
    if let Some(snapshot) = last_snapshot {
        let replayed = xln_store::replay(&snapshot, &wal_path, &keys).context("verifying replay")?;
        anyhow::ensure!(
            replayed.persistent_eq(&env),
            "replayed env diverged from the live run"
        );
        info!("replay verification passed");
    }

    let summary = summarize(&env, &alice, &hub, &bob);
    println!("{summary}");
    Ok(())
}

fn attach_solo(
    env: &mut Env,
    keys: &KeyStore,
    id: u64,
    seed: [u8; 32],
    fee_ppm: u64,
    base_fee: u128,
) -> anyhow::Result<Actor> {
    let keypair = xln_crypto::Keypair::from_seed(seed).context("deriving entity key")?;
    let signer = SignerId(keypair.address());
    let entity = EntityId::from_low_u64(id);
    let mut state = EntityState::genesis(entity, ConsensusConfig::solo(signer));
    state.domain.routing_fee_ppm = fee_ppm;
    state.domain.base_fee = base_fee;
    env.attach_replica(state, signer, keys.keypair(&signer).context("keystore lookup")?);
    Ok(Actor { entity, signer, next_nonce: 0 })
}

fn summarize(env: &Env, alice: &Actor, hub: &Actor, bob: &Actor) -> String {
    let mut lines = vec![format!("final tick {}", env.tick)];
    for (name, actor, peer) in [
        ("alice→hub", alice, hub.entity),
        ("hub→bob", hub, bob.entity),
    ] {
        if let Some(replica) = env.replica(actor.entity, actor.signer) {
            if let Some(machine) = replica.state.accounts.get(&peer) {
                let delta = machine.deltas.get(&TOKEN);
                lines.push(format!(
                    "  {name}: height {} offdelta {}",
                    machine.current_frame.height,
                    delta.map(|d| d.offdelta).unwrap_or(0),
                ));
            }
        }
    }
    lines.join("\n")
}
