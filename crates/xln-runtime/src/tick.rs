use std::collections::BTreeMap;

use tracing::{debug, warn};

use xln_entity::EntityInput;
use xln_gossip::{derive_profile, ProfileMetadata};

use crate::env::{Env, Outbox, ReplicaKey};

/// One deterministic step of the whole runtime.
///
/// Inputs are grouped by `(entity, signer)`, arrival order preserved
/// inside a group and groups processed in lexicographic key order, then
/// routed to their replicas. Outputs accumulate in emission order and are
/// returned to the driver; nothing produced here is fed back within the
/// same tick. Byte-identical across runs for identical `(env, inputs,
/// now_ts)`.
pub fn apply_runtime_tick(mut env: Env, inputs: Vec<EntityInput>, now_ts: u64) -> (Env, Outbox) {
    env.tick += 1;
    env.timestamp = now_ts;
    let tick = env.tick;
    let mut outbox = Outbox::default();

    // ── Merge: group while preserving per-group arrival order ────────────────
    let mut groups: BTreeMap<ReplicaKey, Vec<EntityInput>> = BTreeMap::new();
    for input in inputs {
        match env.resolve(input.entity_id, input.signer_id) {
            Some(key) => groups.entry(key).or_default().push(input),
            None => {
                warn!(entity = %input.entity_id, "no replica for input, dead-lettering");
                outbox.dead_letters.push(input);
            }
        }
    }

    // ── Route ────────────────────────────────────────────────────────────────
    for (key, group) in groups {
        let replica = env.replicas.get_mut(&key).expect("resolved keys are live");
        for input in group {
            outbox.absorb(replica.handle_input(&input, tick));
        }
    }

    // ── Maintenance and proposals, in slot order ─────────────────────────────
    for replica in env.replicas.values_mut() {
        replica.tick_maintenance(tick);
        outbox.absorb(replica.maybe_propose(now_ts, tick));
    }

    // ── Gossip announce: one profile per entity, from its emitter slot ───────
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
            now_ts,
        );
        env.gossip.merge(profile);
    }

    debug!(
        tick,
        messages = outbox.messages.len(),
        intents = outbox.intents.len(),
        diagnostics = outbox.diagnostics.len(),
        "tick complete"
    );
    env.outbox = outbox.clone();
    (env, outbox)
}
