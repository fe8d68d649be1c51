//! Collaborator stubs: the two seams the kernel talks through.
//!
//! The jurisdiction adapter turns outbox intents into (eventually) chain
//! transactions and feeds confirmations back as ordinary entity inputs;
//! the transport drains the outbox and redelivers on later ticks. Both
//! in-memory implementations here are deterministic so scenario runs and
//! replays stay reproducible.

use std::collections::VecDeque;

use tracing::debug;

use xln_core::{EntityId, SignerId, TokenId};
use xln_entity::{
    EntityInput, EntityOp, EntityTx, JurisdictionEvent, JurisdictionIntent,
};

/// Wrap a confirmed jurisdiction event for submission to an entity.
pub fn event_input(entity_id: EntityId, event: JurisdictionEvent) -> EntityInput {
    EntityInput::to(entity_id, SignerId::UNROUTED)
        .with_txs(vec![EntityTx::external(EntityOp::JEvent(event))])
}

// ── Jurisdiction ─────────────────────────────────────────────────────────────

/// The chain-side collaborator. `submit` consumes intents; `poll` yields
/// confirmations addressed to entities, ready for the next tick.
pub trait Jurisdiction {
    fn submit(&mut self, intent: &JurisdictionIntent);
    fn poll(&mut self) -> Vec<EntityInput>;
}

/// Deterministic in-memory jurisdiction: every intent confirms
/// immediately, and test drivers can mint deposits directly.
#[derive(Debug, Default)]
pub struct MockJurisdiction {
    confirmations: VecDeque<EntityInput>,
}

impl MockJurisdiction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit collateral to both sides of an account, as a confirmed
    /// on-chain deposit would.
    pub fn deposit(
        &mut self,
        left: EntityId,
        right: EntityId,
        token_id: TokenId,
        collateral: u128,
    ) {
        self.confirmations.push_back(event_input(
            left,
            JurisdictionEvent::SettlementProcessed {
                counterparty: right,
                token_id,
                collateral,
                ondelta: 0,
            },
        ));
        self.confirmations.push_back(event_input(
            right,
            JurisdictionEvent::SettlementProcessed {
                counterparty: left,
                token_id,
                collateral,
                ondelta: 0,
            },
        ));
    }
}

impl Jurisdiction for MockJurisdiction {
    fn submit(&mut self, intent: &JurisdictionIntent) {
        match intent {
            JurisdictionIntent::RegisterEntity { entity_id, .. } => {
                debug!(entity = %entity_id, "mock chain: entity registered");
                self.confirmations.push_back(event_input(
                    *entity_id,
                    JurisdictionEvent::EntityRegistered { entity_id: *entity_id },
                ));
            }
            JurisdictionIntent::SettleDiffs { left, right, token_diffs, .. } => {
                // Move each net delta into on-chain state on both sides.
                for (token_id, diff) in token_diffs {
                    self.confirmations.push_back(event_input(
                        *left,
                        JurisdictionEvent::SettlementProcessed {
                            counterparty: *right,
                            token_id: *token_id,
                            collateral: 0,
                            ondelta: *diff,
                        },
                    ));
                    self.confirmations.push_back(event_input(
                        *right,
                        JurisdictionEvent::SettlementProcessed {
                            counterparty: *left,
                            token_id: *token_id,
                            collateral: 0,
                            ondelta: *diff,
                        },
                    ));
                }
            }
            JurisdictionIntent::FinalizeDispute { .. } => {
                debug!("mock chain: dispute finalization accepted");
            }
        }
    }

    fn poll(&mut self) -> Vec<EntityInput> {
        self.confirmations.drain(..).collect()
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// The network-side collaborator. Best effort only: implementations may
/// delay, duplicate and reorder; counters and frame chains absorb it.
pub trait Transport {
    fn deliver(&mut self, messages: Vec<EntityInput>);
    fn collect(&mut self) -> Vec<EntityInput>;
}

/// Same-process delivery queue. Optionally duplicates every n-th message
/// to exercise the replay tolerance the wire format promises.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    queue: VecDeque<EntityInput>,
    duplicate_every: Option<u64>,
    delivered: u64,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplication(every: u64) -> Self {
        Self { duplicate_every: Some(every.max(1)), ..Self::default() }
    }
}

impl Transport for LoopbackTransport {
    fn deliver(&mut self, messages: Vec<EntityInput>) {
        for message in messages {
            self.delivered += 1;
            if let Some(every) = self.duplicate_every {
                if self.delivered % every == 0 {
                    self.queue.push_back(message.clone());
                }
            }
            self.queue.push_back(message);
        }
    }

    fn collect(&mut self) -> Vec<EntityInput> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_jurisdiction_confirms_registration() {
        let mut j = MockJurisdiction::new();
        let entity = EntityId::from_low_u64(3);
        j.submit(&JurisdictionIntent::RegisterEntity {
            entity_id: entity,
            board_hash: xln_core::Hash32::ZERO,
        });
        let confirmations = j.poll();
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].entity_id, entity);
        assert!(j.poll().is_empty());
    }

    #[test]
    fn deposit_confirms_to_both_parties() {
        let mut j = MockJurisdiction::new();
        let (a, b) = (EntityId::from_low_u64(1), EntityId::from_low_u64(2));
        j.deposit(a, b, TokenId(1), 1_000);
        let confirmations = j.poll();
        assert_eq!(confirmations.len(), 2);
        assert_eq!(confirmations[0].entity_id, a);
        assert_eq!(confirmations[1].entity_id, b);
    }

    #[test]
    fn loopback_duplicates_on_schedule() {
        let mut t = LoopbackTransport::with_duplication(2);
        let msg = |n: u64| EntityInput::to(EntityId::from_low_u64(n), SignerId::UNROUTED);
        t.deliver(vec![msg(1), msg(2), msg(3), msg(4)]);
        let collected = t.collect();
        // Messages 2 and 4 arrive twice.
        assert_eq!(collected.len(), 6);
        assert!(t.collect().is_empty());
    }
}
