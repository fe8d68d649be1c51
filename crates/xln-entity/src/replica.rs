use tracing::{debug, info, warn};

use xln_core::constants::PROPOSAL_TIMEOUT_TICKS;
use xln_core::{ConsensusError, EntityId, SignerId};
use xln_crypto::Keypair;

use crate::input::{entity_frame_hash, EntityInput, ProposedEntityFrame};
use crate::jurisdiction::JurisdictionIntent;
use crate::state::{apply_frame, ApplyEffects, ConsensusMode, EntityState};
use crate::tx::{canonical_order, EntityOp, EntityTx};

// ── Outbox ───────────────────────────────────────────────────────────────────

/// A remote-party fault surfaced as data instead of an unwinding error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub addressee: EntityId,
    pub error: ConsensusError,
}

/// Everything a replica wants delivered after handling one input.
#[derive(Debug, Default, Clone)]
pub struct EntityOutbox {
    pub messages: Vec<EntityInput>,
    pub intents: Vec<JurisdictionIntent>,
    pub diagnostics: Vec<Diagnostic>,
}

impl EntityOutbox {
    pub fn merge(&mut self, other: EntityOutbox) {
        self.messages.extend(other.messages);
        self.intents.extend(other.intents);
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.intents.is_empty() && self.diagnostics.is_empty()
    }
}

// ── EntityReplica ────────────────────────────────────────────────────────────

/// One `(entity, signer)` slot of the replicated entity machine.
///
/// A replica owns its state exclusively; everything it wants from the
/// outside world leaves through the returned [`EntityOutbox`], and the
/// runtime never feeds those outputs back within the same tick.
#[derive(Debug, Clone)]
pub struct EntityReplica {
    pub entity_id: EntityId,
    pub signer_id: SignerId,
    pub state: EntityState,
    pub mempool: Vec<EntityTx>,
    pub proposal: Option<ProposedEntityFrame>,
    pub locked_frame: Option<ProposedEntityFrame>,
    /// Advances only on proposal timeout; selects the proposer slot.
    pub round: u64,
    /// Tick at which the live proposal (or lock) was formed.
    pub proposal_tick: u64,
    pub keypair: Keypair,
}

impl EntityReplica {
    pub fn new(state: EntityState, signer_id: SignerId, keypair: Keypair) -> Self {
        Self {
            entity_id: state.entity_id,
            signer_id,
            state,
            mempool: Vec::new(),
            proposal: None,
            locked_frame: None,
            round: 0,
            proposal_tick: 0,
            keypair,
        }
    }

    /// Proposer for the current round. In gossip mode every validator may
    /// propose.
    pub fn is_proposer(&self) -> bool {
        match self.state.config.mode {
            ConsensusMode::Gossip => true,
            ConsensusMode::Proposer => self.state.config.proposer_for(self.round) == self.signer_id,
        }
    }

    /// Does this replica own network emission of bilateral messages and
    /// jurisdiction intents? Exactly one replica per entity does.
    fn is_account_emitter(&self) -> bool {
        self.state.config.account_signer() == self.signer_id
    }

    /// Submit a locally-originated tx.
    pub fn add_tx(&mut self, tx: EntityTx) {
        self.mempool.push(tx);
    }

    fn other_validators(&self) -> Vec<SignerId> {
        self.state
            .config
            .validators
            .iter()
            .copied()
            .filter(|v| *v != self.signer_id)
            .collect()
    }

    // ── Propose ──────────────────────────────────────────────────────────────

    /// ADD_TX → PROPOSE. Drains nothing; the mempool empties only when a
    /// frame commits. Returns the broadcast to the other validators, or
    /// commits immediately when our own share already meets threshold.
    pub fn maybe_propose(&mut self, now_ts: u64, tick: u64) -> EntityOutbox {
        let mut out = EntityOutbox::default();
        if !self.is_proposer()
            || self.proposal.is_some()
            || (self.mempool.is_empty() && !self.state.has_account_work())
        {
            return out;
        }

        let txs = canonical_order(self.mempool.clone());
        let (new_state, _) = apply_frame(&self.state, &txs, now_ts);
        let frame_hash = entity_frame_hash(new_state.height, &txs);
        let own_sig = match self.keypair.sign_hash(frame_hash.as_bytes()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(entity = %self.entity_id, %e, "cannot sign own proposal");
                return out;
            }
        };

        let frame = ProposedEntityFrame {
            height: new_state.height,
            txs,
            frame_hash,
            new_state,
            signatures: [(self.signer_id, own_sig)].into_iter().collect(),
        };
        debug!(entity = %self.entity_id, height = frame.height, "proposed entity frame");
        self.proposal = Some(frame.clone());
        self.proposal_tick = tick;

        if frame.verified_power(&self.state.config) >= self.state.config.threshold {
            out.merge(self.commit_current_proposal());
            return out;
        }
        for validator in self.other_validators() {
            let mut msg = EntityInput::to(self.entity_id, validator);
            msg.proposed_frame = Some(frame.clone());
            out.messages.push(msg);
        }
        out
    }

    // ── Input handling ───────────────────────────────────────────────────────

    pub fn handle_input(&mut self, input: &EntityInput, tick: u64) -> EntityOutbox {
        let mut out = EntityOutbox::default();

        if !input.entity_txs.is_empty() {
            out.merge(self.ingest_txs(&input.entity_txs));
        }
        if let Some(frame) = &input.proposed_frame {
            out.merge(self.handle_proposal(frame, tick));
        }
        if !input.precommits.is_empty() {
            out.merge(self.handle_precommits(input));
        }
        if let Some(frame) = &input.commit_notification {
            out.merge(self.handle_notification(frame));
        }
        out
    }

    /// Txs submitted to a non-proposer are forwarded to the proposer slot,
    /// never applied locally.
    fn ingest_txs(&mut self, txs: &[EntityTx]) -> EntityOutbox {
        let mut out = EntityOutbox::default();
        if self.is_proposer() {
            self.mempool.extend(txs.iter().cloned());
        } else {
            let proposer = self.state.config.proposer_for(self.round);
            out.messages
                .push(EntityInput::to(self.entity_id, proposer).with_txs(txs.to_vec()));
        }
        out
    }

    /// PROPOSE → PRECOMMIT on the validator side: verify, lock, sign.
    fn handle_proposal(&mut self, frame: &ProposedEntityFrame, tick: u64) -> EntityOutbox {
        let mut out = EntityOutbox::default();
        if frame.height <= self.state.height {
            return out; // duplicate of something already committed
        }
        if frame.height != self.state.height + 1 {
            out.diagnostics.push(Diagnostic {
                addressee: self.entity_id,
                error: ConsensusError::HeightMismatch {
                    expected: self.state.height + 1,
                    got: frame.height,
                },
            });
            return out;
        }
        if entity_frame_hash(frame.height, &frame.txs) != frame.frame_hash {
            out.diagnostics.push(Diagnostic {
                addressee: self.entity_id,
                error: ConsensusError::FrameHashMismatch,
            });
            return out;
        }
        // Re-execute and demand the exact advertised state.
        let (reexec, _) = apply_frame(&self.state, &frame.txs, frame.new_state.timestamp);
        if reexec.state_hash() != frame.new_state.state_hash() {
            out.diagnostics.push(Diagnostic {
                addressee: self.entity_id,
                error: ConsensusError::StateDivergence,
            });
            return out;
        }
        // CometBFT lock: once precommitted at a height, never sign a
        // conflicting frame at that height.
        if let Some(locked) = &self.locked_frame {
            if locked.height == frame.height && locked.frame_hash != frame.frame_hash {
                warn!(entity = %self.entity_id, height = frame.height, "conflicting proposal at locked height");
                out.diagnostics.push(Diagnostic {
                    addressee: self.entity_id,
                    error: ConsensusError::LockedOnDifferentFrame,
                });
                return out;
            }
        }
        self.locked_frame = Some(frame.clone());
        self.proposal_tick = tick;

        match self.keypair.sign_hash(frame.frame_hash.as_bytes()) {
            Ok(sig) => {
                let proposer = self.state.config.proposer_for(self.round);
                let mut msg = EntityInput::to(self.entity_id, proposer);
                msg.precommits = [(self.signer_id, sig)].into_iter().collect();
                out.messages.push(msg);
            }
            Err(e) => warn!(entity = %self.entity_id, %e, "cannot sign precommit"),
        }
        out
    }

    /// PRECOMMIT → COMMIT on the proposer side.
    fn handle_precommits(&mut self, input: &EntityInput) -> EntityOutbox {
        let mut out = EntityOutbox::default();
        let Some(proposal) = self.proposal.as_mut() else {
            return out; // stale precommit for an abandoned proposal
        };
        for (signer, sig) in &input.precommits {
            if self.state.config.share_of(signer) == 0 {
                continue;
            }
            let recovered = sig.recover(proposal.frame_hash.as_bytes());
            if recovered.map(|a| a != signer.0).unwrap_or(true) {
                out.diagnostics.push(Diagnostic {
                    addressee: self.entity_id,
                    error: ConsensusError::Crypto(xln_crypto::CryptoError::InvalidSignature),
                });
                continue;
            }
            match proposal.signatures.get(signer) {
                Some(existing) if existing != sig => {
                    // Two valid, distinct signatures over the same height
                    // cannot happen for an honest signer.
                    out.diagnostics.push(Diagnostic {
                        addressee: self.entity_id,
                        error: ConsensusError::DoubleSign,
                    });
                }
                Some(_) => {}
                None => {
                    proposal.signatures.insert(*signer, *sig);
                }
            }
        }

        let power = self.proposal.as_ref().expect("checked above").verified_power(&self.state.config);
        if power >= self.state.config.threshold {
            out.merge(self.commit_current_proposal());
        } else {
            debug!(entity = %self.entity_id, power, threshold = self.state.config.threshold, "quorum pending");
        }
        out
    }

    /// Proposer-side commit: adopt the proposed state, notify validators.
    fn commit_current_proposal(&mut self) -> EntityOutbox {
        let frame = self.proposal.take().expect("commit requires a live proposal");
        let mut out = self.adopt(&frame);
        if self.state.height == frame.height {
            for validator in self.other_validators() {
                let mut msg = EntityInput::to(self.entity_id, validator);
                msg.commit_notification = Some(frame.clone());
                out.messages.push(msg);
            }
        }
        out
    }

    /// Validator-side commit on a quorum-carrying notification.
    fn handle_notification(&mut self, frame: &ProposedEntityFrame) -> EntityOutbox {
        let mut out = EntityOutbox::default();
        if frame.height <= self.state.height {
            return out; // already there
        }
        if frame.height != self.state.height + 1 {
            out.diagnostics.push(Diagnostic {
                addressee: self.entity_id,
                error: ConsensusError::HeightMismatch {
                    expected: self.state.height + 1,
                    got: frame.height,
                },
            });
            return out;
        }
        if entity_frame_hash(frame.height, &frame.txs) != frame.frame_hash {
            out.diagnostics.push(Diagnostic {
                addressee: self.entity_id,
                error: ConsensusError::FrameHashMismatch,
            });
            return out;
        }
        let power = frame.verified_power(&self.state.config);
        if power < self.state.config.threshold {
            out.diagnostics.push(Diagnostic {
                addressee: self.entity_id,
                error: ConsensusError::InsufficientPower {
                    power,
                    threshold: self.state.config.threshold,
                },
            });
            return out;
        }
        let (reexec, _) = apply_frame(&self.state, &frame.txs, frame.new_state.timestamp);
        if reexec.state_hash() != frame.new_state.state_hash() {
            out.diagnostics.push(Diagnostic {
                addressee: self.entity_id,
                error: ConsensusError::StateDivergence,
            });
            return out;
        }
        out.merge(self.adopt(frame));
        out
    }

    /// Apply a fully-agreed frame atomically: swap in the new state, drain
    /// committed txs, clear consensus scratch, emit effects once.
    fn adopt(&mut self, frame: &ProposedEntityFrame) -> EntityOutbox {
        if frame.height != self.state.height + 1 {
            warn!(
                entity = %self.entity_id,
                at = self.state.height,
                frame = frame.height,
                "refusing to adopt out-of-sequence frame"
            );
            return EntityOutbox::default();
        }
        let (_, fx) = apply_frame(&self.state, &frame.txs, frame.new_state.timestamp);
        self.state = frame.new_state.clone();
        self.locked_frame = None;
        self.proposal = None;
        let committed_nonces = self.state.nonces.clone();
        self.mempool.retain(|tx| {
            if frame.txs.contains(tx) {
                return false;
            }
            if tx.is_external() {
                return true;
            }
            tx.nonce > committed_nonces.get(&tx.sender).copied().unwrap_or(0)
        });
        info!(
            entity = %self.entity_id,
            signer = %self.signer_id,
            height = self.state.height,
            "committed entity frame"
        );
        self.emit_effects(fx)
    }

    /// Materialize the deterministic side effects of a committed frame.
    /// Every replica computes them; only the account-emitter replica signs
    /// and sends, so the network sees each message exactly once.
    fn emit_effects(&mut self, fx: ApplyEffects) -> EntityOutbox {
        let mut out = EntityOutbox::default();
        if !self.is_account_emitter() {
            return out;
        }
        for (counterparty, action) in &fx.account_actions {
            let xln_account::AccountAction::AckCommitted { frame, their_sig } = action else {
                continue;
            };
            let Some(machine) = self.state.accounts.get(counterparty) else { continue };
            match machine.ack_input(frame, *their_sig, &self.keypair) {
                Ok(ack) => out.messages.push(wrap_account_input(*counterparty, ack)),
                Err(e) => warn!(entity = %self.entity_id, %e, "cannot sign account ack"),
            }
        }
        for counterparty in &fx.proposals_ready {
            let Some(machine) = self.state.accounts.get(counterparty) else { continue };
            match machine.proposal_input(&self.keypair) {
                Ok(proposal) => out.messages.push(wrap_account_input(*counterparty, proposal)),
                Err(e) => warn!(entity = %self.entity_id, %e, "cannot sign account proposal"),
            }
        }
        out.intents.extend(fx.intents);
        out.diagnostics.extend(
            fx.faults
                .into_iter()
                .map(|(addressee, error)| Diagnostic { addressee, error }),
        );
        out
    }

    // ── Timeouts ─────────────────────────────────────────────────────────────

    /// Logical-time staleness sweep. A proposal that never reached quorum
    /// is abandoned and the proposer slot rotates; its txs were never
    /// drained, so the next proposer picks them up.
    pub fn tick_maintenance(&mut self, tick: u64) {
        if let Some(proposal) = &self.proposal {
            if tick.saturating_sub(self.proposal_tick) >= PROPOSAL_TIMEOUT_TICKS {
                warn!(
                    entity = %self.entity_id,
                    height = proposal.height,
                    round = self.round,
                    "proposal timed out, rotating proposer"
                );
                self.proposal = None;
                self.round += 1;
            }
        }
    }
}

/// Ride a bilateral message on the entity wire toward the counterparty.
fn wrap_account_input(counterparty: EntityId, input: xln_account::AccountInput) -> EntityInput {
    EntityInput::to(counterparty, SignerId::UNROUTED)
        .with_txs(vec![EntityTx::external(EntityOp::AccountInput(input))])
}
