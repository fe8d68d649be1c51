use std::collections::BTreeMap;

use tracing::{debug, warn};

use xln_codec::{list_of, vec_of, CodecError, Item, Rlp};
use xln_core::{ConsensusError, EntityId, SignerId, TokenId};
use xln_crypto::{CryptoError, Keypair, Signature};

use crate::delta::Delta;
use crate::frame::AccountFrame;
use crate::tx::AccountTx;
use crate::wire::AccountInput;

// ── Pending forward ──────────────────────────────────────────────────────────

/// Routing hint left behind by a committed multi-hop payment: the entity
/// machine consumes it on its next tick and opens the next hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingForward {
    pub token_id: TokenId,
    pub amount: u128,
    pub route_tail: Vec<EntityId>,
}

impl Rlp for PendingForward {
    fn to_item(&self) -> Item {
        Item::list(vec![
            self.token_id.to_item(),
            Item::uint(self.amount),
            list_of(&self.route_tail),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [token, amount, tail] => Ok(Self {
                token_id: TokenId::from_item(token)?,
                amount: amount.as_uint()?,
                route_tail: vec_of(tail)?,
            }),
            _ => Err(CodecError::Malformed("pending forward must have three fields")),
        }
    }
}

// ── Actions ──────────────────────────────────────────────────────────────────

/// What the caller must do after feeding an input to the machine. The
/// machine itself never signs or sends; it only mutates deterministic
/// consensus state and describes the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountAction {
    /// A counterparty frame was validated and committed; countersign and
    /// send the acknowledgement carrying `their_sig` plus our own.
    AckCommitted { frame: AccountFrame, their_sig: Signature },

    /// Our pending frame was acknowledged by the counterparty and is now
    /// committed. Nothing to send.
    Committed { frame: AccountFrame },

    /// Stale or tie-break-losing message absorbed without effect.
    Ignored,
}

// ── AccountMachine ───────────────────────────────────────────────────────────

/// One party's authoritative view of a bilateral account.
///
/// Frames alternate `Idle → Pending → Idle`; at most one pending frame
/// exists at a time, counters never decrease, and `deltas` always matches
/// `current_frame.deltas_post`. Channels are coinductive: there is no
/// terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMachine {
    pub entity_id: EntityId,
    pub counterparty_id: EntityId,
    /// Address our frame signatures recover to.
    pub local_signer: SignerId,
    /// Address the counterparty's signatures must recover to.
    /// `SignerId::UNROUTED` until bound by the first validated proposal.
    pub remote_signer: SignerId,
    pub current_frame: AccountFrame,
    pub pending_frame: Option<AccountFrame>,
    pub mempool: Vec<AccountTx>,
    pub send_counter: u64,
    pub recv_counter: u64,
    pub deltas: BTreeMap<TokenId, Delta>,
    pub pending_forward: Option<PendingForward>,
    pub rollbacks: u64,
}

impl AccountMachine {
    pub fn new(
        entity_id: EntityId,
        counterparty_id: EntityId,
        local_signer: SignerId,
        remote_signer: SignerId,
    ) -> Self {
        Self {
            entity_id,
            counterparty_id,
            local_signer,
            remote_signer,
            // The genesis anchor is timeless: both parties may create their
            // machines on different ticks and must still agree on it.
            current_frame: AccountFrame::genesis(0),
            pending_frame: None,
            mempool: Vec::new(),
            send_counter: 0,
            recv_counter: 0,
            deltas: BTreeMap::new(),
            pending_forward: None,
            rollbacks: 0,
        }
    }

    /// Canonical perspective: are we the lower id of the pair?
    pub fn is_left(&self) -> bool {
        self.entity_id < self.counterparty_id
    }

    pub fn queue_tx(&mut self, tx: AccountTx) {
        self.mempool.push(tx);
    }

    /// Delta table as a token-sorted vector (the `deltas_post` form).
    pub fn deltas_vec(&self) -> Vec<Delta> {
        self.deltas.values().cloned().collect()
    }

    pub fn take_pending_forward(&mut self) -> Option<PendingForward> {
        self.pending_forward.take()
    }

    // ── Proposal ─────────────────────────────────────────────────────────────

    /// Drain the mempool into a pending frame. Returns `Ok(None)` when
    /// there is nothing to do (empty mempool or a frame already in
    /// flight). Any tx that would break RCPAN fails the call; the
    /// offending txs are discarded so the account can make progress, and
    /// committed state is untouched.
    pub fn propose_frame(
        &mut self,
        timestamp: u64,
    ) -> Result<Option<&AccountFrame>, ConsensusError> {
        if self.mempool.is_empty() || self.pending_frame.is_some() {
            return Ok(None);
        }

        let from_left = self.is_left();
        let mut working = self.deltas.clone();
        let mut valid = Vec::new();
        let mut first_err = None;
        for tx in self.mempool.drain(..) {
            match apply_tx(&mut working, &tx, from_left) {
                Ok(()) => valid.push(tx),
                Err(e) => {
                    warn!(counterparty = %self.counterparty_id, %e, "discarding invalid account tx");
                    first_err.get_or_insert(e);
                }
            }
        }
        self.mempool = valid;
        if let Some(e) = first_err {
            return Err(e);
        }

        let frame = AccountFrame {
            height: self.current_frame.height + 1,
            timestamp,
            prev_frame_hash: self.current_frame.state_hash(),
            txs: std::mem::take(&mut self.mempool),
            token_ids: working.keys().copied().collect(),
            deltas_post: working.values().cloned().collect(),
        };
        debug!(
            counterparty = %self.counterparty_id,
            height = frame.height,
            txs = frame.txs.len(),
            "proposed account frame"
        );
        self.send_counter += 1;
        self.pending_frame = Some(frame);
        Ok(self.pending_frame.as_ref())
    }

    /// Wire form of the pending proposal, signed with our account key.
    /// Only the replica that owns emission calls this.
    pub fn proposal_input(&self, keypair: &Keypair) -> Result<AccountInput, ConsensusError> {
        let pending = self.pending_frame.as_ref().ok_or(ConsensusError::StateDivergence)?;
        let new_sig = keypair.sign_hash(pending.state_hash().as_bytes())?;
        let prev_sig = keypair.sign_hash(self.current_frame.state_hash().as_bytes())?;
        Ok(AccountInput {
            from_entity_id: self.entity_id,
            to_entity_id: self.counterparty_id,
            height: pending.height,
            new_account_frame: Some(pending.clone()),
            new_signatures: vec![new_sig],
            prev_signatures: vec![prev_sig],
            counter: self.send_counter,
        })
    }

    /// Wire form of the acknowledgement for a frame we just committed in
    /// [`AccountAction::AckCommitted`].
    pub fn ack_input(
        &self,
        frame: &AccountFrame,
        their_sig: Signature,
        keypair: &Keypair,
    ) -> Result<AccountInput, ConsensusError> {
        let our_sig = keypair.sign_hash(frame.state_hash().as_bytes())?;
        let prev_sig = keypair.sign_hash(frame.prev_frame_hash.as_bytes())?;
        Ok(AccountInput {
            from_entity_id: self.entity_id,
            to_entity_id: self.counterparty_id,
            height: frame.height,
            new_account_frame: None,
            new_signatures: vec![their_sig, our_sig],
            prev_signatures: vec![prev_sig],
            counter: self.send_counter,
        })
    }

    // ── Input handling ───────────────────────────────────────────────────────

    /// Feed one wire message to the machine. Deterministic: every replica
    /// of the owning entity applies the same mutation.
    pub fn handle_input(&mut self, input: &AccountInput) -> Result<AccountAction, ConsensusError> {
        if input.to_entity_id != self.entity_id || input.from_entity_id != self.counterparty_id {
            return Err(ConsensusError::UnknownAccount(input.from_entity_id));
        }

        // Replay guard: the stream is strictly sequential per direction.
        if input.counter != self.recv_counter + 1 {
            if input.counter <= self.recv_counter {
                self.rollbacks += 1;
            }
            return Err(ConsensusError::Replay {
                expected: self.recv_counter + 1,
                got: input.counter,
            });
        }
        self.recv_counter = input.counter;

        match (&input.new_account_frame, self.pending_frame.is_some()) {
            // Counterparty proposal, no local frame in flight.
            (Some(frame), false) => self.accept_proposal(frame.clone(), input),

            // Simultaneous proposals: the left party's frame wins.
            (Some(frame), true) => {
                if self.is_left() {
                    // Ours wins; theirs is absorbed and they will adopt ours.
                    debug!(counterparty = %self.counterparty_id, "dropping losing simultaneous proposal");
                    Ok(AccountAction::Ignored)
                } else {
                    let ours = self.pending_frame.take().expect("pending frame present");
                    let mut requeued = ours.txs;
                    requeued.extend(std::mem::take(&mut self.mempool));
                    self.mempool = requeued;
                    debug!(counterparty = %self.counterparty_id, "yielding to left proposal, txs requeued");
                    self.accept_proposal(frame.clone(), input)
                }
            }

            // Acknowledgement for our pending frame.
            (None, true) => self.accept_ack(input),

            // No frame on either side: stale chatter.
            (None, false) => {
                self.rollbacks += 1;
                Ok(AccountAction::Ignored)
            }
        }
    }

    fn accept_proposal(
        &mut self,
        frame: AccountFrame,
        input: &AccountInput,
    ) -> Result<AccountAction, ConsensusError> {
        // Stale re-proposal of an already-committed height: count and drop.
        if frame.height <= self.current_frame.height {
            self.rollbacks += 1;
            return Ok(AccountAction::Ignored);
        }
        if frame.height != self.current_frame.height + 1 {
            return Err(ConsensusError::HeightMismatch {
                expected: self.current_frame.height + 1,
                got: frame.height,
            });
        }
        let current_hash = self.current_frame.state_hash();
        if frame.prev_frame_hash != current_hash {
            return Err(ConsensusError::ChainBroken {
                expected: current_hash,
                got: frame.prev_frame_hash,
            });
        }

        // Re-execute the txs from the counterparty's perspective and demand
        // an exact match with the advertised post state.
        let mut working = self.deltas.clone();
        for tx in &frame.txs {
            apply_tx(&mut working, tx, !self.is_left())?;
        }
        let expected_tokens: Vec<TokenId> = working.keys().copied().collect();
        let expected_deltas: Vec<Delta> = working.values().cloned().collect();
        if frame.token_ids != expected_tokens || frame.deltas_post != expected_deltas {
            return Err(ConsensusError::StateDivergence);
        }

        // Both signatures must recover to the counterparty's account key.
        let frame_hash = frame.state_hash();
        let new_sig = *input
            .new_signatures
            .first()
            .ok_or(CryptoError::InvalidSignature)?;
        let signer = self.expect_remote(new_sig.recover(frame_hash.as_bytes())?)?;
        let prev_sig = input
            .prev_signatures
            .first()
            .ok_or(CryptoError::InvalidSignature)?;
        if prev_sig.recover(current_hash.as_bytes())? != signer.0 {
            return Err(CryptoError::InvalidSignature.into());
        }

        // An incoming payment with hops left asks us to forward; the entity
        // machine consumes the hint on its next tick, never within this one.
        for tx in &frame.txs {
            if let AccountTx::Payment { token_id, amount, route_tail } = tx {
                if !route_tail.is_empty() {
                    self.pending_forward = Some(PendingForward {
                        token_id: *token_id,
                        amount: *amount,
                        route_tail: route_tail.clone(),
                    });
                }
            }
        }

        self.commit(frame.clone());
        // The acknowledgement we are about to emit occupies the next slot
        // of our send stream.
        self.send_counter += 1;
        Ok(AccountAction::AckCommitted { frame, their_sig: new_sig })
    }

    fn accept_ack(&mut self, input: &AccountInput) -> Result<AccountAction, ConsensusError> {
        let pending = self.pending_frame.as_ref().expect("ack path requires pending");
        if input.height != pending.height {
            return Err(ConsensusError::HeightMismatch {
                expected: pending.height,
                got: input.height,
            });
        }
        let pending_hash = pending.state_hash();
        let mut countersigner = None;
        for sig in &input.new_signatures {
            let Ok(addr) = sig.recover(pending_hash.as_bytes()) else { continue };
            if addr == self.local_signer.0 {
                continue; // our own signature echoed back
            }
            if self.remote_signer == SignerId::UNROUTED || self.remote_signer.0 == addr {
                countersigner = Some(SignerId(addr));
                break;
            }
        }
        let Some(countersigner) = countersigner else {
            return Err(CryptoError::InvalidSignature.into());
        };
        if self.remote_signer == SignerId::UNROUTED {
            self.remote_signer = countersigner;
        }

        let frame = self.pending_frame.take().expect("pending frame present");
        self.commit(frame.clone());
        Ok(AccountAction::Committed { frame })
    }

    /// Adopt a fully-agreed frame.
    fn commit(&mut self, frame: AccountFrame) {
        self.deltas = frame
            .deltas_post
            .iter()
            .map(|d| (d.token_id, d.clone()))
            .collect();
        debug!(
            counterparty = %self.counterparty_id,
            height = frame.height,
            "committed account frame"
        );
        self.current_frame = frame;
    }

    /// Bind or verify the counterparty's signing address.
    fn expect_remote(&mut self, addr: [u8; 20]) -> Result<SignerId, ConsensusError> {
        if self.remote_signer == SignerId::UNROUTED {
            self.remote_signer = SignerId(addr);
            return Ok(self.remote_signer);
        }
        self.check_remote(addr)
            .ok_or_else(|| CryptoError::InvalidSignature.into())
    }

    fn check_remote(&self, addr: [u8; 20]) -> Option<SignerId> {
        (self.remote_signer != SignerId::UNROUTED && self.remote_signer.0 == addr)
            .then_some(self.remote_signer)
    }

    /// Jurisdiction-confirmed collateral movement. On-chain state is
    /// authoritative for both parties, so this bypasses bilateral frames:
    /// each side applies the same confirmed event to its own table.
    pub fn apply_onchain_deposit(&mut self, token_id: TokenId, collateral: u128, ondelta: i128) {
        let delta = self.deltas.entry(token_id).or_insert_with(|| Delta::new(token_id));
        delta.collateral = delta.collateral.saturating_add(collateral);
        delta.ondelta = delta.ondelta.saturating_add(ondelta);
    }

    /// Finalize the delta vector through the subcontract engine, as the
    /// dispute / settlement path does.
    pub fn finalize_deltas(
        &self,
        now: u64,
        reveals: &BTreeMap<xln_core::Hash32, Vec<u8>>,
    ) -> Result<Vec<Delta>, ConsensusError> {
        crate::subcontract::apply_subcontracts(&self.deltas_vec(), now, reveals)
    }
}

/// Apply one tx to a working delta table. `from_left` is the proposer's
/// perspective and fixes payment direction and credit-line side.
fn apply_tx(
    deltas: &mut BTreeMap<TokenId, Delta>,
    tx: &AccountTx,
    from_left: bool,
) -> Result<(), ConsensusError> {
    let delta = deltas.entry(tx.token_id()).or_insert_with(|| Delta::new(tx.token_id()));
    match tx {
        AccountTx::Payment { amount, .. } => delta.apply_payment(*amount, from_left),
        AccountTx::SetCredit { amount, .. } => {
            if from_left {
                delta.credit_left = *amount;
            } else {
                delta.credit_right = *amount;
            }
            if !delta.rcpan_ok() {
                return Err(ConsensusError::RcpanViolation {
                    token_id: delta.token_id,
                    attempted_delta: delta.total(),
                });
            }
            Ok(())
        }
        AccountTx::AddSubcontract { contract, .. } => {
            delta.subcontracts.push(contract.clone());
            Ok(())
        }
    }
}

impl Rlp for AccountMachine {
    fn to_item(&self) -> Item {
        Item::list(vec![
            self.entity_id.to_item(),
            self.counterparty_id.to_item(),
            self.local_signer.to_item(),
            self.remote_signer.to_item(),
            self.current_frame.to_item(),
            Item::opt(self.pending_frame.as_ref().map(Rlp::to_item)),
            list_of(&self.mempool),
            Item::uint(self.send_counter as u128),
            Item::uint(self.recv_counter as u128),
            Item::List(self.deltas.values().map(Rlp::to_item).collect()),
            Item::opt(self.pending_forward.as_ref().map(Rlp::to_item)),
            Item::uint(self.rollbacks as u128),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [entity, counterparty, local, remote, current, pending, mempool, sent, recv, deltas, forward, rollbacks] => {
                let delta_list: Vec<Delta> = vec_of(deltas)?;
                Ok(Self {
                    entity_id: EntityId::from_item(entity)?,
                    counterparty_id: EntityId::from_item(counterparty)?,
                    local_signer: SignerId::from_item(local)?,
                    remote_signer: SignerId::from_item(remote)?,
                    current_frame: AccountFrame::from_item(current)?,
                    pending_frame: pending.as_opt()?.map(AccountFrame::from_item).transpose()?,
                    mempool: vec_of(mempool)?,
                    send_counter: sent.as_u64()?,
                    recv_counter: recv.as_u64()?,
                    deltas: delta_list.into_iter().map(|d| (d.token_id, d)).collect(),
                    pending_forward: forward.as_opt()?.map(PendingForward::from_item).transpose()?,
                    rollbacks: rollbacks.as_u64()?,
                })
            }
            _ => Err(CodecError::Malformed("account machine must have twelve fields")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Delta;
    use xln_core::Hash32;

    const TOKEN: TokenId = TokenId(1);

    fn fund(machine: &mut AccountMachine, collateral: u128, credit_left: u128, credit_right: u128) {
        let mut d = Delta::new(TOKEN);
        d.collateral = collateral;
        d.credit_left = credit_left;
        d.credit_right = credit_right;
        machine.deltas.insert(TOKEN, d);
    }

    /// Alice (lower id, left) and Bob (right) with mirrored machines.
    fn pair() -> (AccountMachine, AccountMachine, Keypair, Keypair) {
        let alice = EntityId::from_low_u64(1);
        let bob = EntityId::from_low_u64(2);
        let kp_a = Keypair::from_seed([0xA1; 32]).unwrap();
        let kp_b = Keypair::from_seed([0xB1; 32]).unwrap();
        let ma = AccountMachine::new(alice, bob, SignerId(kp_a.address()), SignerId(kp_b.address()));
        let mb = AccountMachine::new(bob, alice, SignerId(kp_b.address()), SignerId(kp_a.address()));
        (ma, mb, kp_a, kp_b)
    }

    fn payment(amount: u128) -> AccountTx {
        AccountTx::Payment { token_id: TOKEN, amount, route_tail: vec![] }
    }

    #[test]
    fn bilateral_commit_flow() {
        let (mut ma, mut mb, kp_a, kp_b) = pair();
        fund(&mut ma, 1_000, 0, 0);
        fund(&mut mb, 1_000, 0, 0);

        ma.queue_tx(payment(100));
        assert!(ma.propose_frame(10).unwrap().is_some());
        let proposal = ma.proposal_input(&kp_a).unwrap();
        assert_eq!(proposal.counter, 1);

        let action = mb.handle_input(&proposal).unwrap();
        let (frame, their_sig) = match action {
            AccountAction::AckCommitted { frame, their_sig } => (frame, their_sig),
            other => panic!("expected ack, got {other:?}"),
        };
        assert_eq!(mb.current_frame.height, 1);
        assert_eq!(mb.deltas[&TOKEN].offdelta, 100);

        let ack = mb.ack_input(&frame, their_sig, &kp_b).unwrap();
        let action = ma.handle_input(&ack).unwrap();
        assert!(matches!(action, AccountAction::Committed { .. }));
        assert_eq!(ma.current_frame.height, 1);
        assert_eq!(ma.deltas[&TOKEN].offdelta, 100);
        assert!(ma.deltas[&TOKEN].rcpan_ok());
        assert!(ma.pending_frame.is_none());
        assert_eq!(ma.current_frame.prev_frame_hash, AccountFrame::genesis(0).state_hash());
    }

    #[test]
    fn replayed_input_is_rejected_without_effect() {
        let (mut ma, mut mb, kp_a, kp_b) = pair();
        fund(&mut ma, 1_000, 0, 0);
        fund(&mut mb, 1_000, 0, 0);

        ma.queue_tx(payment(100));
        ma.propose_frame(10).unwrap();
        let proposal = ma.proposal_input(&kp_a).unwrap();
        let action = mb.handle_input(&proposal).unwrap();
        let (frame, their_sig) = match action {
            AccountAction::AckCommitted { frame, their_sig } => (frame, their_sig),
            other => panic!("unexpected {other:?}"),
        };
        let _ack = mb.ack_input(&frame, their_sig, &kp_b).unwrap();

        // Alice replays her original proposal: counter 1 against recv 1.
        let err = mb.handle_input(&proposal).unwrap_err();
        assert_eq!(err, ConsensusError::Replay { expected: 2, got: 1 });
        assert_eq!(mb.current_frame.height, 1);
        assert_eq!(mb.deltas[&TOKEN].offdelta, 100);
        assert_eq!(mb.rollbacks, 1);
    }

    #[test]
    fn propose_rejects_rcpan_violation() {
        let (mut ma, _, _, _) = pair();
        let mut ma = {
            fund(&mut ma, 1_000, 0, 0);
            ma
        };
        ma.queue_tx(payment(1_100));
        let err = ma.propose_frame(10).unwrap_err();
        assert_eq!(
            err,
            ConsensusError::RcpanViolation { token_id: TOKEN, attempted_delta: 1_100 }
        );
        assert!(ma.pending_frame.is_none());
        assert_eq!(ma.current_frame.height, 0);
        assert!(ma.mempool.is_empty(), "violating tx is discarded");
    }

    #[test]
    fn simultaneous_proposals_left_wins() {
        let (mut ma, mut mb, kp_a, kp_b) = pair();
        fund(&mut ma, 1_000, 100, 100);
        fund(&mut mb, 1_000, 100, 100);

        ma.queue_tx(payment(10));
        mb.queue_tx(payment(20));
        ma.propose_frame(10).unwrap();
        mb.propose_frame(10).unwrap();
        let from_alice = ma.proposal_input(&kp_a).unwrap();
        let from_bob = mb.proposal_input(&kp_b).unwrap();

        // Alice is left: she drops Bob's competing frame.
        assert_eq!(ma.handle_input(&from_bob).unwrap(), AccountAction::Ignored);
        assert!(ma.pending_frame.is_some());

        // Bob yields, requeues his payment and adopts Alice's frame.
        let action = mb.handle_input(&from_alice).unwrap();
        let (frame, their_sig) = match action {
            AccountAction::AckCommitted { frame, their_sig } => (frame, their_sig),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(mb.current_frame.height, 1);
        assert_eq!(mb.deltas[&TOKEN].offdelta, 10);
        assert_eq!(mb.mempool, vec![payment(20)]);

        let ack = mb.ack_input(&frame, their_sig, &kp_b).unwrap();
        assert!(matches!(ma.handle_input(&ack).unwrap(), AccountAction::Committed { .. }));
        assert_eq!(ma.deltas[&TOKEN].offdelta, 10);
    }

    #[test]
    fn broken_chain_rejected() {
        let (mut ma, mut mb, kp_a, _) = pair();
        fund(&mut ma, 1_000, 0, 0);
        fund(&mut mb, 1_000, 0, 0);

        ma.queue_tx(payment(5));
        ma.propose_frame(10).unwrap();
        let mut proposal = ma.proposal_input(&kp_a).unwrap();
        proposal.new_account_frame.as_mut().unwrap().prev_frame_hash =
            Hash32::from_bytes([0xEE; 32]);

        let err = mb.handle_input(&proposal).unwrap_err();
        assert!(matches!(err, ConsensusError::ChainBroken { .. }));
        assert_eq!(mb.current_frame.height, 0);
    }

    #[test]
    fn divergent_post_state_rejected() {
        let (mut ma, mut mb, kp_a, _) = pair();
        fund(&mut ma, 1_000, 0, 0);
        fund(&mut mb, 1_000, 0, 0);

        ma.queue_tx(payment(5));
        ma.propose_frame(10).unwrap();
        let mut proposal = ma.proposal_input(&kp_a).unwrap();
        proposal.new_account_frame.as_mut().unwrap().deltas_post[0].offdelta += 1;

        let err = mb.handle_input(&proposal).unwrap_err();
        assert_eq!(err, ConsensusError::StateDivergence);
    }

    #[test]
    fn remote_signer_bound_on_first_proposal() {
        let (mut ma, _, kp_a, kp_b) = pair();
        fund(&mut ma, 1_000, 0, 0);
        let mut mb = AccountMachine::new(
            EntityId::from_low_u64(2),
            EntityId::from_low_u64(1),
            SignerId(kp_b.address()),
            SignerId::UNROUTED,
        );
        fund(&mut mb, 1_000, 0, 0);

        ma.queue_tx(payment(7));
        ma.propose_frame(10).unwrap();
        let proposal = ma.proposal_input(&kp_a).unwrap();
        mb.handle_input(&proposal).unwrap();
        assert_eq!(mb.remote_signer, SignerId(kp_a.address()));
    }

    #[test]
    fn stray_ack_absorbed() {
        let (mut ma, _, _, kp_b) = pair();
        let stray = AccountInput {
            from_entity_id: EntityId::from_low_u64(2),
            to_entity_id: EntityId::from_low_u64(1),
            height: 1,
            new_account_frame: None,
            new_signatures: vec![kp_b.sign_hash(&[0u8; 32]).unwrap()],
            prev_signatures: vec![],
            counter: 1,
        };
        assert_eq!(ma.handle_input(&stray).unwrap(), AccountAction::Ignored);
        assert_eq!(ma.rollbacks, 1);
    }

    #[test]
    fn pending_forward_set_by_routed_payment() {
        let (mut ma, mut mb, kp_a, _) = pair();
        fund(&mut ma, 1_000, 0, 0);
        fund(&mut mb, 1_000, 0, 0);

        let carol = EntityId::from_low_u64(3);
        ma.queue_tx(AccountTx::Payment { token_id: TOKEN, amount: 50, route_tail: vec![carol] });
        ma.propose_frame(10).unwrap();
        let proposal = ma.proposal_input(&kp_a).unwrap();
        mb.handle_input(&proposal).unwrap();

        let forward = mb.take_pending_forward().unwrap();
        assert_eq!(forward, PendingForward { token_id: TOKEN, amount: 50, route_tail: vec![carol] });
        assert!(mb.take_pending_forward().is_none());
    }

    #[test]
    fn machine_rlp_roundtrip() {
        let (mut ma, _, _, _) = pair();
        fund(&mut ma, 500, 10, 20);
        ma.queue_tx(payment(3));
        ma.propose_frame(9).unwrap();
        ma.pending_forward = Some(PendingForward {
            token_id: TOKEN,
            amount: 4,
            route_tail: vec![EntityId::from_low_u64(5)],
        });
        ma.rollbacks = 2;
        assert_eq!(AccountMachine::from_rlp(&ma.to_rlp()).unwrap(), ma);
    }
}
