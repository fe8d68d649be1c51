use std::collections::BTreeMap;

use tracing::{debug, warn};

use xln_account::{AccountAction, AccountMachine, AccountTx};
use xln_codec::{list_of, CodecError, Item, Rlp};
use xln_core::constants::{FEE_SCALE, MAX_CHAT_BYTES};
use xln_core::{AccountKey, ConsensusError, EntityId, Hash32, SignerId, TokenId};
use xln_crypto::keccak256;

use crate::jurisdiction::{JurisdictionEvent, JurisdictionIntent};
use crate::tx::{EntityOp, EntityTx};

// ── ConsensusConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusMode {
    /// One designated proposer per round; rotates on timeout.
    Proposer,
    /// Every validator may propose. Meant for single-signer entities.
    Gossip,
}

/// Validator set with weighted shares. `threshold` power must sign a frame
/// before it commits; the BFT-safe default is `⌊2·total/3⌋ + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusConfig {
    pub mode: ConsensusMode,
    pub threshold: u64,
    pub validators: Vec<SignerId>,
    pub shares: BTreeMap<SignerId, u64>,
}

impl ConsensusConfig {
    /// Single-signer entity with threshold 1.
    pub fn solo(signer: SignerId) -> Self {
        Self {
            mode: ConsensusMode::Gossip,
            threshold: 1,
            validators: vec![signer],
            shares: [(signer, 1)].into_iter().collect(),
        }
    }

    pub fn total_power(&self) -> u64 {
        self.shares.values().sum()
    }

    pub fn share_of(&self, signer: &SignerId) -> u64 {
        self.shares.get(signer).copied().unwrap_or(0)
    }

    /// `Σ shares = total_power`, threshold in `(0, total]`, every validator
    /// holds a share.
    pub fn is_valid(&self) -> bool {
        !self.validators.is_empty()
            && self.threshold > 0
            && self.threshold <= self.total_power()
            && self.validators.iter().all(|v| self.shares.contains_key(v))
            && self.shares.len() == self.validators.len()
    }

    /// The address whose key signs this entity's bilateral account frames.
    pub fn account_signer(&self) -> SignerId {
        self.validators[0]
    }

    /// Round-robin proposer selection; `round` advances only on timeout.
    pub fn proposer_for(&self, round: u64) -> SignerId {
        self.validators[(round as usize) % self.validators.len()]
    }
}

impl Rlp for ConsensusConfig {
    fn to_item(&self) -> Item {
        Item::list(vec![
            Item::uint(match self.mode {
                ConsensusMode::Proposer => 0,
                ConsensusMode::Gossip => 1,
            }),
            Item::uint(self.threshold as u128),
            list_of(&self.validators),
            Item::List(
                self.shares
                    .iter()
                    .map(|(signer, share)| {
                        Item::list(vec![signer.to_item(), Item::uint(*share as u128)])
                    })
                    .collect(),
            ),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [mode, threshold, validators, shares] => {
                let mut share_map = BTreeMap::new();
                for entry in shares.as_list()? {
                    match entry.as_list()? {
                        [signer, share] => {
                            share_map.insert(SignerId::from_item(signer)?, share.as_u64()?);
                        }
                        _ => return Err(CodecError::Malformed("share entry must be a pair")),
                    }
                }
                Ok(Self {
                    mode: match mode.as_u64()? {
                        0 => ConsensusMode::Proposer,
                        1 => ConsensusMode::Gossip,
                        _ => return Err(CodecError::Malformed("unknown consensus mode")),
                    },
                    threshold: threshold.as_u64()?,
                    validators: xln_codec::vec_of(validators)?,
                    shares: share_map,
                })
            }
            _ => Err(CodecError::Malformed("consensus config must have four fields")),
        }
    }
}

// ── DomainState ──────────────────────────────────────────────────────────────

/// Entity-owned application state: reserves, the chat log, registration
/// status and the fee policy this entity advertises for forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainState {
    pub reserves: BTreeMap<TokenId, u128>,
    pub messages: Vec<String>,
    pub registered: bool,
    pub routing_fee_ppm: u64,
    pub base_fee: u128,
}

impl Default for DomainState {
    fn default() -> Self {
        Self {
            reserves: BTreeMap::new(),
            messages: Vec::new(),
            registered: false,
            routing_fee_ppm: 0,
            base_fee: 0,
        }
    }
}

impl Rlp for DomainState {
    fn to_item(&self) -> Item {
        Item::list(vec![
            Item::List(
                self.reserves
                    .iter()
                    .map(|(token, amount)| {
                        Item::list(vec![token.to_item(), Item::uint(*amount)])
                    })
                    .collect(),
            ),
            Item::List(self.messages.iter().map(|m| Item::bytes(m.as_bytes())).collect()),
            Item::uint(self.registered as u128),
            Item::uint(self.routing_fee_ppm as u128),
            Item::uint(self.base_fee),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [reserves, messages, registered, fee_ppm, base_fee] => {
                let mut reserve_map = BTreeMap::new();
                for entry in reserves.as_list()? {
                    match entry.as_list()? {
                        [token, amount] => {
                            reserve_map.insert(TokenId::from_item(token)?, amount.as_uint()?);
                        }
                        _ => return Err(CodecError::Malformed("reserve entry must be a pair")),
                    }
                }
                Ok(Self {
                    reserves: reserve_map,
                    messages: messages
                        .as_list()?
                        .iter()
                        .map(|m| {
                            String::from_utf8(m.as_bytes()?.to_vec())
                                .map_err(|_| CodecError::Malformed("message is not utf-8"))
                        })
                        .collect::<Result<_, _>>()?,
                    registered: registered.as_u64()? != 0,
                    routing_fee_ppm: fee_ppm.as_u64()?,
                    base_fee: base_fee.as_uint()?,
                })
            }
            _ => Err(CodecError::Malformed("domain state must have five fields")),
        }
    }
}

// ── EntityState ──────────────────────────────────────────────────────────────

/// The replicated value every validator of an entity agrees on. Immutable
/// in spirit: frames fold it into a fresh value, replicas swap the whole
/// thing on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub height: u64,
    pub timestamp: u64,
    pub nonces: BTreeMap<SignerId, u64>,
    pub accounts: BTreeMap<EntityId, AccountMachine>,
    pub config: ConsensusConfig,
    pub domain: DomainState,
}

impl EntityState {
    pub fn genesis(entity_id: EntityId, config: ConsensusConfig) -> Self {
        Self {
            entity_id,
            height: 0,
            timestamp: 0,
            nonces: BTreeMap::new(),
            accounts: BTreeMap::new(),
            config,
            domain: DomainState::default(),
        }
    }

    /// keccak-256 over the canonical RLP of the whole state. Equality of
    /// hashes is how replicas compare re-executions.
    pub fn state_hash(&self) -> Hash32 {
        Hash32::from_bytes(keccak256(&self.to_rlp()))
    }

    /// Anything queued at the account layer that a new frame would flush?
    pub fn has_account_work(&self) -> bool {
        self.accounts
            .values()
            .any(|m| (!m.mempool.is_empty() && m.pending_frame.is_none()) || m.pending_forward.is_some())
    }
}

impl Rlp for EntityState {
    fn to_item(&self) -> Item {
        Item::list(vec![
            self.entity_id.to_item(),
            Item::uint(self.height as u128),
            Item::uint(self.timestamp as u128),
            Item::List(
                self.nonces
                    .iter()
                    .map(|(signer, nonce)| {
                        Item::list(vec![signer.to_item(), Item::uint(*nonce as u128)])
                    })
                    .collect(),
            ),
            Item::List(self.accounts.values().map(Rlp::to_item).collect()),
            self.config.to_item(),
            self.domain.to_item(),
        ])
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        match item.as_list()? {
            [entity, height, timestamp, nonces, accounts, config, domain] => {
                let mut nonce_map = BTreeMap::new();
                for entry in nonces.as_list()? {
                    match entry.as_list()? {
                        [signer, nonce] => {
                            nonce_map.insert(SignerId::from_item(signer)?, nonce.as_u64()?);
                        }
                        _ => return Err(CodecError::Malformed("nonce entry must be a pair")),
                    }
                }
                let machines: Vec<AccountMachine> = xln_codec::vec_of(accounts)?;
                Ok(Self {
                    entity_id: EntityId::from_item(entity)?,
                    height: height.as_u64()?,
                    timestamp: timestamp.as_u64()?,
                    nonces: nonce_map,
                    accounts: machines.into_iter().map(|m| (m.counterparty_id, m)).collect(),
                    config: ConsensusConfig::from_item(config)?,
                    domain: DomainState::from_item(domain)?,
                })
            }
            _ => Err(CodecError::Malformed("entity state must have seven fields")),
        }
    }
}

// ── Frame application ────────────────────────────────────────────────────────

/// Side effects produced by folding a frame. Deterministic on every
/// replica; emitted on the network by exactly one of them.
#[derive(Debug, Default, Clone)]
pub struct ApplyEffects {
    /// Bilateral replies (acknowledgements) to materialize and send.
    pub account_actions: Vec<(EntityId, AccountAction)>,
    /// Counterparties whose machines produced a fresh pending frame.
    pub proposals_ready: Vec<EntityId>,
    /// On-chain intents raised by this frame.
    pub intents: Vec<JurisdictionIntent>,
    /// Remote-party faults to surface as outbox diagnostics.
    pub faults: Vec<(EntityId, ConsensusError)>,
}

/// Fold a tx list over `prev`, producing the next state and its effects.
/// Height advances by exactly one here and nowhere else. Invalid txs are
/// skipped, so one bad tx cannot poison a frame.
pub fn apply_frame(prev: &EntityState, txs: &[EntityTx], now: u64) -> (EntityState, ApplyEffects) {
    let mut state = prev.clone();
    let mut fx = ApplyEffects::default();
    state.height += 1;
    state.timestamp = now;

    consume_forwards(&mut state, &mut fx);
    for tx in txs {
        apply_tx(&mut state, tx, &mut fx);
    }
    flush_accounts(&mut state, now, &mut fx);

    (state, fx)
}

/// Consume routing hints left by the previous frame: queue the next-hop
/// payment with this entity's forwarding fee deducted.
fn consume_forwards(state: &mut EntityState, fx: &mut ApplyEffects) {
    let fee_ppm = state.domain.routing_fee_ppm as u128;
    let base_fee = state.domain.base_fee;
    let counterparties: Vec<EntityId> = state.accounts.keys().copied().collect();

    for cp in counterparties {
        let Some(forward) = state.accounts.get_mut(&cp).and_then(|m| m.take_pending_forward())
        else {
            continue;
        };
        let (next_hop, rest) = match forward.route_tail.split_first() {
            Some((next, rest)) => (*next, rest.to_vec()),
            None => continue,
        };
        let fee = base_fee.saturating_add(forward.amount.saturating_mul(fee_ppm) / FEE_SCALE as u128);
        let amount = forward.amount.saturating_sub(fee);
        if amount == 0 {
            warn!(entity = %state.entity_id, %next_hop, "forward amount consumed by fee, dropping");
            continue;
        }
        match state.accounts.get_mut(&next_hop) {
            Some(machine) => {
                debug!(entity = %state.entity_id, %next_hop, amount, "forwarding routed payment");
                machine.queue_tx(AccountTx::Payment {
                    token_id: forward.token_id,
                    amount,
                    route_tail: rest,
                });
            }
            None => fx.faults.push((next_hop, ConsensusError::UnknownAccount(next_hop))),
        }
    }
}

fn apply_tx(state: &mut EntityState, tx: &EntityTx, fx: &mut ApplyEffects) {
    if !tx.is_external() {
        if state.config.share_of(&tx.sender) == 0 {
            warn!(entity = %state.entity_id, sender = %tx.sender, "tx from non-validator, skipping");
            return;
        }
        let expected = state.nonces.get(&tx.sender).copied().unwrap_or(0) + 1;
        if tx.nonce != expected {
            warn!(
                entity = %state.entity_id,
                sender = %tx.sender,
                expected,
                got = tx.nonce,
                "stale or future nonce, skipping"
            );
            return;
        }
        state.nonces.insert(tx.sender, tx.nonce);
    }

    match &tx.op {
        EntityOp::Chat { message } => {
            if message.len() > MAX_CHAT_BYTES {
                warn!(entity = %state.entity_id, "chat message over limit, skipping");
                return;
            }
            state.domain.messages.push(message.clone());
        }

        EntityOp::OpenAccount { counterparty, counterparty_signer } => {
            if *counterparty == state.entity_id {
                warn!(entity = %state.entity_id, "self account rejected");
                return;
            }
            if let Some(machine) = state.accounts.get_mut(counterparty) {
                // Already auto-created by an earlier event: adopt the peer's
                // signing address if we never learned it.
                if machine.remote_signer == SignerId::UNROUTED {
                    machine.remote_signer = *counterparty_signer;
                }
                return;
            }
            let machine = AccountMachine::new(
                state.entity_id,
                *counterparty,
                state.config.account_signer(),
                *counterparty_signer,
            );
            debug!(entity = %state.entity_id, %counterparty, "opened account");
            state.accounts.insert(*counterparty, machine);
        }

        EntityOp::DirectPayment { counterparty, token_id, amount, route_tail } => {
            match state.accounts.get_mut(counterparty) {
                Some(machine) => machine.queue_tx(AccountTx::Payment {
                    token_id: *token_id,
                    amount: *amount,
                    route_tail: route_tail.clone(),
                }),
                None => fx.faults.push((*counterparty, ConsensusError::UnknownAccount(*counterparty))),
            }
        }

        EntityOp::AccountInput(input) => {
            let from = input.from_entity_id;
            let machine = state.accounts.entry(from).or_insert_with(|| {
                AccountMachine::new(
                    state.entity_id,
                    from,
                    state.config.account_signer(),
                    SignerId::UNROUTED,
                )
            });
            match machine.handle_input(input) {
                Ok(AccountAction::AckCommitted { frame, their_sig }) => {
                    fx.account_actions
                        .push((from, AccountAction::AckCommitted { frame, their_sig }));
                }
                Ok(AccountAction::Committed { .. }) | Ok(AccountAction::Ignored) => {}
                Err(e) => {
                    warn!(entity = %state.entity_id, counterparty = %from, %e, "account input fault");
                    fx.faults.push((from, e));
                }
            }
        }

        EntityOp::JEvent(event) => apply_jevent(state, event),

        EntityOp::SubmitSettlement { counterparty } => match state.accounts.get(counterparty) {
            Some(machine) => {
                let Some(key) = AccountKey::new(state.entity_id, *counterparty) else {
                    warn!(entity = %state.entity_id, "settlement against self, skipping");
                    return;
                };
                fx.intents.push(JurisdictionIntent::SettleDiffs {
                    left: key.left(),
                    right: key.right(),
                    token_diffs: machine
                        .deltas_vec()
                        .iter()
                        .map(|d| (d.token_id, d.total()))
                        .collect(),
                    signatures: Vec::new(),
                });
            }
            None => fx.faults.push((*counterparty, ConsensusError::UnknownAccount(*counterparty))),
        },

        EntityOp::RegisterEntity { board_hash } => {
            fx.intents.push(JurisdictionIntent::RegisterEntity {
                entity_id: state.entity_id,
                board_hash: *board_hash,
            });
        }

        EntityOp::FinalizeDispute { counterparty } => match state.accounts.get(counterparty) {
            Some(machine) => {
                // The dispute path runs every subcontract; an outcome that
                // breaks RCPAN invalidates the whole finalization.
                match machine.finalize_deltas(state.timestamp, &BTreeMap::new()) {
                    Ok(final_deltas) => {
                        let Some(key) = AccountKey::new(state.entity_id, *counterparty) else {
                            return;
                        };
                        let proof_body = xln_codec::encode(&Item::list(vec![
                            key.left().to_item(),
                            key.right().to_item(),
                            xln_codec::list_of(&final_deltas),
                        ]));
                        fx.intents.push(JurisdictionIntent::FinalizeDispute { proof_body });
                    }
                    Err(e) => {
                        warn!(entity = %state.entity_id, %counterparty, %e, "dispute finalization rejected");
                        fx.faults.push((*counterparty, e));
                    }
                }
            }
            None => fx.faults.push((*counterparty, ConsensusError::UnknownAccount(*counterparty))),
        },
    }
}

fn apply_jevent(state: &mut EntityState, event: &JurisdictionEvent) {
    match event {
        JurisdictionEvent::ReserveUpdated { token_id, amount } => {
            state.domain.reserves.insert(*token_id, *amount);
        }
        JurisdictionEvent::EntityRegistered { entity_id } => {
            if *entity_id == state.entity_id {
                state.domain.registered = true;
            }
        }
        JurisdictionEvent::SettlementProcessed { counterparty, token_id, collateral, ondelta } => {
            let machine = state.accounts.entry(*counterparty).or_insert_with(|| {
                AccountMachine::new(
                    state.entity_id,
                    *counterparty,
                    state.config.account_signer(),
                    SignerId::UNROUTED,
                )
            });
            machine.apply_onchain_deposit(*token_id, *collateral, *ondelta);
        }
    }
}

/// Drain every account mempool into a pending bilateral frame.
fn flush_accounts(state: &mut EntityState, now: u64, fx: &mut ApplyEffects) {
    let counterparties: Vec<EntityId> = state.accounts.keys().copied().collect();
    for cp in counterparties {
        let machine = state.accounts.get_mut(&cp).expect("key just listed");
        match machine.propose_frame(now) {
            Ok(Some(_)) => fx.proposals_ready.push(cp),
            Ok(None) => {}
            Err(e) => {
                warn!(entity = %state.entity_id, counterparty = %cp, %e, "account proposal failed");
                fx.faults.push((cp, e));
            }
        }
    }
}
