/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chain service, which turns `(parent state, candidate block)` into `(new state, new canonical
//! head)`.
//!
//! ## Chain start
//!
//! A chain service is "initialized" once the Beacon Store holds a genesis state. This happens exactly
//! once: [`try_chain_start`](ChainService::try_chain_start) waits until the deposit log holds the
//! configured number of deposits, builds the genesis state from them, and then fires the
//! [chain start latch](chain_start::ChainStartLatch). A chain service created on top of an already
//! initialized store fires the latch immediately.
//!
//! ## Block processing
//!
//! The steps of processing a block are exposed separately through the [`BlockProcessor`] trait, so
//! that drivers like the [initial sync service](crate::initial_sync) and
//! [chain replay](crate::replay) can decide which errors are fatal to them:
//! 1. [`verify_block_validity`](BlockProcessor::verify_block_validity): cheap header checks.
//! 2. [`apply_block_state_transition`](BlockProcessor::apply_block_state_transition): compute the
//!    post-state.
//! 3. [`apply_fork_choice_rule`](BlockProcessor::apply_fork_choice_rule): save the block and its
//!    post-state, and re-select the chain head.
//! 4. [`cleanup_block_operations`](BlockProcessor::cleanup_block_operations): drop included
//!    operations from the [operation pool](operation_pool::OperationPool).
//!
//! ## The chain service thread
//!
//! [`start`](ChainService::start) spawns a thread that polls for chain start until it happens, and
//! processes [gossip](crate::networking::messages::GossipMessage) throughout.

pub mod chain_start;

pub mod operation_pool;

use std::{
    fmt::{self, Display, Formatter},
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    beacon_store::{
        accessors::{
            internal::{BeaconStore, BeaconStoreError},
            public::{BeaconStoreCamera, DepositRange},
        },
        pluggables::KVStore,
    },
    config::ChainServiceConfiguration,
    events::{
        ChainStartEvent, Event, InsertBlockEvent, ReceiveBlockEvent, RejectBlockEvent,
        UpdateHeadEvent,
    },
    fork_choice::{rules::ForkChoiceRule, ForkChoice, ForkChoiceError, ForkChoiceOutcome},
    initial_sync::safe_handling::safely_handle_message,
    networking::{messages::GossipMessage, receiving::PeerMessage},
    state_transition::{self, InvalidBlockReason, TransitionError},
    types::{
        block::BeaconBlock,
        crypto_primitives::hash_borsh,
        data_types::{CryptoHash, DepositIndex, Timestamp},
        deposit::{Deposit, Eth1Data},
        operations::{Attestation, VoluntaryExit},
        state::BeaconState,
    },
};

use chain_start::{ChainStart, ChainStartLatch};
use operation_pool::OperationPool;

/// How long the chain service thread waits for gossip before checking its shutdown signal.
const GOSSIP_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// The block processing steps of the chain service.
///
/// Every method returns an explicit error. None of them panics on invalid input, and a failed call
/// never leaves the Beacon Store with a chain head whose state is missing.
pub trait BlockProcessor: Send + 'static {
    /// Compute the post-state of `block`, a newly observed block, on top of its parent's state,
    /// without applying fork choice.
    fn receive_block(&self, block: &BeaconBlock) -> Result<BeaconState, ChainServiceError>;

    /// Compute the post-state of `block` on top of `parent_state`, which the caller already holds.
    fn apply_block_state_transition(
        &self,
        block: &BeaconBlock,
        parent_state: &BeaconState,
    ) -> Result<BeaconState, ChainServiceError>;

    /// Save `(block, state)` and re-select the chain head. `state` must be the post-state of `block`.
    fn apply_fork_choice_rule(
        &mut self,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<ForkChoiceOutcome, ChainServiceError>;

    /// Check `block`'s header against `state`, the state at its parent, without computing anything.
    fn verify_block_validity(
        &self,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<(), ChainServiceError>;

    /// Remove the operations `block` includes, and those that `state`, its post-state, makes stale,
    /// from the operation pool. Idempotent.
    fn cleanup_block_operations(
        &mut self,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<(), ChainServiceError>;

    /// Whether `block` and its post-state are both already in the store.
    fn is_processed(&self, block: &BeaconBlock) -> Result<bool, ChainServiceError>;

    /// Get the post-state of `block`'s parent, if the parent has been processed.
    fn parent_state(&self, block: &BeaconBlock) -> Result<Option<BeaconState>, ChainServiceError>;

    /// Get the canonical head block and its post-state.
    fn chain_head(&self) -> Result<(BeaconBlock, BeaconState), ChainServiceError>;
}

pub struct ChainService<K: KVStore, F: ForkChoiceRule> {
    store: BeaconStore<K>,
    fork_choice: ForkChoice<F>,
    operation_pool: OperationPool,
    chain_start: ChainStartLatch,
    config: ChainServiceConfiguration,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, F: ForkChoiceRule> Clone for ChainService<K, F> {
    fn clone(&self) -> Self {
        ChainService {
            store: self.store.clone(),
            fork_choice: self.fork_choice.clone(),
            operation_pool: self.operation_pool.clone(),
            chain_start: self.chain_start.clone(),
            config: self.config,
            event_publisher: self.event_publisher.clone(),
        }
    }
}

impl<K: KVStore, F: ForkChoiceRule> ChainService<K, F> {
    /// Create a chain service on top of `store`.
    ///
    /// If the store is already initialized, the returned service's chain start latch has fired.
    pub fn new(
        store: BeaconStore<K>,
        fork_choice: ForkChoice<F>,
        config: ChainServiceConfiguration,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, ChainServiceError> {
        let chain_service = ChainService {
            store,
            fork_choice,
            operation_pool: OperationPool::new(),
            chain_start: ChainStartLatch::new(),
            config,
            event_publisher,
        };

        if let Some(chain_start) = chain_service.chain_start_from_store()? {
            chain_service.chain_start.fire(chain_start);
        }

        Ok(chain_service)
    }

    pub fn store(&self) -> &BeaconStore<K> {
        &self.store
    }

    pub fn camera(&self) -> BeaconStoreCamera<K> {
        self.store.camera()
    }

    pub fn chain_start_latch(&self) -> &ChainStartLatch {
        &self.chain_start
    }

    pub fn operation_pool(&self) -> &OperationPool {
        &self.operation_pool
    }

    pub fn config(&self) -> &ChainServiceConfiguration {
        &self.config
    }

    /// Start the chain if the deposit log holds enough deposits.
    ///
    /// Reads the first [`chain_start_validator_count`](ChainServiceConfiguration::chain_start_validator_count)
    /// deposits of the log. If that many are present, builds the genesis state from exactly those
    /// deposits, stores it, and fires the chain start latch. Returns the chain start event if the
    /// chain has started, whether by this call or earlier.
    pub fn try_chain_start(&mut self) -> Result<Option<ChainStart>, ChainServiceError> {
        if let Some(chain_start) = self.chain_start.try_get() {
            return Ok(Some(chain_start));
        }
        if let Some(chain_start) = self.chain_start_from_store()? {
            self.chain_start.fire(chain_start);
            return Ok(Some(chain_start));
        }

        let required = self.config.chain_start_validator_count.max(1);
        let deposits = self.store.all_deposits(DepositRange::first(required))?;
        if (deposits.len() as u64) < required {
            log::debug!(
                "Waiting for chain start: {} of {} deposits",
                deposits.len(),
                required
            );
            return Ok(None);
        }

        let eth1_data = Eth1Data {
            deposit_root: hash_borsh(&deposits),
            deposit_count: deposits.len() as u64,
            block_hash: CryptoHash::zero(),
        };
        let genesis_state = match self.initialize_chain(Timestamp::now(), &deposits, eth1_data) {
            Ok((_, genesis_state)) => genesis_state,
            // Another clone of this service started the chain first.
            Err(ChainServiceError::BeaconStoreError(BeaconStoreError::AlreadyInitialized)) => {
                let chain_start = self
                    .chain_start_from_store()?
                    .ok_or(BeaconStoreError::NotInitialized)?;
                self.chain_start.fire(chain_start);
                return Ok(Some(chain_start));
            }
            Err(err) => return Err(err),
        };

        // Deposits beyond the genesis batch are for blocks to include.
        for deposit in self.store.all_deposits(DepositRange {
            start: DepositIndex::new(genesis_state.eth1_deposit_index),
            max_count: None,
        })? {
            self.operation_pool.add_deposit(deposit);
        }

        Ok(self.chain_start.try_get())
    }

    /// Store the genesis state built from `deposits` and fire the chain start latch.
    ///
    /// Fails with [`AlreadyInitialized`](BeaconStoreError::AlreadyInitialized) if the store already
    /// holds a genesis state. Returns the chain start event together with the genesis state.
    pub fn initialize_chain(
        &mut self,
        genesis_time: Timestamp,
        deposits: &[Deposit],
        eth1_data: Eth1Data,
    ) -> Result<(ChainStart, BeaconState), ChainServiceError> {
        let (genesis_block, genesis_state) = self.store.initialize_state(
            genesis_time,
            deposits,
            eth1_data,
            &self.config.chain_parameters,
        )?;

        let chain_start = ChainStart {
            genesis_time,
            genesis_root: genesis_block.root(),
        };
        if self.chain_start.fire(chain_start) {
            log::info!(
                "Chain started at genesis time {} with {} validators",
                genesis_time.int(),
                genesis_state.validators.len()
            );
            Event::ChainStart(ChainStartEvent {
                timestamp: SystemTime::now(),
                genesis_time,
                genesis_root: chain_start.genesis_root,
                validator_count: genesis_state.validators.len(),
            })
            .publish(&self.event_publisher);
        }

        Ok((chain_start, genesis_state))
    }

    /// Append `deposit` to the deposit log, and stage it for inclusion if the chain has started.
    ///
    /// Deposits that do not continue the log are dropped with a debug log.
    pub fn receive_deposit(&mut self, deposit: Deposit) -> Result<(), ChainServiceError> {
        match self.store.save_deposit(&deposit) {
            Ok(()) => (),
            Err(BeaconStoreError::DepositOutOfOrder { expected, got }) => {
                log::debug!(
                    "Dropping deposit {}: the deposit log continues at {}",
                    got.int(),
                    expected
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        if self.chain_start.is_fired() {
            let (_, head_state) = self.store.chain_head()?;
            if deposit.index.int() >= head_state.eth1_deposit_index {
                self.operation_pool.add_deposit(deposit);
            }
        }
        Ok(())
    }

    /// Pool `exit` if it could be included on top of the chain head. Others are dropped with a debug
    /// log, as are exits received before chain start.
    pub fn receive_voluntary_exit(
        &mut self,
        exit: VoluntaryExit,
    ) -> Result<(), ChainServiceError> {
        if !self.chain_start.is_fired() {
            return Ok(());
        }
        let (_, head_state) = self.store.chain_head()?;
        let validator_index = exit.validator_index;
        if !self.operation_pool.add_voluntary_exit(exit, &head_state) {
            log::debug!(
                "Dropping voluntary exit of validator {}: not includable at slot {}",
                validator_index.int(),
                head_state.slot.next()
            );
        }
        Ok(())
    }

    /// Pool `attestation` if it could be included on top of the chain head. Others are dropped with
    /// a debug log, as are attestations received before chain start.
    pub fn receive_attestation(
        &mut self,
        attestation: Attestation,
    ) -> Result<(), ChainServiceError> {
        if !self.chain_start.is_fired() {
            return Ok(());
        }
        let (_, head_state) = self.store.chain_head()?;
        let (slot, validator_index) = (attestation.slot, attestation.validator_index);
        if !self.operation_pool.add_attestation(attestation, &head_state) {
            log::debug!(
                "Dropping attestation of validator {} at slot {}: not includable on the head",
                validator_index.int(),
                slot
            );
        }
        Ok(())
    }

    /// Run every processing step on `block`, a block from a peer or the local node.
    ///
    /// Invalid blocks and blocks whose parent is unknown are dropped with a log and are not errors.
    /// Only store failures are returned.
    pub fn process_block(&mut self, block: &BeaconBlock) -> Result<(), ChainServiceError> {
        let root = block.root();
        if self.is_processed(block)? {
            return Ok(());
        }

        let parent_state = match self.parent_state(block)? {
            Some(parent_state) => parent_state,
            None => {
                log::debug!(
                    "Dropping block {} at slot {}: parent {} is unknown",
                    root,
                    block.slot,
                    block.parent_root
                );
                return Ok(());
            }
        };

        match self.import_block(block, &parent_state) {
            Ok(state) => self.cleanup_block_operations(block, &state),
            Err(ChainServiceError::Transition(TransitionError::InvalidBlock(reason))) => {
                log::warn!(
                    "Rejecting block {} at slot {}: {:?}",
                    root,
                    block.slot,
                    reason
                );
                Event::RejectBlock(RejectBlockEvent {
                    timestamp: SystemTime::now(),
                    block: root,
                    slot: block.slot,
                    reason,
                })
                .publish(&self.event_publisher);
                Ok(())
            }
            Err(ChainServiceError::ForkChoice(ForkChoiceError::MissingAncestor {
                block,
                parent,
            })) => {
                log::debug!("Dropping block {}: ancestor {} is missing", block, parent);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn import_block(
        &mut self,
        block: &BeaconBlock,
        parent_state: &BeaconState,
    ) -> Result<BeaconState, ChainServiceError> {
        self.verify_block_validity(block, parent_state)?;
        let state = self.apply_block_state_transition(block, parent_state)?;
        self.apply_fork_choice_rule(block, &state)?;
        Ok(state)
    }

    /// Spawn the chain service thread.
    pub(crate) fn start(
        mut self,
        gossip: Receiver<(VerifyingKey, GossipMessage)>,
        shutdown_signal: Receiver<()>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut next_chain_start_check = Instant::now();

            loop {
                match shutdown_signal.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("Chain service thread disconnected from main thread")
                    }
                }

                if !self.chain_start.is_fired() && Instant::now() >= next_chain_start_check {
                    if let Err(err) = self.try_chain_start() {
                        log::error!("Chain service stopped while starting the chain: {}", err);
                        return;
                    }
                    next_chain_start_check = Instant::now() + self.config.chain_start_poll_interval;
                }

                match gossip.recv_timeout(GOSSIP_POLL_TIMEOUT) {
                    Ok((origin, msg)) => {
                        let chain_service = &mut self;
                        match safely_handle_message(
                            |origin, msg| chain_service.on_receive_gossip(origin, msg),
                            PeerMessage::new(origin, msg),
                        ) {
                            Ok(Ok(())) => (),
                            Ok(Err(err)) => {
                                log::error!("Chain service stopped: {}", err);
                                return;
                            }
                            // Already logged.
                            Err(_) => (),
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => (),
                    // The poller outlives this thread, so this only happens during shutdown.
                    Err(RecvTimeoutError::Disconnected) => thread::yield_now(),
                }
            }
        })
    }

    fn on_receive_gossip(
        &mut self,
        origin: VerifyingKey,
        msg: GossipMessage,
    ) -> Result<(), ChainServiceError> {
        match msg {
            GossipMessage::Block(block) => {
                if !self.chain_start.is_fired() {
                    log::debug!("Ignoring block at slot {} received before chain start", block.slot);
                    return Ok(());
                }
                Event::ReceiveBlock(ReceiveBlockEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    block: block.root(),
                    slot: block.slot,
                })
                .publish(&self.event_publisher);
                self.process_block(&block)
            }
            GossipMessage::Deposit(deposit) => self.receive_deposit(deposit),
            GossipMessage::VoluntaryExit(exit) => self.receive_voluntary_exit(exit),
            GossipMessage::Attestation(attestation) => self.receive_attestation(attestation),
        }
    }

    /// Read the chain start event back from an initialized store.
    fn chain_start_from_store(&self) -> Result<Option<ChainStart>, ChainServiceError> {
        let snapshot = self.store.snapshot();
        if !snapshot.is_initialized()? {
            return Ok(None);
        }
        let genesis_slot = self.config.chain_parameters.genesis_slot;
        let genesis_root = snapshot
            .block_at_slot_root(genesis_slot)?
            .ok_or(BeaconStoreError::NotInitialized)?;
        let genesis_time = snapshot
            .genesis_time()?
            .ok_or(BeaconStoreError::NotInitialized)?;
        Ok(Some(ChainStart {
            genesis_time,
            genesis_root,
        }))
    }
}

impl<K: KVStore, F: ForkChoiceRule> BlockProcessor for ChainService<K, F> {
    fn receive_block(&self, block: &BeaconBlock) -> Result<BeaconState, ChainServiceError> {
        let parent_state =
            self.parent_state(block)?
                .ok_or(ChainServiceError::MissingParent {
                    block: block.root(),
                    parent: block.parent_root,
                })?;
        self.apply_block_state_transition(block, &parent_state)
    }

    fn apply_block_state_transition(
        &self,
        block: &BeaconBlock,
        parent_state: &BeaconState,
    ) -> Result<BeaconState, ChainServiceError> {
        Ok(state_transition::transition(
            parent_state,
            block,
            &self.config.chain_parameters,
        )?)
    }

    fn apply_fork_choice_rule(
        &mut self,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<ForkChoiceOutcome, ChainServiceError> {
        let outcome = self.fork_choice.apply(&mut self.store, block, state)?;
        if let ForkChoiceOutcome::AlreadyKnown { .. } = outcome {
            return Ok(outcome);
        }

        let root = block.root();
        Event::InsertBlock(InsertBlockEvent {
            timestamp: SystemTime::now(),
            block: root,
            slot: block.slot,
        })
        .publish(&self.event_publisher);
        if outcome == ForkChoiceOutcome::NewHead {
            Event::UpdateHead(UpdateHeadEvent {
                timestamp: SystemTime::now(),
                head: root,
                slot: block.slot,
            })
            .publish(&self.event_publisher);
        }

        Ok(outcome)
    }

    fn verify_block_validity(
        &self,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<(), ChainServiceError> {
        Ok(state_transition::verify_block_validity(block, state)?)
    }

    fn cleanup_block_operations(
        &mut self,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<(), ChainServiceError> {
        let removed = self.operation_pool.cleanup(block, state);
        if removed > 0 {
            log::debug!(
                "Removed {} included operations from the pool after block at slot {}",
                removed,
                block.slot
            );
        }
        Ok(())
    }

    fn is_processed(&self, block: &BeaconBlock) -> Result<bool, ChainServiceError> {
        let root = block.root();
        Ok(self.store.contains_block(&root)? && self.store.state(&root)?.is_some())
    }

    /// When the parent is the chain head, this is the head state. Otherwise the block extends a
    /// non-canonical branch, and its parent's own post-state is used.
    fn parent_state(&self, block: &BeaconBlock) -> Result<Option<BeaconState>, ChainServiceError> {
        let snapshot = self.store.snapshot();
        if snapshot.chain_head_root()? == Some(block.parent_root) {
            return Ok(Some(snapshot.head_state()?));
        }
        Ok(snapshot.state(&block.parent_root)?)
    }

    fn chain_head(&self) -> Result<(BeaconBlock, BeaconState), ChainServiceError> {
        Ok(self.store.chain_head()?)
    }
}

#[derive(Debug)]
pub enum ChainServiceError {
    Transition(TransitionError),
    ForkChoice(ForkChoiceError),
    BeaconStoreError(BeaconStoreError),

    /// The parent of a block has not been processed.
    MissingParent {
        block: CryptoHash,
        parent: CryptoHash,
    },
}

impl ChainServiceError {
    /// Get the rule that the block broke, if this error is about an invalid block.
    pub fn invalid_block_reason(&self) -> Option<&InvalidBlockReason> {
        match self {
            ChainServiceError::Transition(TransitionError::InvalidBlock(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Whether the error is about the block or its ancestry, rather than about the store.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ChainServiceError::Transition(_) => true,
            ChainServiceError::MissingParent { .. } => true,
            ChainServiceError::ForkChoice(ForkChoiceError::MissingAncestor { .. }) => true,
            ChainServiceError::ForkChoice(ForkChoiceError::BeaconStoreError(_)) => false,
            ChainServiceError::BeaconStoreError(_) => false,
        }
    }
}

impl Display for ChainServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainServiceError::Transition(TransitionError::InvalidBlock(reason)) => {
                write!(f, "invalid block: {:?}", reason)
            }
            ChainServiceError::ForkChoice(ForkChoiceError::MissingAncestor { block, parent }) => {
                write!(f, "missing ancestor {} of block {}", parent, block)
            }
            ChainServiceError::ForkChoice(ForkChoiceError::BeaconStoreError(err)) => {
                write!(f, "fork choice failed: {}", err)
            }
            ChainServiceError::BeaconStoreError(err) => Display::fmt(err, f),
            ChainServiceError::MissingParent { block, parent } => {
                write!(f, "missing parent {} of block {}", parent, block)
            }
        }
    }
}

impl From<TransitionError> for ChainServiceError {
    fn from(value: TransitionError) -> Self {
        ChainServiceError::Transition(value)
    }
}

impl From<ForkChoiceError> for ChainServiceError {
    fn from(value: ForkChoiceError) -> Self {
        ChainServiceError::ForkChoice(value)
    }
}

impl From<BeaconStoreError> for ChainServiceError {
    fn from(value: BeaconStoreError) -> Self {
        ChainServiceError::BeaconStoreError(value)
    }
}
