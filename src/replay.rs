/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Replay of a trusted reference chain into a local [`ChainService`].
//!
//! [`replay_chain`] walks the canonical chain of a reference store from genesis to its head, one slot
//! at a time, and runs every block through the same processing steps that initial sync uses. Since
//! every block in the reference chain has already been proven canonical, any error is fatal here:
//! replay stops at the first block that does not apply.
//!
//! If the local store has no genesis state yet, replay bootstraps it from the reference store's
//! genesis deposits. Blocks the local store already holds are not applied again.

use std::fmt::{self, Display, Formatter};

use crate::{
    beacon_store::{
        accessors::{
            internal::BeaconStoreError,
            public::{BeaconStoreCamera, DepositRange},
        },
        pluggables::KVStore,
    },
    chain_service::{BlockProcessor, ChainService, ChainServiceError},
    fork_choice::rules::ForkChoiceRule,
    types::{
        block::BeaconBlock,
        data_types::{CryptoHash, Slot},
        deposit::Deposit,
        state::BeaconState,
    },
};

/// Replay `reference`'s canonical chain into `chain_service`, returning the post-state of the
/// reference head.
///
/// The returned state has the same root as the reference head state.
pub fn replay_chain<R: KVStore, K: KVStore, F: ForkChoiceRule>(
    reference: &BeaconStoreCamera<R>,
    chain_service: &mut ChainService<K, F>,
) -> Result<BeaconState, ReplayError> {
    let genesis_slot = chain_service.config().chain_parameters.genesis_slot;

    // Read the genesis from one reference snapshot, then let it go.
    let (genesis_block, genesis_state, genesis_deposits, head_slot) = {
        let snapshot = reference.snapshot();
        let (head, _) = snapshot.chain_head().map_err(ReplayError::Reference)?;
        let genesis_block = snapshot
            .block_by_slot(genesis_slot)
            .map_err(ReplayError::Reference)?
            .ok_or(ReplayError::Reference(BeaconStoreError::NotInitialized))?;
        let genesis_root = genesis_block.root();
        let genesis_state = snapshot
            .state(&genesis_root)
            .map_err(ReplayError::Reference)?
            .ok_or(ReplayError::Reference(
                BeaconStoreError::StateExpectedButNotFound {
                    block: genesis_root,
                },
            ))?;
        let genesis_deposits = snapshot
            .all_deposits(DepositRange::first(genesis_state.eth1_deposit_index))
            .map_err(ReplayError::Reference)?;
        (genesis_block, genesis_state, genesis_deposits, head.slot)
    };

    bootstrap(chain_service, &genesis_block, &genesis_state, &genesis_deposits)?;

    log::info!("Replaying slots {} to {}", genesis_slot, head_slot);

    // Look up one reference slot at a time, so that replay stops at the first failing block without
    // reading the rest of the chain.
    let (_, head_state) = (genesis_slot.next().int()..=head_slot.int())
        .map(Slot::new)
        .try_fold(
            (genesis_block, genesis_state),
            |(parent, parent_state), slot| -> Result<(BeaconBlock, BeaconState), ReplayError> {
                let block = match reference
                    .snapshot()
                    .block_by_slot(slot)
                    .map_err(ReplayError::Reference)?
                {
                    Some(block) => block,
                    None => return Ok((parent, parent_state)),
                };
                let state = replay_block(chain_service, &parent, &parent_state, &block)?;
                Ok((block, state))
            },
        )?;

    Ok(head_state)
}

/// Make sure the local store starts from the reference genesis.
fn bootstrap<K: KVStore, F: ForkChoiceRule>(
    chain_service: &mut ChainService<K, F>,
    genesis_block: &BeaconBlock,
    genesis_state: &BeaconState,
    genesis_deposits: &[Deposit],
) -> Result<(), ReplayError> {
    let expected = genesis_block.root();

    let local_genesis = match chain_service.chain_start_latch().try_get() {
        Some(chain_start) => chain_start.genesis_root,
        None => {
            let (chain_start, _) = chain_service.initialize_chain(
                genesis_state.genesis_time,
                genesis_deposits,
                genesis_state.eth1_data,
            )?;
            chain_start.genesis_root
        }
    };

    if local_genesis != expected {
        return Err(ReplayError::GenesisMismatch {
            expected,
            got: local_genesis,
        });
    }
    Ok(())
}

/// Apply `block`, the canonical child of `parent`, returning its post-state.
fn replay_block<K: KVStore, F: ForkChoiceRule>(
    chain_service: &mut ChainService<K, F>,
    parent: &BeaconBlock,
    parent_state: &BeaconState,
    block: &BeaconBlock,
) -> Result<BeaconState, ReplayError> {
    let parent_root = parent.root();
    if block.parent_root != parent_root {
        return Err(ReplayError::BrokenChain {
            slot: block.slot,
            expected_parent: parent_root,
            got_parent: block.parent_root,
        });
    }

    let root = block.root();
    if let Some(state) = chain_service.store().state(&root)? {
        return Ok(state);
    }

    let state = chain_service
        .apply_block_state_transition(block, parent_state)
        .map_err(|err| ReplayError::InvalidBlock {
            slot: block.slot,
            source: err,
        })?;
    chain_service.apply_fork_choice_rule(block, &state)?;
    chain_service.cleanup_block_operations(block, &state)?;
    Ok(state)
}

#[derive(Debug)]
pub enum ReplayError {
    /// Reading the reference store failed, or it holds no chain.
    Reference(BeaconStoreError),

    /// The local store was started from a different genesis than the reference store.
    GenesisMismatch {
        expected: CryptoHash,
        got: CryptoHash,
    },

    /// A canonical reference block does not point at the canonical block before it.
    BrokenChain {
        slot: Slot,
        expected_parent: CryptoHash,
        got_parent: CryptoHash,
    },

    /// A reference block failed the state transition.
    InvalidBlock {
        slot: Slot,
        source: ChainServiceError,
    },

    ChainService(ChainServiceError),
}

impl Display for ReplayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Reference(err) => write!(f, "reference store: {}", err),
            ReplayError::GenesisMismatch { expected, got } => write!(
                f,
                "local genesis {} does not match reference genesis {}",
                got, expected
            ),
            ReplayError::BrokenChain {
                slot,
                expected_parent,
                got_parent,
            } => write!(
                f,
                "block at slot {} has parent {}, expected {}",
                slot, got_parent, expected_parent
            ),
            ReplayError::InvalidBlock { slot, source } => {
                write!(f, "block at slot {} did not apply: {}", slot, source)
            }
            ReplayError::ChainService(err) => Display::fmt(err, f),
        }
    }
}

impl From<ChainServiceError> for ReplayError {
    fn from(value: ChainServiceError) -> Self {
        ReplayError::ChainService(value)
    }
}

impl From<BeaconStoreError> for ReplayError {
    fn from(value: BeaconStoreError) -> Self {
        ReplayError::ChainService(ChainServiceError::BeaconStoreError(value))
    }
}
