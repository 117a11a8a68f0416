/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state transition function: `(state, block) -> state'`.
//!
//! Every function in this module is pure. They read their inputs through shared references and
//! return a freshly built [`BeaconState`]; on failure the caller's state is exactly what it was
//! before the call. Identical inputs always produce identical outputs, and therefore identical
//! [state roots](BeaconState::root).
//!
//! ## Order of checks
//!
//! [`transition`] applies a block to the state at its parent in the following order:
//! 1. The block's slot must be strictly greater than the state's slot. The state then advances
//!    through any skipped slots to the block's slot.
//! 2. The block must be proposed by the slot's [proposer](BeaconState::proposer_index), and carry a
//!    valid proposer signature over its [signing root](BeaconBlock::signing_root).
//! 3. The block's Eth1 data must not decrease the number of known deposits.
//! 4. [Deposits, voluntary exits, and attestations](operations) are processed in that order.
//! 5. The root of the resulting state must equal the block's `state_root`.
//!
//! Whether an [`InvalidBlock`](TransitionError::InvalidBlock) error is fatal is up to the caller:
//! the initial sync service skips the block, while [`replay_chain`](crate::replay::replay_chain)
//! aborts.

pub mod genesis;

pub mod operations;

use crate::{
    config::ChainParameters,
    types::{
        block::BeaconBlock,
        crypto_primitives::verify_signature,
        data_types::{CryptoHash, Slot, ValidatorIndex},
        state::BeaconState,
    },
};

/// Apply `block` on top of `state`, returning the post-state.
pub fn transition(
    state: &BeaconState,
    block: &BeaconBlock,
    parameters: &ChainParameters,
) -> Result<BeaconState, TransitionError> {
    verify_block_validity(block, state)?;

    let post_state = process_block(state, block, parameters)?;

    let computed = post_state.root();
    if computed != block.state_root {
        return Err(InvalidBlockReason::StateRootMismatch {
            expected: block.state_root,
            computed,
        }
        .into());
    }

    Ok(post_state)
}

/// Compute the state that `block` would produce on top of `state`, without checking the proposer's
/// signature or the block's `state_root`.
///
/// Block builders use this to fill in `state_root` before signing.
pub fn compute_post_state(
    state: &BeaconState,
    block: &BeaconBlock,
    parameters: &ChainParameters,
) -> Result<BeaconState, TransitionError> {
    check_slot(block, state)?;
    check_proposer_index(block, state)?;
    check_eth1_data(block, state)?;
    process_block(state, block, parameters)
}

/// Read-only pre-check of a block's header against the state at its parent.
///
/// Runs the same checks as [`transition`] does before processing any operation: slot monotonicity,
/// proposer index, proposer signature, and Eth1 deposit count regression.
pub fn verify_block_validity(block: &BeaconBlock, state: &BeaconState) -> Result<(), TransitionError> {
    check_slot(block, state)?;
    let proposer_index = check_proposer_index(block, state)?;
    check_proposer_signature(block, state, proposer_index)?;
    check_eth1_data(block, state)
}

fn process_block(
    state: &BeaconState,
    block: &BeaconBlock,
    parameters: &ChainParameters,
) -> Result<BeaconState, TransitionError> {
    let mut post_state = state.clone();

    // Skipped slots leave no trace in the state other than the slot number.
    post_state.slot = block.slot;
    post_state.eth1_data = block.body.eth1_data;

    operations::process_deposits(&mut post_state, &block.body.deposits, parameters)?;
    operations::process_voluntary_exits(&mut post_state, &block.body.voluntary_exits, block.slot)?;
    operations::process_attestations(&mut post_state, &block.body.attestations, block.slot)?;

    Ok(post_state)
}

fn check_slot(block: &BeaconBlock, state: &BeaconState) -> Result<(), TransitionError> {
    if block.slot <= state.slot {
        return Err(InvalidBlockReason::SlotNotIncreasing {
            state_slot: state.slot,
            block_slot: block.slot,
        }
        .into());
    }
    Ok(())
}

fn check_proposer_index(
    block: &BeaconBlock,
    state: &BeaconState,
) -> Result<ValidatorIndex, TransitionError> {
    let expected = state
        .proposer_index(block.slot)
        .ok_or(InvalidBlockReason::NoActiveValidators { slot: block.slot })?;
    if block.proposer_index != expected {
        return Err(InvalidBlockReason::WrongProposer {
            expected,
            got: block.proposer_index,
        }
        .into());
    }
    Ok(expected)
}

fn check_proposer_signature(
    block: &BeaconBlock,
    state: &BeaconState,
    proposer_index: ValidatorIndex,
) -> Result<(), TransitionError> {
    let valid = state.validator(proposer_index).is_some_and(|proposer| {
        verify_signature(
            &proposer.pubkey,
            &block.signing_root().bytes(),
            &block.signature,
        )
    });
    if !valid {
        return Err(InvalidBlockReason::InvalidProposerSignature { proposer_index }.into());
    }
    Ok(())
}

fn check_eth1_data(block: &BeaconBlock, state: &BeaconState) -> Result<(), TransitionError> {
    if block.body.eth1_data.deposit_count < state.eth1_data.deposit_count {
        return Err(InvalidBlockReason::Eth1DataRegression {
            state_deposit_count: state.eth1_data.deposit_count,
            block_deposit_count: block.body.eth1_data.deposit_count,
        }
        .into());
    }
    Ok(())
}

/// Error when applying a block to a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    InvalidBlock(InvalidBlockReason),
}

impl From<InvalidBlockReason> for TransitionError {
    fn from(value: InvalidBlockReason) -> Self {
        TransitionError::InvalidBlock(value)
    }
}

/// The specific rule that an invalid block broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidBlockReason {
    SlotNotIncreasing {
        state_slot: Slot,
        block_slot: Slot,
    },
    NoActiveValidators {
        slot: Slot,
    },
    WrongProposer {
        expected: ValidatorIndex,
        got: ValidatorIndex,
    },
    InvalidProposerSignature {
        proposer_index: ValidatorIndex,
    },
    Eth1DataRegression {
        state_deposit_count: u64,
        block_deposit_count: u64,
    },
    DepositOutOfOrder {
        expected: u64,
        got: u64,
        deposit_count: u64,
    },
    InvalidVoluntaryExit {
        validator_index: ValidatorIndex,
    },
    InvalidAttestation {
        validator_index: ValidatorIndex,
    },
    StateRootMismatch {
        expected: CryptoHash,
        computed: CryptoHash,
    },
}
