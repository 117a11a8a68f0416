/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Processing of the operations embedded in a block's body.
//!
//! Each function here mutates a state that the caller has already cloned for the block being
//! processed, and short-circuits on the first invalid operation.

use std::collections::HashSet;

use crate::{
    config::ChainParameters,
    types::{
        crypto_primitives::verify_signature,
        data_types::Slot,
        deposit::Deposit,
        operations::{Attestation, VoluntaryExit},
        state::{BeaconState, Validator},
    },
};

use super::{InvalidBlockReason, TransitionError};

/// Apply `deposits`, which must continue the deposit log exactly where the state left off.
///
/// A deposit with an invalid proof of possession still advances `eth1_deposit_index`, but has no
/// other effect.
pub fn process_deposits(
    state: &mut BeaconState,
    deposits: &[Deposit],
    parameters: &ChainParameters,
) -> Result<(), TransitionError> {
    for deposit in deposits {
        let expected = state.eth1_deposit_index;
        if deposit.index.int() != expected || expected >= state.eth1_data.deposit_count {
            return Err(InvalidBlockReason::DepositOutOfOrder {
                expected,
                got: deposit.index.int(),
                deposit_count: state.eth1_data.deposit_count,
            }
            .into());
        }
        state.eth1_deposit_index += 1;

        let activation_slot = state.slot.next();
        apply_deposit(state, deposit, activation_slot, parameters);
    }
    Ok(())
}

/// Register the validator behind `deposit`, or top up its balance if it is already registered.
///
/// Returns whether the deposit had any effect.
pub(crate) fn apply_deposit(
    state: &mut BeaconState,
    deposit: &Deposit,
    activation_slot: Slot,
    parameters: &ChainParameters,
) -> bool {
    let data = &deposit.data;
    if !data.has_valid_proof_of_possession() {
        log::warn!(
            "Ignoring deposit {} with an invalid proof of possession",
            deposit.index.int()
        );
        return false;
    }

    match state.validator_index_of(&data.pubkey) {
        Some(index) => {
            let validator = &mut state.validators[index.int() as usize];
            validator.effective_balance = validator
                .effective_balance
                .saturating_add_capped(data.amount, parameters.max_effective_balance);
            true
        }
        None if data.amount >= parameters.min_deposit_amount => {
            state.validators.push(Validator {
                pubkey: data.pubkey,
                withdrawal_credentials: data.withdrawal_credentials,
                effective_balance: data.amount.min(parameters.max_effective_balance),
                activation_slot,
                exit_slot: None,
            });
            true
        }
        None => false,
    }
}

/// Apply `exits`. An exiting validator stops being active from the slot after `block_slot`.
pub fn process_voluntary_exits(
    state: &mut BeaconState,
    exits: &[VoluntaryExit],
    block_slot: Slot,
) -> Result<(), TransitionError> {
    for exit in exits {
        let invalid = || InvalidBlockReason::InvalidVoluntaryExit {
            validator_index: exit.validator_index,
        };

        let validator = state
            .validators
            .get_mut(exit.validator_index.int() as usize)
            .ok_or_else(invalid)?;

        let valid = exit.slot <= block_slot
            && validator.is_active_at(block_slot)
            && validator.exit_slot.is_none()
            && verify_signature(
                &validator.pubkey,
                &VoluntaryExit::signing_message(exit.validator_index, exit.slot),
                &exit.signature,
            );
        if !valid {
            return Err(invalid().into());
        }

        validator.exit_slot = Some(block_slot.next());
    }
    Ok(())
}

/// Apply `attestations`, adding each attester's effective balance to the chain weight.
pub fn process_attestations(
    state: &mut BeaconState,
    attestations: &[Attestation],
    block_slot: Slot,
) -> Result<(), TransitionError> {
    let mut attesters = HashSet::new();

    for attestation in attestations {
        let invalid = || InvalidBlockReason::InvalidAttestation {
            validator_index: attestation.validator_index,
        };

        let validator = state
            .validator(attestation.validator_index)
            .ok_or_else(invalid)?;

        let valid = attestation.slot < block_slot
            && validator.is_active_at(attestation.slot)
            && attesters.insert(attestation.validator_index)
            && verify_signature(
                &validator.pubkey,
                &Attestation::signing_message(
                    attestation.validator_index,
                    attestation.slot,
                    &attestation.beacon_block_root,
                ),
                &attestation.signature,
            );
        if !valid {
            return Err(invalid().into());
        }

        let balance = validator.effective_balance;
        state.chain_weight += balance;
        state.latest_attested_root = attestation.beacon_block_root;
    }
    Ok(())
}


/// Whether `attestation` could be included in a block built on top of `state`: the attester exists
/// and was active at the attested slot, that slot is not ahead of `state`, and the signature holds.
pub fn is_includable_attestation(state: &BeaconState, attestation: &Attestation) -> bool {
    let validator = match state.validator(attestation.validator_index) {
        Some(validator) => validator,
        None => return false,
    };

    attestation.slot <= state.slot
        && validator.is_active_at(attestation.slot)
        && verify_signature(
            &validator.pubkey,
            &Attestation::signing_message(
                attestation.validator_index,
                attestation.slot,
                &attestation.beacon_block_root,
            ),
            &attestation.signature,
        )
}

/// Whether `exit` could be included in the block at the slot after `state`'s.
pub fn is_includable_voluntary_exit(state: &BeaconState, exit: &VoluntaryExit) -> bool {
    let validator = match state.validator(exit.validator_index) {
        Some(validator) => validator,
        None => return false,
    };

    let next_slot = state.slot.next();
    exit.slot <= next_slot
        && validator.is_active_at(next_slot)
        && validator.exit_slot.is_none()
        && verify_signature(
            &validator.pubkey,
            &VoluntaryExit::signing_message(exit.validator_index, exit.slot),
            &exit.signature,
        )
}
