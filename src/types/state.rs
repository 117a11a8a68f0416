/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The beacon chain state and the validator registry inside it.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::hash_borsh,
    data_types::{CryptoHash, Gwei, Slot, Timestamp, ValidatorIndex, VerifyingKeyBytes, Weight},
    deposit::Eth1Data,
};

/// The full chain state at a slot boundary.
///
/// A state is uniquely addressed by its [root](Self::root). States are never edited in place by this
/// crate: the [state transition](crate::state_transition) always produces a new state and leaves its
/// input untouched.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BeaconState {
    pub slot: Slot,
    pub genesis_time: Timestamp,
    pub validators: Vec<Validator>,
    pub eth1_data: Eth1Data,
    /// Index of the next deposit that a block must include.
    pub eth1_deposit_index: u64,
    /// Sum of the effective balances of every attestation included along this chain.
    pub chain_weight: Weight,
    /// The block root voted for by the most recently included attestation.
    pub latest_attested_root: CryptoHash,
}

impl BeaconState {
    /// The content hash of this state.
    pub fn root(&self) -> CryptoHash {
        hash_borsh(self)
    }

    pub fn validator(&self, index: ValidatorIndex) -> Option<&Validator> {
        self.validators.get(index.int() as usize)
    }

    pub fn validator_index_of(&self, pubkey: &VerifyingKeyBytes) -> Option<ValidatorIndex> {
        self.validators
            .iter()
            .position(|validator| &validator.pubkey == pubkey)
            .map(|pos| ValidatorIndex::new(pos as u64))
    }

    /// Get the indices of the validators that are active at `slot`, in ascending order.
    pub fn active_validator_indices(&self, slot: Slot) -> Vec<ValidatorIndex> {
        self.validators
            .iter()
            .enumerate()
            .filter(|(_, validator)| validator.is_active_at(slot))
            .map(|(pos, _)| ValidatorIndex::new(pos as u64))
            .collect()
    }

    /// Get the validator expected to propose the block at `slot`, if any validator is active.
    ///
    /// Proposers are assigned round-robin over the active validators ordered by index.
    pub fn proposer_index(&self, slot: Slot) -> Option<ValidatorIndex> {
        let active = self.active_validator_indices(slot);
        if active.is_empty() {
            return None;
        }
        Some(active[(slot.int() % active.len() as u64) as usize])
    }
}

/// An entry in the validator registry.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Validator {
    pub pubkey: VerifyingKeyBytes,
    pub withdrawal_credentials: CryptoHash,
    pub effective_balance: Gwei,
    pub activation_slot: Slot,
    pub exit_slot: Option<Slot>,
}

impl Validator {
    pub fn is_active_at(&self, slot: Slot) -> bool {
        self.activation_slot <= slot && self.exit_slot.map_or(true, |exit_slot| slot < exit_slot)
    }
}
