/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed operations that a block's body may embed besides deposits.
//!
//! Operations are gossiped between nodes and staged in the
//! [`OperationPool`](crate::chain_service::operation_pool::OperationPool) until a block includes them.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::Keypair,
    data_types::{CryptoHash, SignatureBytes, Slot, ValidatorIndex},
};

/// A validator's signed request to leave the active validator set.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoluntaryExit {
    pub validator_index: ValidatorIndex,
    pub slot: Slot,
    pub signature: SignatureBytes,
}

impl VoluntaryExit {
    pub fn new_signed(keypair: &Keypair, validator_index: ValidatorIndex, slot: Slot) -> Self {
        VoluntaryExit {
            validator_index,
            slot,
            signature: keypair.sign(&Self::signing_message(validator_index, slot)),
        }
    }

    pub fn signing_message(validator_index: ValidatorIndex, slot: Slot) -> Vec<u8> {
        (b'X', validator_index, slot).try_to_vec().unwrap_or_default()
    }
}

/// A validator's signed vote that `beacon_block_root` is the head of the chain at `slot`.
///
/// Attestations included in a block add the attester's effective balance to the chain's
/// [`chain_weight`](super::state::BeaconState::chain_weight).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Attestation {
    pub validator_index: ValidatorIndex,
    pub slot: Slot,
    pub beacon_block_root: CryptoHash,
    pub signature: SignatureBytes,
}

impl Attestation {
    pub fn new_signed(
        keypair: &Keypair,
        validator_index: ValidatorIndex,
        slot: Slot,
        beacon_block_root: CryptoHash,
    ) -> Self {
        Attestation {
            validator_index,
            slot,
            beacon_block_root,
            signature: keypair.sign(&Self::signing_message(
                validator_index,
                slot,
                &beacon_block_root,
            )),
        }
    }

    pub fn signing_message(
        validator_index: ValidatorIndex,
        slot: Slot,
        beacon_block_root: &CryptoHash,
    ) -> Vec<u8> {
        (b'A', validator_index, slot, *beacon_block_root)
            .try_to_vec()
            .unwrap_or_default()
    }
}
