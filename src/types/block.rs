/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'beacon block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{hash_borsh, CryptoHasher, Digest, Keypair},
    data_types::{CryptoHash, SignatureBytes, Slot, ValidatorIndex},
    deposit::{Deposit, Eth1Data},
    operations::{Attestation, VoluntaryExit},
};

/// A proposed extension of the beacon chain.
///
/// `parent_root` is the [root](Self::root) of the preceding block; it is a hash reference, never an
/// owning pointer. A block's `slot` is strictly greater than its parent's. `state_root` commits to the
/// [`BeaconState`](super::state::BeaconState) that results from applying the block to its parent's
/// state.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BeaconBlock {
    pub slot: Slot,
    pub parent_root: CryptoHash,
    pub state_root: CryptoHash,
    pub proposer_index: ValidatorIndex,
    pub body: BlockBody,
    pub signature: SignatureBytes,
}

/// The operations a block applies to the state.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockBody {
    pub eth1_data: Eth1Data,
    pub deposits: Vec<Deposit>,
    pub voluntary_exits: Vec<VoluntaryExit>,
    pub attestations: Vec<Attestation>,
}

impl BeaconBlock {
    /// Create an unsigned block. Call [`sign`](Self::sign) once `state_root` has been filled in.
    pub fn new(
        slot: Slot,
        parent_root: CryptoHash,
        proposer_index: ValidatorIndex,
        body: BlockBody,
    ) -> BeaconBlock {
        BeaconBlock {
            slot,
            parent_root,
            state_root: CryptoHash::zero(),
            proposer_index,
            body,
            signature: SignatureBytes::empty(),
        }
    }

    /// Create the genesis block that commits to `genesis_state_root`.
    ///
    /// The genesis block is never proposed or signed: it sits at slot 0 with a zero parent root.
    pub fn genesis(genesis_state_root: CryptoHash, genesis_slot: Slot) -> BeaconBlock {
        BeaconBlock {
            slot: genesis_slot,
            parent_root: CryptoHash::zero(),
            state_root: genesis_state_root,
            proposer_index: ValidatorIndex::new(0),
            body: BlockBody::default(),
            signature: SignatureBytes::empty(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.parent_root.is_zero()
    }

    /// Hash of the whole block, including its signature. Other blocks refer to this block by its root.
    pub fn root(&self) -> CryptoHash {
        hash_borsh(self)
    }

    /// Hash of the fields that the proposer signs, i.e., everything but the signature.
    pub fn signing_root(&self) -> CryptoHash {
        let mut bytes = Vec::new();
        let _ = self.slot.serialize(&mut bytes);
        let _ = self.parent_root.serialize(&mut bytes);
        let _ = self.state_root.serialize(&mut bytes);
        let _ = self.proposer_index.serialize(&mut bytes);
        let _ = self.body.serialize(&mut bytes);

        let mut hasher = CryptoHasher::new();
        hasher.update(&bytes);
        CryptoHash::new(hasher.finalize().into())
    }

    /// Sign the block with the proposer's `keypair`, replacing any previous signature.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(&self.signing_root().bytes());
    }
}
