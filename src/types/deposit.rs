/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validator deposits, as observed on the proof of work chain by the Eth1 deposit watcher.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{verify_signature, Keypair},
    data_types::{CryptoHash, DepositIndex, Gwei, SignatureBytes, VerifyingKeyBytes},
};

/// Summary of the deposit contract's state at some proof of work block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Eth1Data {
    pub deposit_root: CryptoHash,
    pub deposit_count: u64,
    pub block_hash: CryptoHash,
}

/// An append-only record of a validator's entry into the system, keyed by its insertion `index` in
/// the deposit log.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Deposit {
    pub index: DepositIndex,
    pub data: DepositData,
}

/// The contents of a deposit.
///
/// `signature` is a proof of possession: a signature by `pubkey` over the
/// [`signing_message`](Self::signing_message), which covers every other field. A deposit with an
/// invalid proof of possession is consumed but otherwise ignored by the state transition.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DepositData {
    pub pubkey: VerifyingKeyBytes,
    pub withdrawal_credentials: CryptoHash,
    pub amount: Gwei,
    pub signature: SignatureBytes,
}

impl DepositData {
    /// Create a `DepositData` for `keypair`'s public key, signed with `keypair`.
    pub fn new_signed(keypair: &Keypair, withdrawal_credentials: CryptoHash, amount: Gwei) -> Self {
        let pubkey = keypair.public_bytes();
        let signature =
            keypair.sign(&Self::signing_message(&pubkey, &withdrawal_credentials, amount));
        DepositData {
            pubkey,
            withdrawal_credentials,
            amount,
            signature,
        }
    }

    /// The message that the proof of possession signs.
    pub fn signing_message(
        pubkey: &VerifyingKeyBytes,
        withdrawal_credentials: &CryptoHash,
        amount: Gwei,
    ) -> Vec<u8> {
        (*pubkey, *withdrawal_credentials, amount)
            .try_to_vec()
            .unwrap_or_default()
    }

    /// Check the deposit's proof of possession.
    pub fn has_valid_proof_of_possession(&self) -> bool {
        verify_signature(
            &self.pubkey,
            &Self::signing_message(&self.pubkey, &self.withdrawal_credentials, self.amount),
            &self.signature,
        )
    }
}
