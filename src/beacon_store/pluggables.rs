//! Traits for pluggable Beacon Store persistence.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::types::{
    block::BeaconBlock,
    data_types::{CryptoHash, DepositIndex, Eth1Address, Slot, Timestamp},
    deposit::Deposit,
    state::BeaconState,
};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Get the value at `key` and deserialize it as a `T`, reporting failures against `variable`.
    fn get_deserialized<T: BorshDeserialize>(
        &self,
        key: &[u8],
        variable: Key,
    ) -> Result<Option<T>, KVGetError> {
        match self.get(key) {
            None => Ok(None),
            Some(bytes) => T::deserialize(&mut bytes.as_slice())
                .map(Some)
                .map_err(|err| KVGetError::DeserializeValueError {
                    key: variable,
                    source: err,
                }),
        }
    }

    /* ↓↓↓ Blocks ↓↓↓ */

    fn block(&self, block: &CryptoHash) -> Result<Option<BeaconBlock>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::BLOCKS, &block.bytes()),
            Key::Block { block: *block },
        )
    }

    /* ↓↓↓ Block at Slot ↓↓↓ */

    fn block_at_slot(&self, slot: Slot) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::BLOCK_AT_SLOT, &slot.to_le_bytes()),
            Key::BlockAtSlot { slot },
        )
    }

    /* ↓↓↓ States ↓↓↓ */

    fn state(&self, block: &CryptoHash) -> Result<Option<BeaconState>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::STATES, &block.bytes()),
            Key::State { block: *block },
        )
    }

    /* ↓↓↓ Chain Head ↓↓↓ */

    fn chain_head(&self) -> Result<Option<CryptoHash>, KVGetError> {
        self.get_deserialized(&variables::CHAIN_HEAD, Key::ChainHead)
    }

    /* ↓↓↓ Tips ↓↓↓ */

    fn tips(&self) -> Result<Vec<CryptoHash>, KVGetError> {
        Ok(self
            .get_deserialized(&variables::TIPS, Key::Tips)?
            .unwrap_or_default())
    }

    /* ↓↓↓ Deposits ↓↓↓ */

    fn deposit(&self, index: DepositIndex) -> Result<Option<Deposit>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::DEPOSITS, &index.to_le_bytes()),
            Key::Deposit { index },
        )
    }

    fn deposit_count(&self) -> Result<u64, KVGetError> {
        Ok(self
            .get_deserialized(&variables::DEPOSIT_COUNT, Key::DepositCount)?
            .unwrap_or(0))
    }

    /* ↓↓↓ Deposit Contract ↓↓↓ */

    fn deposit_contract(&self) -> Result<Option<Eth1Address>, KVGetError> {
        self.get_deserialized(&variables::DEPOSIT_CONTRACT, Key::DepositContract)
    }

    /* ↓↓↓ Genesis Time ↓↓↓ */

    fn genesis_time(&self) -> Result<Option<Timestamp>, KVGetError> {
        self.get_deserialized(&variables::GENESIS_TIME, Key::GenesisTime)
    }
}

impl<G: KVGet + ?Sized> KVGet for &G {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get(key)
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found, even though another variable implies
///    that it should exist.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

#[derive(Debug)]
pub enum Key {
    Block { block: CryptoHash },
    BlockAtSlot { slot: Slot },
    State { block: CryptoHash },
    ChainHead,
    Tips,
    Deposit { index: DepositIndex },
    DepositCount,
    DepositContract,
    GenesisTime,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            &Key::Block { block } => write!(f, "Block {}", block),
            &Key::BlockAtSlot { slot } => write!(f, "Block at slot {}", slot),
            &Key::State { block } => write!(f, "State of block {}", block),
            &Key::ChainHead => write!(f, "Chain Head"),
            &Key::Tips => write!(f, "Tips"),
            &Key::Deposit { index } => write!(f, "Deposit at index {}", index.int()),
            &Key::DepositCount => write!(f, "Deposit Count"),
            &Key::DepositContract => write!(f, "Deposit Contract"),
            &Key::GenesisTime => write!(f, "Genesis Time"),
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
