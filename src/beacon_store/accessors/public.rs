//! Read-only handles into the Beacon Store, for library users and the sync server.

use crate::types::{
    block::BeaconBlock,
    data_types::{CryptoHash, DepositIndex, Eth1Address, Slot, Timestamp},
    deposit::Deposit,
    state::BeaconState,
};

use super::super::pluggables::{KVGet, KVGetError, KVStore, Key};

use super::internal::BeaconStoreError;

/// A factory for [`BeaconStoreSnapshot`]s. Cloning a camera is cheap if cloning the key-value store is.
#[derive(Clone)]
pub struct BeaconStoreCamera<K: KVStore>(K);

impl<K: KVStore> BeaconStoreCamera<K> {
    pub fn new(kv_store: K) -> Self {
        BeaconStoreCamera(kv_store)
    }

    /// Take a consistent, read-only view of the store.
    pub fn snapshot(&self) -> BeaconStoreSnapshot<K::Snapshot<'_>> {
        BeaconStoreSnapshot::new(self.0.snapshot())
    }
}

/// A read-only view of the Beacon Store.
///
/// If `S` is a [`KVStore::Snapshot`], every read made through one `BeaconStoreSnapshot` observes the
/// same store contents.
pub struct BeaconStoreSnapshot<S: KVGet>(S);

impl<S: KVGet> BeaconStoreSnapshot<S> {
    pub(crate) fn new(kv_snapshot: S) -> Self {
        BeaconStoreSnapshot(kv_snapshot)
    }

    /* ↓↓↓ Blocks and States ↓↓↓ */

    pub fn block(&self, block: &CryptoHash) -> Result<Option<BeaconBlock>, BeaconStoreError> {
        Ok(self.0.block(block)?)
    }

    pub fn contains_block(&self, block: &CryptoHash) -> Result<bool, BeaconStoreError> {
        Ok(self.0.block(block)?.is_some())
    }

    pub fn state(&self, block: &CryptoHash) -> Result<Option<BeaconState>, BeaconStoreError> {
        Ok(self.0.state(block)?)
    }

    /* ↓↓↓ Canonical Chain ↓↓↓ */

    /// Get the root of the canonical block at `slot`, if there is one.
    pub fn block_at_slot_root(&self, slot: Slot) -> Result<Option<CryptoHash>, BeaconStoreError> {
        Ok(self.0.block_at_slot(slot)?)
    }

    /// Get the canonical block at `slot`. Returns `None` for skipped slots and slots above the head.
    pub fn block_by_slot(&self, slot: Slot) -> Result<Option<BeaconBlock>, BeaconStoreError> {
        match self.0.block_at_slot(slot)? {
            None => Ok(None),
            Some(root) => Ok(Some(
                self.0
                    .block(&root)?
                    .ok_or(BeaconStoreError::BlockExpectedButNotFound { block: root })?,
            )),
        }
    }

    /// Get the canonical blocks with slots in `start..=end`, in ascending slot order.
    pub fn blocks_by_slot_range(
        &self,
        start: Slot,
        end: Slot,
    ) -> Result<Vec<BeaconBlock>, BeaconStoreError> {
        let mut blocks = Vec::new();
        let mut slot = start;
        while slot <= end {
            if let Some(block) = self.block_by_slot(slot)? {
                blocks.push(block);
            }
            if slot == Slot::new(u64::MAX) {
                break;
            }
            slot = slot.next();
        }
        Ok(blocks)
    }

    pub fn chain_head_root(&self) -> Result<Option<CryptoHash>, BeaconStoreError> {
        Ok(self.0.chain_head()?)
    }

    /// Get the canonical head block together with its post-state.
    pub fn chain_head(&self) -> Result<(BeaconBlock, BeaconState), BeaconStoreError> {
        let root = self
            .0
            .chain_head()?
            .ok_or(BeaconStoreError::NotInitialized)?;
        let block = self
            .0
            .block(&root)?
            .ok_or(BeaconStoreError::BlockExpectedButNotFound { block: root })?;
        let state = self
            .0
            .state(&root)?
            .ok_or(BeaconStoreError::StateExpectedButNotFound { block: root })?;
        Ok((block, state))
    }

    pub fn head_state(&self) -> Result<BeaconState, BeaconStoreError> {
        Ok(self.chain_head()?.1)
    }

    pub fn tips(&self) -> Result<Vec<CryptoHash>, BeaconStoreError> {
        Ok(self.0.tips()?)
    }

    pub fn is_initialized(&self) -> Result<bool, BeaconStoreError> {
        Ok(self.0.chain_head()?.is_some())
    }

    pub fn genesis_time(&self) -> Result<Option<Timestamp>, BeaconStoreError> {
        Ok(self.0.genesis_time()?)
    }

    /* ↓↓↓ Deposits ↓↓↓ */

    pub fn deposit(&self, index: DepositIndex) -> Result<Option<Deposit>, BeaconStoreError> {
        Ok(self.0.deposit(index)?)
    }

    pub fn deposit_count(&self) -> Result<u64, BeaconStoreError> {
        Ok(self.0.deposit_count()?)
    }

    /// Get the deposits selected by `range`, ordered by index.
    pub fn all_deposits(&self, range: DepositRange) -> Result<Vec<Deposit>, BeaconStoreError> {
        let count = self.0.deposit_count()?;
        let end = match range.max_count {
            Some(max_count) => count.min(range.start.int().saturating_add(max_count)),
            None => count,
        };

        (range.start.int()..end)
            .map(|index| {
                let index = DepositIndex::new(index);
                self.0.deposit(index)?.ok_or(BeaconStoreError::KVGetError(
                    KVGetError::ValueExpectedButNotFound {
                        key: Key::Deposit { index },
                    },
                ))
            })
            .collect()
    }

    pub fn deposit_contract_address(&self) -> Result<Option<Eth1Address>, BeaconStoreError> {
        Ok(self.0.deposit_contract()?)
    }
}

/// Selects a contiguous run of the deposit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositRange {
    pub start: DepositIndex,
    pub max_count: Option<u64>,
}

impl DepositRange {
    /// The whole deposit log.
    pub fn all() -> Self {
        DepositRange {
            start: DepositIndex::new(0),
            max_count: None,
        }
    }

    /// The first `count` deposits in the log, or fewer if the log is shorter.
    pub fn first(count: u64) -> Self {
        DepositRange {
            start: DepositIndex::new(0),
            max_count: Some(count),
        }
    }
}
