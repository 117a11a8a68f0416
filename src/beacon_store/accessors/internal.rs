/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read-and-write handle used by the services of a beacon node to mutate the Beacon Store.
//!
//! # Initializing the Beacon Store
//!
//! A fresh Beacon Store is empty except for whatever deposits and deposit contract binding have been
//! written into it. [`initialize_state`](BeaconStore::initialize_state) builds the genesis state and
//! genesis block from a set of deposits and writes, in one batch:
//!
//! |Variable|Initial value|
//! |---|---|
//! |Blocks|The genesis block.|
//! |States|The genesis state, under the genesis block's root.|
//! |Block at Slot|The genesis block's root, at the genesis slot.|
//! |Chain Head|The genesis block's root.|
//! |Tips|The genesis block's root.|
//! |Genesis Time|Provided to `initialize_state`.|
//!
//! # The single-writer lock
//!
//! Every clone of a `BeaconStore` shares one mutex. Methods that read a variable and then write it
//! back (the chain head, tips, deposit count, and deposit contract) run while holding it, so that two
//! threads can never interleave their read-modify-write sequences. Plain inserts that no other
//! variable depends on, like [`save_block`](BeaconStore::save_block), do not take the lock.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex},
};

use borsh::BorshSerialize;

use crate::{
    config::ChainParameters,
    state_transition::genesis::genesis_state,
    types::{
        block::BeaconBlock,
        data_types::{CryptoHash, DepositIndex, Eth1Address, Slot, Timestamp},
        deposit::{Deposit, Eth1Data},
        state::BeaconState,
    },
};

use super::super::{
    pluggables::{KVGetError, KVStore, Key, WriteBatch},
    variables::{self, concat},
};

use super::public::{BeaconStoreCamera, BeaconStoreSnapshot, DepositRange};

/// Read and write handle into the Beacon Store.
///
/// ## Categories of methods
///
/// Methods are grouped into three categories, each defined in a separate `impl` block:
/// 1. [Lifecycle methods](#impl-BeaconStore<K>).
/// 2. [Top-level state updaters](#impl-BeaconStore<K>-1).
/// 3. [State getters](#impl-BeaconStore<K>-2).
#[derive(Clone)]
pub struct BeaconStore<K: KVStore> {
    kv_store: K,
    writer_lock: Arc<Mutex<()>>,
}

/// Lifecycle methods.
impl<K: KVStore> BeaconStore<K> {
    /// Create a new `BeaconStore` on top of `kv_store`.
    ///
    /// Create the store once and clone it for each thread that needs write access: clones share the
    /// single-writer lock, while independently created stores over the same `kv_store` do not.
    pub fn new(kv_store: K) -> Self {
        BeaconStore {
            kv_store,
            writer_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a `BeaconStoreSnapshot`.
    pub fn snapshot(&self) -> BeaconStoreSnapshot<K::Snapshot<'_>> {
        BeaconStoreSnapshot::new(self.kv_store.snapshot())
    }

    /// Create a read-only `BeaconStoreCamera` over the same key-value store.
    pub fn camera(&self) -> BeaconStoreCamera<K> {
        BeaconStoreCamera::new(self.kv_store.clone())
    }

    /// Atomically write the changes in `write_batch` into the key-value store.
    pub fn write(&mut self, write_batch: BeaconStoreWriteBatch<K::WriteBatch>) {
        self.kv_store.write(write_batch.0)
    }

    /// Run `f` while holding the single-writer lock shared by every clone of this store.
    ///
    /// The lock guards no data, so a poisoned lock is simply taken over.
    pub fn with_writer_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let writer_lock = self.writer_lock.clone();
        let _guard = writer_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(self)
    }

    /// Read through the key-value store directly, without taking a whole-store snapshot.
    ///
    /// Some key-value stores block writers for as long as a snapshot is alive, so the updaters below
    /// never hold one.
    fn reads(&self) -> BeaconStoreSnapshot<&K> {
        BeaconStoreSnapshot::new(&self.kv_store)
    }
}

/// Top-level state updaters.
impl<K: KVStore> BeaconStore<K> {
    /// Build the genesis state and block from `deposits` and make them the chain head.
    ///
    /// Fails with [`AlreadyInitialized`](BeaconStoreError::AlreadyInitialized) if the store already has
    /// a chain head.
    pub fn initialize_state(
        &mut self,
        genesis_time: Timestamp,
        deposits: &[Deposit],
        eth1_data: Eth1Data,
        parameters: &ChainParameters,
    ) -> Result<(BeaconBlock, BeaconState), BeaconStoreError> {
        self.with_writer_lock(|store| {
            if store.reads().chain_head_root()?.is_some() {
                return Err(BeaconStoreError::AlreadyInitialized);
            }

            let state = genesis_state(genesis_time, deposits, eth1_data, parameters);
            let block = BeaconBlock::genesis(state.root(), state.slot);
            let root = block.root();

            let mut wb = BeaconStoreWriteBatch::new();
            wb.set_block(&root, &block)?;
            wb.set_state(&root, &state)?;
            wb.set_block_at_slot(block.slot, &root)?;
            wb.set_chain_head(&root)?;
            wb.set_tips(&vec![root])?;
            wb.set_genesis_time(genesis_time)?;
            store.write(wb);

            Ok((block, state))
        })
    }

    /// Atomically make `(block, state)` the chain head, saving both.
    ///
    /// This bypasses fork choice, and is meant for bootstrapping a store with a known chain. Every
    /// ancestor of `block` must already be saved, and `state` must be the state that `block` commits
    /// to.
    pub fn update_chain_head(
        &mut self,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<(), BeaconStoreError> {
        let root = block.root();
        if state.root() != block.state_root {
            return Err(BeaconStoreError::HeadStateMismatch { block: root });
        }

        self.with_writer_lock(|store| {
            let mut wb = BeaconStoreWriteBatch::new();
            wb.set_block(&root, block)?;
            wb.set_state(&root, state)?;
            wb.set_tips(&store.tips_after_insert(&root, block)?)?;
            store.set_canonical_chain(&mut wb, &root, block)?;
            store.write(wb);
            Ok(())
        })
    }

    /// Save `block`, whether or not it is or will ever be canonical. Returns the block's root.
    pub fn save_block(&mut self, block: &BeaconBlock) -> Result<CryptoHash, BeaconStoreError> {
        let root = block.root();
        let mut wb = BeaconStoreWriteBatch::new();
        wb.set_block(&root, block)?;
        self.write(wb);
        Ok(root)
    }

    /// Save the post-state of the block with root `block`.
    pub fn save_state(
        &mut self,
        block: &CryptoHash,
        state: &BeaconState,
    ) -> Result<(), BeaconStoreError> {
        let mut wb = BeaconStoreWriteBatch::new();
        wb.set_state(block, state)?;
        self.write(wb);
        Ok(())
    }

    /// Append `deposit` to the deposit log.
    ///
    /// The deposit's index must equal the current deposit count. Saving a deposit that is already in
    /// the log unchanged is a no-op.
    pub fn save_deposit(&mut self, deposit: &Deposit) -> Result<(), BeaconStoreError> {
        self.with_writer_lock(|store| {
            let count = store.reads().deposit_count()?;
            if deposit.index.int() < count
                && store.reads().deposit(deposit.index)?.as_ref() == Some(deposit)
            {
                return Ok(());
            }
            if deposit.index.int() != count {
                return Err(BeaconStoreError::DepositOutOfOrder {
                    expected: count,
                    got: deposit.index,
                });
            }

            let mut wb = BeaconStoreWriteBatch::new();
            wb.set_deposit(deposit)?;
            wb.set_deposit_count(count + 1)?;
            store.write(wb);
            Ok(())
        })
    }

    /// Bind this store to the deposit contract at `address`.
    ///
    /// The first call stores `address`. Later calls succeed if they pass the same address, and fail
    /// with [`InvalidDepositContract`](BeaconStoreError::InvalidDepositContract) otherwise, leaving the
    /// stored address unchanged.
    pub fn verify_contract_address(&mut self, address: Eth1Address) -> Result<(), BeaconStoreError> {
        self.with_writer_lock(|store| match store.reads().deposit_contract_address()? {
            Some(expected) if expected == address => Ok(()),
            Some(expected) => Err(BeaconStoreError::InvalidDepositContract {
                expected,
                got: address,
            }),
            None => {
                let mut wb = BeaconStoreWriteBatch::new();
                wb.set_deposit_contract(&address)?;
                store.write(wb);
                Ok(())
            }
        })
    }

    /// Compute the tip set that results from inserting `block` (with root `root`) into the tree.
    pub(crate) fn tips_after_insert(
        &self,
        root: &CryptoHash,
        block: &BeaconBlock,
    ) -> Result<Vec<CryptoHash>, BeaconStoreError> {
        let mut tips = self.reads().tips()?;
        tips.retain(|tip| tip != &block.parent_root);
        if let Err(pos) = tips.binary_search(root) {
            tips.insert(pos, *root);
        }
        Ok(tips)
    }

    /// Add to `wb` the writes that make `head` (with root `head_root`) the chain head: the chain head
    /// variable itself, and the rewritten Block at Slot index.
    ///
    /// Walks back from `head` until it meets a block that is already canonical, indexing every block
    /// on the way. Canonical entries of the old chain above that fork point are removed.
    pub(crate) fn set_canonical_chain(
        &self,
        wb: &mut BeaconStoreWriteBatch<K::WriteBatch>,
        head_root: &CryptoHash,
        head: &BeaconBlock,
    ) -> Result<(), BeaconStoreError> {
        let reads = self.reads();

        let old_head_slot = match reads.chain_head_root()? {
            Some(old_head) => Some(
                reads
                    .block(&old_head)?
                    .ok_or(BeaconStoreError::BlockExpectedButNotFound { block: old_head })?
                    .slot,
            ),
            None => None,
        };

        let mut new_chain_slots = HashSet::new();
        let mut fork_slot = None;
        let mut cursor_root = *head_root;
        let mut cursor = head.clone();
        loop {
            if reads.block_at_slot_root(cursor.slot)? == Some(cursor_root) {
                fork_slot = Some(cursor.slot);
                break;
            }
            wb.set_block_at_slot(cursor.slot, &cursor_root)?;
            new_chain_slots.insert(cursor.slot);
            if cursor.is_genesis() {
                break;
            }
            cursor_root = cursor.parent_root;
            cursor = reads
                .block(&cursor_root)?
                .ok_or(BeaconStoreError::BlockExpectedButNotFound { block: cursor_root })?;
        }

        if let Some(old_head_slot) = old_head_slot {
            let first_stale = fork_slot.map_or(Slot::new(0), |slot| slot.next());
            let mut slot = first_stale;
            while slot <= old_head_slot {
                if !new_chain_slots.contains(&slot) {
                    wb.delete_block_at_slot(slot);
                }
                slot = slot.next();
            }
        }

        wb.set_chain_head(head_root)?;
        Ok(())
    }
}

/// State getters.
///
/// These read through the key-value store without holding a snapshot. For a consistent view across
/// several reads, use [`snapshot`](BeaconStore::snapshot).
impl<K: KVStore> BeaconStore<K> {
    pub fn block(&self, block: &CryptoHash) -> Result<Option<BeaconBlock>, BeaconStoreError> {
        self.reads().block(block)
    }

    pub fn contains_block(&self, block: &CryptoHash) -> Result<bool, BeaconStoreError> {
        self.reads().contains_block(block)
    }

    pub fn state(&self, block: &CryptoHash) -> Result<Option<BeaconState>, BeaconStoreError> {
        self.reads().state(block)
    }

    pub fn block_by_slot(&self, slot: Slot) -> Result<Option<BeaconBlock>, BeaconStoreError> {
        self.reads().block_by_slot(slot)
    }

    pub fn blocks_by_slot_range(
        &self,
        start: Slot,
        end: Slot,
    ) -> Result<Vec<BeaconBlock>, BeaconStoreError> {
        self.reads().blocks_by_slot_range(start, end)
    }

    pub fn chain_head(&self) -> Result<(BeaconBlock, BeaconState), BeaconStoreError> {
        self.reads().chain_head()
    }

    pub fn chain_head_root(&self) -> Result<Option<CryptoHash>, BeaconStoreError> {
        self.reads().chain_head_root()
    }

    pub fn head_state(&self) -> Result<BeaconState, BeaconStoreError> {
        self.reads().head_state()
    }

    pub fn tips(&self) -> Result<Vec<CryptoHash>, BeaconStoreError> {
        self.reads().tips()
    }

    pub fn is_initialized(&self) -> Result<bool, BeaconStoreError> {
        self.reads().is_initialized()
    }

    pub fn genesis_time(&self) -> Result<Option<Timestamp>, BeaconStoreError> {
        self.reads().genesis_time()
    }

    pub fn all_deposits(&self, range: DepositRange) -> Result<Vec<Deposit>, BeaconStoreError> {
        self.reads().all_deposits(range)
    }

    pub fn deposit_count(&self) -> Result<u64, BeaconStoreError> {
        self.reads().deposit_count()
    }

    pub fn deposit_contract_address(&self) -> Result<Option<Eth1Address>, BeaconStoreError> {
        self.reads().deposit_contract_address()
    }
}

#[derive(Debug)]
pub enum BeaconStoreError {
    /// Error when trying to get a value from the store's underlying [key value store][KVStore].
    KVGetError(KVGetError),

    /// Error when trying to set a value into the store's underlying key value store.
    KVSetError(KVSetError),

    /// Unable to find a block with the specific root, even though another variable in the store
    /// implies that it should exist.
    BlockExpectedButNotFound { block: CryptoHash },

    /// Unable to find the post-state of a block that the store holds.
    StateExpectedButNotFound { block: CryptoHash },

    /// The store has no chain head yet.
    NotInitialized,

    /// [`initialize_state`](BeaconStore::initialize_state) was called on a store that already has a
    /// chain head.
    AlreadyInitialized,

    /// A chain head update was given a state that the block does not commit to.
    HeadStateMismatch { block: CryptoHash },

    /// A deposit does not continue the deposit log.
    DepositOutOfOrder { expected: u64, got: DepositIndex },

    /// The store is bound to a different deposit contract than the one configured.
    InvalidDepositContract {
        expected: Eth1Address,
        got: Eth1Address,
    },
}

impl Display for BeaconStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BeaconStoreError::KVGetError(err) => write!(f, "failed to read from the store: {:?}", err),
            BeaconStoreError::KVSetError(err) => write!(f, "failed to write to the store: {:?}", err),
            BeaconStoreError::BlockExpectedButNotFound { block } => {
                write!(f, "block {} expected but not found", block)
            }
            BeaconStoreError::StateExpectedButNotFound { block } => {
                write!(f, "state of block {} expected but not found", block)
            }
            BeaconStoreError::NotInitialized => write!(f, "beacon store is not initialized"),
            BeaconStoreError::AlreadyInitialized => write!(f, "beacon store is already initialized"),
            BeaconStoreError::HeadStateMismatch { block } => {
                write!(f, "head state does not match the state root of block {}", block)
            }
            BeaconStoreError::DepositOutOfOrder { expected, got } => write!(
                f,
                "deposit {} does not continue the deposit log at {}",
                got.int(),
                expected
            ),
            BeaconStoreError::InvalidDepositContract { expected, .. } => write!(
                f,
                "invalid deposit contract address, expected {} - try running with a cleared database",
                expected
            ),
        }
    }
}

impl From<KVGetError> for BeaconStoreError {
    fn from(value: KVGetError) -> Self {
        BeaconStoreError::KVGetError(value)
    }
}

impl From<KVSetError> for BeaconStoreError {
    fn from(value: KVSetError) -> Self {
        BeaconStoreError::KVSetError(value)
    }
}

/// A batch of writes into the Beacon Store, applied atomically by [`BeaconStore::write`].
pub struct BeaconStoreWriteBatch<W: WriteBatch>(pub(super) W);

impl<W: WriteBatch> BeaconStoreWriteBatch<W> {
    pub fn new() -> BeaconStoreWriteBatch<W> {
        BeaconStoreWriteBatch(W::new())
    }

    fn set_serialized<T: BorshSerialize>(
        &mut self,
        key: &[u8],
        value: &T,
        variable: Key,
    ) -> Result<(), KVSetError> {
        let bytes = value
            .try_to_vec()
            .map_err(|err| KVSetError::SerializeValueError {
                key: variable,
                source: err,
            })?;
        self.0.set(key, &bytes);
        Ok(())
    }

    /* ↓↓↓ Blocks ↓↓↓ */

    pub fn set_block(&mut self, root: &CryptoHash, block: &BeaconBlock) -> Result<(), KVSetError> {
        self.set_serialized(
            &concat(&variables::BLOCKS, &root.bytes()),
            block,
            Key::Block { block: *root },
        )
    }

    /* ↓↓↓ Block at Slot ↓↓↓ */

    pub fn set_block_at_slot(&mut self, slot: Slot, block: &CryptoHash) -> Result<(), KVSetError> {
        self.set_serialized(
            &concat(&variables::BLOCK_AT_SLOT, &slot.to_le_bytes()),
            block,
            Key::BlockAtSlot { slot },
        )
    }

    pub fn delete_block_at_slot(&mut self, slot: Slot) {
        self.0
            .delete(&concat(&variables::BLOCK_AT_SLOT, &slot.to_le_bytes()))
    }

    /* ↓↓↓ States ↓↓↓ */

    pub fn set_state(&mut self, block: &CryptoHash, state: &BeaconState) -> Result<(), KVSetError> {
        self.set_serialized(
            &concat(&variables::STATES, &block.bytes()),
            state,
            Key::State { block: *block },
        )
    }

    /* ↓↓↓ Chain Head ↓↓↓ */

    pub fn set_chain_head(&mut self, block: &CryptoHash) -> Result<(), KVSetError> {
        self.set_serialized(&variables::CHAIN_HEAD, block, Key::ChainHead)
    }

    /* ↓↓↓ Tips ↓↓↓ */

    pub fn set_tips(&mut self, tips: &Vec<CryptoHash>) -> Result<(), KVSetError> {
        self.set_serialized(&variables::TIPS, tips, Key::Tips)
    }

    /* ↓↓↓ Deposits ↓↓↓ */

    pub fn set_deposit(&mut self, deposit: &Deposit) -> Result<(), KVSetError> {
        self.set_serialized(
            &concat(&variables::DEPOSITS, &deposit.index.to_le_bytes()),
            deposit,
            Key::Deposit {
                index: deposit.index,
            },
        )
    }

    pub fn set_deposit_count(&mut self, count: u64) -> Result<(), KVSetError> {
        self.set_serialized(&variables::DEPOSIT_COUNT, &count, Key::DepositCount)
    }

    /* ↓↓↓ Deposit Contract ↓↓↓ */

    pub fn set_deposit_contract(&mut self, address: &Eth1Address) -> Result<(), KVSetError> {
        self.set_serialized(&variables::DEPOSIT_CONTRACT, address, Key::DepositContract)
    }

    /* ↓↓↓ Genesis Time ↓↓↓ */

    pub fn set_genesis_time(&mut self, genesis_time: Timestamp) -> Result<(), KVSetError> {
        self.set_serialized(&variables::GENESIS_TIME, &genesis_time, Key::GenesisTime)
    }
}

/// Error when writing a key-value pair to the [write batch][BeaconStoreWriteBatch].
/// The error may arise when the value cannot be serialized, and hence cannot be
/// written to the write batch.
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}
