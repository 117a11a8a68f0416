/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each Beacon Store variable is stored in the user-provided
//! key-value store.
//!
//! # List of State Variables
//!
//! ## Chain
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Blocks|[`CryptoHash`](crate::types::data_types::CryptoHash) -> [`BeaconBlock`](crate::types::block::BeaconBlock)|Every block that has been saved, canonical or not, keyed by block root.|
//! |Block at Slot|[`Slot`](crate::types::data_types::Slot) -> [`CryptoHash`](crate::types::data_types::CryptoHash)|Root of the canonical block at each slot. Skipped slots and slots above the chain head have no entry.|
//! |States|[`CryptoHash`](crate::types::data_types::CryptoHash) -> [`BeaconState`](crate::types::state::BeaconState)|The post-state of each saved block, keyed by the block's root.|
//! |Chain Head|[`CryptoHash`](crate::types::data_types::CryptoHash)|Root of the canonical head block. Its state is found under States.|
//! |Tips|[`Vec<CryptoHash>`]|Roots of the saved blocks that have no saved child, sorted ascending.|
//!
//! ## Genesis
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Deposits|[`DepositIndex`](crate::types::data_types::DepositIndex) -> [`Deposit`](crate::types::deposit::Deposit)|The append-only deposit log.|
//! |Deposit Count|[`u64`]|Number of entries in the deposit log.|
//! |Deposit Contract|[`Eth1Address`](crate::types::data_types::Eth1Address)|Address of the deposit contract that this store is bound to.|
//! |Genesis Time|[`Timestamp`](crate::types::data_types::Timestamp)|Genesis time of the chain in this store. Set once, at initialization.|
//!
//! # Persistence of state variables
//!
//! Each variable is stored as a **Borsh-serialized value**. Single values (e.g., chain head) live at
//! a one-byte constant key. Mappings of the form "`A` -> `B`" live at keys formed by concatenating the
//! variable's one-byte prefix with the bytes of the `A` value: raw bytes for hashes, little-endian
//! bytes for slots and deposit indices. Little-endian keys do not sort by slot, so nothing in this
//! crate relies on key order.

// State variables
pub const BLOCKS: [u8; 1] = [0];
pub const BLOCK_AT_SLOT: [u8; 1] = [1];
pub const STATES: [u8; 1] = [2];
pub const CHAIN_HEAD: [u8; 1] = [3];
pub const TIPS: [u8; 1] = [4];
pub const DEPOSITS: [u8; 1] = [5];
pub const DEPOSIT_COUNT: [u8; 1] = [6];
pub const DEPOSIT_CONTRACT: [u8; 1] = [7];
pub const GENESIS_TIME: [u8; 1] = [8];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
