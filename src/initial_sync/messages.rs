/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged between an [initial sync client](super::client) and a
//! [sync server](super::server).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::BeaconBlock,
    data_types::{CryptoHash, Slot},
};

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum SyncMessage {
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum SyncRequest {
    /// Ask for the peer's canonical head.
    ChainHead,

    /// Ask for the peer's canonical blocks with slots in `start_slot..=end_slot`.
    BatchedBlocks { start_slot: Slot, end_slot: Slot },
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum SyncResponse {
    ChainHead(ChainHeadResponse),
    BatchedBlocks(BatchedBlockResponse),
}

/// A peer's canonical head. The initial sync client uses it to raise its watermark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainHeadResponse {
    pub slot: Slot,
    pub block_root: CryptoHash,
    pub state_root: CryptoHash,
}

/// The canonical blocks a peer has in the requested slot range, in ascending slot order.
///
/// Skipped slots have no block, so `batched_blocks` may hold fewer blocks than the range has slots,
/// or none at all.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BatchedBlockResponse {
    pub start_slot: Slot,
    pub end_slot: Slot,
    pub batched_blocks: Vec<BeaconBlock>,
}
