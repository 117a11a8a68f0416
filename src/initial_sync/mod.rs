/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The initial sync protocol, which brings a lagging node from its chain head to the network's head.
//!
//! ## Progress
//!
//! [`InitialSyncService`] tracks [`SyncProgress`](progress::SyncProgress): the highest slot it has
//! applied (`current_slot`), and a watermark (`highest_observed_slot` and `highest_observed_root`)
//! learned from peers' [chain head responses](messages::ChainHeadResponse). The watermark is only
//! ever raised.
//!
//! ## Applying blocks
//!
//! Blocks are applied in strictly increasing slot order through a
//! [`BlockProcessor`](crate::chain_service::BlockProcessor). Blocks at or below `current_slot` are
//! ignored. Skipped slots are normal: a batch may contain fewer blocks than the slots it spans, and
//! `current_slot` jumps straight to the slot of the next block that applies. A block that fails to
//! apply does not advance `current_slot`. Instead the failure is recorded as a
//! [stall](progress::StallRecord) on its slot, and the block is requested again later.
//!
//! ## Roles
//!
//! - The [client](client::InitialSyncClient) thread drives this service with responses from peers.
//! - The [server](server::SyncServer) thread answers other nodes' requests from the local store.
//! - [`replay_chain`](crate::replay::replay_chain) drives the same block processing from a trusted
//!   reference store instead of peers.

pub mod messages;

pub mod progress;

pub mod safe_handling;

pub(crate) mod client;

pub(crate) mod server;

use ed25519_dalek::VerifyingKey;

use crate::{
    chain_service::{BlockProcessor, ChainServiceError},
    types::{block::BeaconBlock, data_types::Slot},
};

use messages::{ChainHeadResponse, SyncResponse};
use progress::SyncProgress;

pub struct InitialSyncService<P: BlockProcessor> {
    processor: P,
    progress: SyncProgress,
    blocks_synced: u64,
}

impl<P: BlockProcessor> InitialSyncService<P> {
    /// Create an initial sync service that starts from `processor`'s current chain head.
    pub fn new(processor: P) -> Result<Self, ChainServiceError> {
        let (head, _) = processor.chain_head()?;
        Ok(InitialSyncService {
            processor,
            progress: SyncProgress::new(head.slot),
            blocks_synced: 0,
        })
    }

    pub fn progress(&self) -> &SyncProgress {
        &self.progress
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Number of blocks this service has applied since it was created.
    pub fn blocks_synced(&self) -> u64 {
        self.blocks_synced
    }

    /// Apply `block`, whose parent must already have been processed.
    ///
    /// Blocks at or below `current_slot` are ignored. A block that is already in the store, e.g.,
    /// from gossip, is not applied again but still advances `current_slot`. Errors that concern only
    /// the block (invalid block, missing parent or ancestor) are logged and recorded as a stall on
    /// the block's slot before being returned; they are not fatal. Other errors come from the store.
    pub fn process_block(&mut self, block: &BeaconBlock) -> Result<(), ChainServiceError> {
        if block.slot <= self.progress.current_slot() {
            log::debug!(
                "Ignoring block at slot {}: already synced up to slot {}",
                block.slot,
                self.progress.current_slot()
            );
            return Ok(());
        }
        if self.processor.is_processed(block)? {
            log::debug!("Block at slot {} is already in the store", block.slot);
            self.progress.advance(block.slot);
            return Ok(());
        }

        match self.apply(block) {
            Ok(()) => {
                self.progress.advance(block.slot);
                self.blocks_synced += 1;
                Ok(())
            }
            Err(err) => {
                if err.is_recoverable() {
                    log::warn!(
                        "Could not apply block {} at slot {}: {}",
                        block.root(),
                        block.slot,
                        err
                    );
                    self.progress.record_failure(block.slot, err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Apply `blocks` in ascending slot order.
    ///
    /// A store error stops the batch immediately and is returned. Recoverable errors do not: the
    /// remaining blocks are still attempted, and the first recoverable error is returned once the
    /// whole batch has been tried. `current_slot` ends at the slot of the last block that applied.
    pub fn process_batched_blocks(
        &mut self,
        mut blocks: Vec<BeaconBlock>,
    ) -> Result<(), ChainServiceError> {
        blocks.sort_by_key(|block| block.slot);

        let mut first_error = None;
        for block in &blocks {
            match self.process_block(block) {
                Ok(()) => (),
                Err(err) if err.is_recoverable() => {
                    first_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Raise the watermark with a peer's chain head. Returns whether the watermark was raised.
    pub fn on_chain_head(&mut self, chain_head: &ChainHeadResponse) -> bool {
        self.progress.observe(chain_head.slot, chain_head.state_root)
    }

    /// Handle any sync response from `peer`.
    pub fn on_sync_response(
        &mut self,
        _peer: VerifyingKey,
        response: SyncResponse,
    ) -> Result<(), ChainServiceError> {
        match response {
            SyncResponse::ChainHead(chain_head) => {
                if self.on_chain_head(&chain_head) {
                    log::debug!("Watermark raised to slot {}", chain_head.slot);
                }
                Ok(())
            }
            SyncResponse::BatchedBlocks(batch) => self.process_batched_blocks(batch.batched_blocks),
        }
    }

    /// Re-evaluate whether the node has caught up with the watermark.
    ///
    /// Blocks that reached the chain head by other means (e.g., gossip) count as applied. The node is
    /// synced once `current_slot` has reached `highest_observed_slot` and, if the head is exactly at
    /// the watermark, the local head state has the observed state root. Returns the new value.
    pub fn check_synced(&mut self) -> Result<bool, ChainServiceError> {
        let (head, head_state) = self.processor.chain_head()?;
        self.progress.advance(head.slot);

        let caught_up = !self.progress.is_behind()
            && match self.progress.highest_observed_root() {
                Some(observed_root) => {
                    head.slot > self.progress.highest_observed_slot()
                        || head_state.root() == observed_root
                }
                None => false,
            };
        self.progress.set_synced(caught_up);
        Ok(caught_up)
    }

    /// The first slot that has not been applied yet.
    pub fn next_slot(&self) -> Slot {
        self.progress.current_slot().next()
    }

    fn apply(&mut self, block: &BeaconBlock) -> Result<(), ChainServiceError> {
        let parent_state =
            self.processor
                .parent_state(block)?
                .ok_or(ChainServiceError::MissingParent {
                    block: block.root(),
                    parent: block.parent_root,
                })?;
        let state = self
            .processor
            .apply_block_state_transition(block, &parent_state)?;
        self.processor.apply_fork_choice_rule(block, &state)?;
        self.processor.cleanup_block_operations(block, &state)
    }
}
