/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of beacon node events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by
//! the node's service threads and consumed by the [event bus](crate::event_bus), which invokes the
//! handlers registered through [`NodeSpec`](crate::beacon_node::NodeSpec).

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;

use crate::initial_sync::messages::{SyncRequest, SyncResponse};
use crate::state_transition::InvalidBlockReason;
use crate::types::data_types::{CryptoHash, Slot, Timestamp};

pub enum Event {
    // Events that change persistent state.
    ChainStart(ChainStartEvent),
    InsertBlock(InsertBlockEvent),
    UpdateHead(UpdateHeadEvent),
    // Events that involve gossip.
    ReceiveBlock(ReceiveBlockEvent),
    RejectBlock(RejectBlockEvent),
    // Sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus may already be gone while the node shuts down.
            let _ = event_publisher.send(self);
        }
    }
}

/// The genesis state was built and the chain start latch fired.
pub struct ChainStartEvent {
    pub timestamp: SystemTime,
    pub genesis_time: Timestamp,
    pub genesis_root: CryptoHash,
    pub validator_count: usize,
}

/// A block and its post-state were saved, whether or not the block became the head.
pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub slot: Slot,
}

pub struct UpdateHeadEvent {
    pub timestamp: SystemTime,
    pub head: CryptoHash,
    pub slot: Slot,
}

pub struct ReceiveBlockEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub block: CryptoHash,
    pub slot: Slot,
}

/// A block failed validation and was dropped.
pub struct RejectBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub slot: Slot,
    pub reason: InvalidBlockReason,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub current_slot: Slot,
    pub highest_observed_slot: Slot,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub current_slot: Slot,
    pub blocks_synced: u64,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub request: SyncRequest,
}

pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub response: SyncResponse,
}
