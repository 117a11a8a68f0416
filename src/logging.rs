/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [config](crate::config::Configuration).
//!
//! beacon_rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [InsertBlock](crate::events::InsertBlockEvent) is printed:
//!
//! ```text
//! InsertBlock, 1701329264, fNGCJyk, 17
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block's root.
//! - The fourth value is the slot of the block.

use crate::events::*;
use crate::initial_sync::messages::{SyncRequest, SyncResponse};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const CHAIN_START: &str = "ChainStart";
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const UPDATE_HEAD: &str = "UpdateHead";

pub const RECEIVE_BLOCK: &str = "ReceiveBlock";
pub const REJECT_BLOCK: &str = "RejectBlock";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const SEND_SYNC_RESPONSE: &str = "SendSyncResponse";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ChainStartEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |chain_start_event: &ChainStartEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CHAIN_START,
                secs_since_unix_epoch(chain_start_event.timestamp),
                chain_start_event.genesis_time.int(),
                first_seven_base64_chars(&chain_start_event.genesis_root.bytes()),
                chain_start_event.validator_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_block_event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(insert_block_event.timestamp),
                first_seven_base64_chars(&insert_block_event.block.bytes()),
                insert_block_event.slot
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateHeadEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_head_event: &UpdateHeadEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_HEAD,
                secs_since_unix_epoch(update_head_event.timestamp),
                first_seven_base64_chars(&update_head_event.head.bytes()),
                update_head_event.slot
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_block_event: &ReceiveBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_BLOCK,
                secs_since_unix_epoch(receive_block_event.timestamp),
                first_seven_base64_chars(&receive_block_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_block_event.block.bytes()),
                receive_block_event.slot
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_block_event: &RejectBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                REJECT_BLOCK,
                secs_since_unix_epoch(reject_block_event.timestamp),
                first_seven_base64_chars(&reject_block_event.block.bytes()),
                reject_block_event.slot,
                reject_block_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                first_seven_base64_chars(&start_sync_event.peer.to_bytes()),
                start_sync_event.current_slot,
                start_sync_event.highest_observed_slot
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                end_sync_event.current_slot,
                end_sync_event.blocks_synced
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_sync_request_event: &ReceiveSyncRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(receive_sync_request_event.timestamp),
                first_seven_base64_chars(&receive_sync_request_event.peer.to_bytes()),
                sync_request_info(&receive_sync_request_event.request)
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_sync_response_event: &SendSyncResponseEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SEND_SYNC_RESPONSE,
                secs_since_unix_epoch(send_sync_response_event.timestamp),
                first_seven_base64_chars(&send_sync_response_event.peer.to_bytes()),
                sync_response_info(&send_sync_response_event.response)
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn sync_request_info(request: &SyncRequest) -> String {
    match request {
        SyncRequest::ChainHead => String::from("Chain Head"),
        SyncRequest::BatchedBlocks { start_slot, end_slot } => {
            format!("Batched Blocks, slots: {}..={}", start_slot, end_slot)
        }
    }
}

fn sync_response_info(response: &SyncResponse) -> String {
    match response {
        SyncResponse::ChainHead(chain_head) => format!(
            "Chain Head, slot: {}, block: {}, state: {}",
            chain_head.slot,
            first_seven_base64_chars(&chain_head.block_root.bytes()),
            first_seven_base64_chars(&chain_head.state_root.bytes())
        ),
        SyncResponse::BatchedBlocks(batch) => format!(
            "Batched Blocks, slots: {}..={}, no. of blocks: {}",
            batch.start_slot,
            batch.end_slot,
            batch.batched_blocks.len()
        ),
    }
}
