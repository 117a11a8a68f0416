/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`SyncServer`], which answers other nodes' sync requests from the local
//! [Beacon Store](crate::beacon_store).
//!
//! The server answers:
//! 1. [`SyncRequest::ChainHead`] with the slot, block root, and state root of the local chain head.
//! 2. [`SyncRequest::BatchedBlocks`] with the canonical blocks in the requested slot range. Skipped
//!    slots contribute no block, so a response may hold fewer blocks than the slots it spans. Ranges
//!    longer than [`MAX_BATCH_SLOTS`] are cut short.
//!
//! Requests that arrive before chain start are dropped, since there is nothing to answer with.
//!
//! The client side of the protocol is explained [here](crate::initial_sync::client).

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::SystemTime,
};

use ed25519_dalek::VerifyingKey;

use crate::{
    beacon_store::{
        accessors::{internal::BeaconStoreError, public::BeaconStoreCamera},
        pluggables::KVStore,
    },
    events::{Event, ReceiveSyncRequestEvent, SendSyncResponseEvent},
    networking::{
        network::Network,
        receiving::{PeerMessage, SyncRequestReceiveError, SyncServerStub},
        sending::SenderHandle,
    },
    types::data_types::Slot,
};

use super::{
    messages::{BatchedBlockResponse, ChainHeadResponse, SyncRequest, SyncResponse},
    safe_handling::safely_handle_message,
};

/// Largest number of slots a single batched block response spans.
pub const MAX_BATCH_SLOTS: u64 = 1024;

pub(crate) struct SyncServer<N: Network + 'static, K: KVStore> {
    beacon_store_camera: BeaconStoreCamera<K>,
    receiver: SyncServerStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, K: KVStore> SyncServer<N, K> {
    pub(crate) fn new(
        beacon_store_camera: BeaconStoreCamera<K>,
        requests: Receiver<(VerifyingKey, SyncRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            beacon_store_camera,
            receiver: SyncServerStub::new(requests),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Sync server thread disconnected from main thread")
                }
            }

            match self.receiver.recv_request() {
                Ok((origin, request)) => {
                    Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                        timestamp: SystemTime::now(),
                        peer: origin,
                        request: request.clone(),
                    })
                    .publish(&self.event_publisher);

                    let server = &self;
                    match safely_handle_message(
                        |_, request| server.respond(&request),
                        PeerMessage::new(origin, request),
                    ) {
                        Ok(Ok(Some(response))) => {
                            self.sender.send(origin, response.clone());

                            Event::SendSyncResponse(SendSyncResponseEvent {
                                timestamp: SystemTime::now(),
                                peer: origin,
                                response,
                            })
                            .publish(&self.event_publisher);
                        }
                        Ok(Ok(None)) => (),
                        Ok(Err(err)) => {
                            log::error!("Sync server could not read the beacon store: {}", err);
                            return;
                        }
                        // Already logged.
                        Err(_) => (),
                    }
                }
                Err(SyncRequestReceiveError::NotAvailable) => thread::yield_now(),
                Err(SyncRequestReceiveError::Disconnected) => thread::yield_now(),
            }
        })
    }

    /// Build the response to `request`, or `None` if the chain has not started yet.
    fn respond(&self, request: &SyncRequest) -> Result<Option<SyncResponse>, BeaconStoreError> {
        let snapshot = self.beacon_store_camera.snapshot();
        if !snapshot.is_initialized()? {
            return Ok(None);
        }

        match *request {
            SyncRequest::ChainHead => {
                let (head, head_state) = snapshot.chain_head()?;
                Ok(Some(SyncResponse::ChainHead(ChainHeadResponse {
                    slot: head.slot,
                    block_root: head.root(),
                    state_root: head_state.root(),
                })))
            }
            SyncRequest::BatchedBlocks {
                start_slot,
                end_slot,
            } => {
                let end_slot = capped_end_slot(start_slot, end_slot);
                let batched_blocks = if start_slot <= end_slot {
                    snapshot.blocks_by_slot_range(start_slot, end_slot)?
                } else {
                    Vec::new()
                };
                Ok(Some(SyncResponse::BatchedBlocks(BatchedBlockResponse {
                    start_slot,
                    end_slot,
                    batched_blocks,
                })))
            }
        }
    }
}

fn capped_end_slot(start_slot: Slot, end_slot: Slot) -> Slot {
    let cap = Slot::new(start_slot.int().saturating_add(MAX_BATCH_SLOTS - 1));
    end_slot.min(cap)
}
