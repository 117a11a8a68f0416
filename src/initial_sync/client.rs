/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The initial sync client thread.
//!
//! The client waits for chain start, then loops:
//! 1. Every `response_timeout`, it broadcasts a [`SyncRequest::ChainHead`] to learn about the
//!    network's head. The peer that raises the watermark becomes the sync peer.
//! 2. While the node is behind the watermark, it keeps one [`SyncRequest::BatchedBlocks`] in flight
//!    to the sync peer, covering up to `batch_size` slots after the last requested slot. If the
//!    response does not arrive in time, or fails to apply, it asks again from the first unapplied
//!    slot.
//! 3. Every response goes through [`safely_handle_message`], so a faulty message cannot bring the
//!    thread down.
//!
//! [`StartSync`](crate::events::StartSyncEvent) is published when the node finds itself behind, and
//! [`EndSync`](crate::events::EndSyncEvent) when it catches up.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    chain_service::{
        chain_start::{ChainStartLatch, LatchWaitError},
        BlockProcessor, ChainServiceError,
    },
    config::InitialSyncConfiguration,
    events::{EndSyncEvent, Event, StartSyncEvent},
    networking::{
        network::Network,
        receiving::{SyncClientStub, SyncResponseReceiveError},
        sending::SenderHandle,
    },
    types::data_types::Slot,
};

use super::{
    messages::{SyncRequest, SyncResponse},
    safe_handling::safely_handle_message,
    InitialSyncService,
};

/// How long the client waits on the chain start latch, or for a response, before checking its
/// shutdown signal.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

pub(crate) struct InitialSyncClient<P: BlockProcessor, N: Network + 'static> {
    config: InitialSyncConfiguration,
    processor: P,
    chain_start: ChainStartLatch,
    responses: SyncClientStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<P: BlockProcessor, N: Network + 'static> InitialSyncClient<P, N> {
    pub(crate) fn new(
        config: InitialSyncConfiguration,
        processor: P,
        chain_start: ChainStartLatch,
        responses: Receiver<(VerifyingKey, SyncResponse)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            processor,
            chain_start,
            responses: SyncClientStub::new(responses),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            let InitialSyncClient {
                config,
                processor,
                chain_start,
                responses,
                sender,
                shutdown_signal,
                event_publisher,
            } = self;

            // 1. Wait for chain start.
            loop {
                if shutdown_requested(&shutdown_signal) {
                    return;
                }
                match chain_start.wait_timeout(POLL_TIMEOUT) {
                    Ok(_) => break,
                    Err(LatchWaitError::Timeout) => (),
                    Err(LatchWaitError::Closed) => return,
                }
            }

            let service = match InitialSyncService::new(processor) {
                Ok(service) => service,
                Err(err) => {
                    log::error!("Initial sync could not read the chain head: {}", err);
                    return;
                }
            };

            let mut sync_loop = SyncLoop {
                config,
                service,
                responses,
                sender,
                event_publisher,
                sync_peer: None,
                request_cursor: Slot::new(0),
                batch_deadline: None,
                next_chain_head_request: Instant::now(),
                syncing: false,
                synced: false,
                blocks_synced_at_start: 0,
            };
            sync_loop.request_cursor = sync_loop.service.next_slot();

            // 2. Sync.
            loop {
                if shutdown_requested(&shutdown_signal) {
                    return;
                }
                if let Err(err) = sync_loop.tick() {
                    log::error!("Initial sync stopped: {}", err);
                    return;
                }
            }
        })
    }
}

struct SyncLoop<P: BlockProcessor, N: Network + 'static> {
    config: InitialSyncConfiguration,
    service: InitialSyncService<P>,
    responses: SyncClientStub,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
    sync_peer: Option<VerifyingKey>,
    request_cursor: Slot,
    batch_deadline: Option<Instant>,
    next_chain_head_request: Instant,
    syncing: bool,
    synced: bool,
    blocks_synced_at_start: u64,
}

impl<P: BlockProcessor, N: Network + 'static> SyncLoop<P, N> {
    fn tick(&mut self) -> Result<(), ChainServiceError> {
        let now = Instant::now();

        if now >= self.next_chain_head_request {
            self.sender.broadcast(SyncRequest::ChainHead);
            self.next_chain_head_request = now + self.config.response_timeout;
        }

        self.request_batch_if_needed(now);

        match self.responses.recv_response(now + POLL_TIMEOUT) {
            Ok(msg) => {
                let origin = msg.peer;
                let batch_end = match &msg.data {
                    Some(SyncResponse::BatchedBlocks(batch)) => Some(batch.end_slot),
                    _ => None,
                };
                let watermark_before = self.service.progress().highest_observed_slot();

                let service = &mut self.service;
                match safely_handle_message(
                    |peer, response| service.on_sync_response(peer, response),
                    msg,
                ) {
                    Ok(Ok(())) => {
                        if let Some(end) = batch_end {
                            if end >= self.request_cursor {
                                self.request_cursor = end.next();
                            }
                            self.batch_deadline = None;
                        }
                    }
                    Ok(Err(err)) if err.is_recoverable() => {
                        if batch_end.is_some() {
                            self.retry_from_first_unapplied_slot();
                        }
                    }
                    Ok(Err(err)) => return Err(err),
                    // Already logged.
                    Err(_) => {
                        if batch_end.is_some() {
                            self.retry_from_first_unapplied_slot();
                        }
                    }
                }

                if self.service.progress().highest_observed_slot() > watermark_before
                    || self.sync_peer.is_none() && self.service.progress().is_behind()
                {
                    self.sync_peer = Some(origin);
                }

                self.update_sync_status(origin)?;
            }
            Err(SyncResponseReceiveError::Timeout) => (),
            // The poller outlives this thread, so this only happens during shutdown.
            Err(SyncResponseReceiveError::Disconnected) => thread::yield_now(),
        }

        Ok(())
    }

    fn request_batch_if_needed(&mut self, now: Instant) {
        let peer = match self.sync_peer {
            Some(peer) => peer,
            None => return,
        };
        if !self.service.progress().is_behind() {
            return;
        }
        match self.batch_deadline {
            Some(deadline) if now < deadline => return,
            Some(_) => {
                log::debug!(
                    "Batched block request timed out, retrying from slot {}",
                    self.service.next_slot()
                );
                self.retry_from_first_unapplied_slot();
            }
            None => (),
        }

        let highest = self.service.progress().highest_observed_slot();
        if self.request_cursor < self.service.next_slot() || self.request_cursor > highest {
            self.request_cursor = self.service.next_slot();
        }
        let start_slot = self.request_cursor;
        let end_slot = (start_slot + (self.config.batch_size - 1)).min(highest);

        self.sender.send(
            peer,
            SyncRequest::BatchedBlocks {
                start_slot,
                end_slot,
            },
        );
        self.batch_deadline = Some(now + self.config.response_timeout);
    }

    fn retry_from_first_unapplied_slot(&mut self) {
        self.request_cursor = self.service.next_slot();
        self.batch_deadline = None;
    }

    fn update_sync_status(&mut self, peer: VerifyingKey) -> Result<(), ChainServiceError> {
        let synced = self.service.check_synced()?;

        if !self.syncing && self.service.progress().is_behind() {
            self.syncing = true;
            self.blocks_synced_at_start = self.service.blocks_synced();
            log::info!(
                "Starting initial sync from slot {} to slot {}",
                self.service.progress().current_slot(),
                self.service.progress().highest_observed_slot()
            );
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                peer: self.sync_peer.unwrap_or(peer),
                current_slot: self.service.progress().current_slot(),
                highest_observed_slot: self.service.progress().highest_observed_slot(),
            })
            .publish(&self.event_publisher);
        }

        if synced && !self.synced {
            self.syncing = false;
            let blocks_synced = self.service.blocks_synced() - self.blocks_synced_at_start;
            log::info!(
                "Initial sync done at slot {} after applying {} blocks",
                self.service.progress().current_slot(),
                blocks_synced
            );
            Event::EndSync(EndSyncEvent {
                timestamp: SystemTime::now(),
                current_slot: self.service.progress().current_slot(),
                blocks_synced,
            })
            .publish(&self.event_publisher);
        }
        self.synced = synced;

        if let Some(stall) = self.service.progress().stall() {
            if stall.failures > 1 {
                log::warn!(
                    "Initial sync stalled at slot {} after {} failures: {}",
                    stall.slot,
                    stall.failures,
                    stall.last_error
                );
            }
        }

        Ok(())
    }
}

fn shutdown_requested(shutdown_signal: &Receiver<()>) -> bool {
    match shutdown_signal.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Empty) => false,
        Err(TryRecvError::Disconnected) => {
            panic!("Initial sync thread disconnected from main thread")
        }
    }
}
