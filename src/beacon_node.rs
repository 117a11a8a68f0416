/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a beacon node.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [`NodeSpec`],
//! - The function to [start](NodeSpec::start) a [`BeaconNode`] given its specification,
//! - The function to [initialize](BeaconNode::initialize) a node's [Beacon Store](crate::beacon_store)
//!   with a genesis state ahead of time,
//! - [The type](BeaconNode) which keeps the node alive.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .kv_store(kv_store)
//!     .network(network)
//!     .fork_choice_rule(HeaviestAttestedChain)
//!     .configuration(configuration)
//!     .on_end_sync(end_sync_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.kv_store(...)`
//! - `.network(...)`
//! - `.fork_choice_rule(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_chain_start(...)`
//! - `.on_insert_block(...)`
//! - `.on_update_head(...)`
//! - `.on_receive_block(...)`
//! - `.on_reject_block(...)`
//! - `.on_start_sync(...)`
//! - `.on_end_sync(...)`
//! - `.on_receive_sync_request(...)`
//! - `.on_send_sync_response(...)`
//!
//! ## Threads
//!
//! A running node owns five threads: the network poller, the chain service, the initial sync client,
//! the sync server, and (if any handler is registered or `log_events` is set) the event bus.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use typed_builder::TypedBuilder;

use crate::beacon_store::accessors::internal::{BeaconStore, BeaconStoreError};
use crate::beacon_store::accessors::public::BeaconStoreCamera;
use crate::beacon_store::pluggables::KVStore;
use crate::chain_service::chain_start::ChainStartLatch;
use crate::chain_service::operation_pool::OperationPool;
use crate::chain_service::{ChainService, ChainServiceError};
use crate::config::{ChainParameters, Configuration};
use crate::event_bus::*;
use crate::events::*;
use crate::fork_choice::{rules::ForkChoiceRule, ForkChoice};
use crate::initial_sync::{client::InitialSyncClient, server::SyncServer};
use crate::networking::{network::Network, receiving::start_polling};
use crate::types::{
    block::BeaconBlock,
    data_types::Timestamp,
    deposit::{Deposit, Eth1Data},
    state::BeaconState,
};

/// Stores all necessary parameters and trait implementations required to run a [`BeaconNode`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.kv_store(...)`
    - `.network(...)`
    - `.fork_choice_rule(...)`
    - `.configuration(...)`

    Optional:
    - `.on_chain_start(...)`
    - `.on_insert_block(...)`
    - `.on_update_head(...)`
    - `.on_receive_block(...)`
    - `.on_reject_block(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
    - `.on_receive_sync_request(...)`
    - `.on_send_sync_response(...)`
"))]
pub struct NodeSpec<K: KVStore, N: Network + 'static, F: ForkChoiceRule> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of the node's Key-Value store. The argument must implement the [KVStore](crate::beacon_store::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the rule that weighs chain tips during fork choice. The argument must implement the [ForkChoiceRule](crate::fork_choice::rules::ForkChoiceRule) trait. Required."))]
    fork_choice_rule: F,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a node. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&ChainStartEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ChainStartEvent>),
    doc = "Register a handler closure to be invoked after the chain starts. Optional."))]
    on_chain_start: Option<HandlerPtr<ChainStartEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is inserted into the node's [Beacon Store](crate::beacon_store). Optional."))]
    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateHeadEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateHeadEvent>),
    doc = "Register a handler closure to be invoked after fork choice selects a new chain head. Optional."))]
    on_update_head: Option<HandlerPtr<UpdateHeadEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBlockEvent>),
    doc = "Register a handler closure to be invoked after the node receives a gossiped block. Optional."))]
    on_receive_block: Option<HandlerPtr<ReceiveBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBlockEvent>),
    doc = "Register a handler closure to be invoked after the node rejects an invalid block. Optional."))]
    on_reject_block: Option<HandlerPtr<RejectBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the node finds itself behind and starts syncing. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the node catches up with the network's head. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>),
    doc = "Register a handler closure to be invoked after the node receives a sync request from a peer. Optional."))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendSyncResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendSyncResponseEvent>),
    doc = "Register a handler closure to be invoked after the node sends a sync response to a peer. Optional."))]
    on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
}

impl<K: KVStore, N: Network + 'static, F: ForkChoiceRule> NodeSpec<K, N, F> {
    /// Starts all threads and channels associated with running a node, and returns the handles to
    /// them in a [`BeaconNode`] struct.
    ///
    /// Fails if the store is bound to a different deposit contract than the configured one, or cannot
    /// be read.
    pub fn start(self) -> Result<BeaconNode<K>, BeaconNodeError> {
        let mut beacon_store = BeaconStore::new(self.kv_store.clone());
        if let Some(address) = self.configuration.deposit_contract_address {
            beacon_store.verify_contract_address(address)?;
        }

        let log_events = self.configuration.log_events;
        let (chain_service_config, initial_sync_config) = self.configuration.into();

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_chain_start,
            self.on_insert_block,
            self.on_update_head,
            self.on_receive_block,
            self.on_reject_block,
            self.on_start_sync,
            self.on_end_sync,
            self.on_receive_sync_request,
            self.on_send_sync_response,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let chain_service = ChainService::new(
            beacon_store,
            ForkChoice::new(self.fork_choice_rule),
            chain_service_config,
            event_publisher.clone(),
        )?;
        let chain_start_latch = chain_service.chain_start_latch().clone();
        let operation_pool = chain_service.operation_pool().clone();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, sync_requests, sync_responses, gossip) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let (sync_server_shutdown, sync_server_shutdown_receiver) = mpsc::channel();
        let sync_server = SyncServer::new(
            BeaconStoreCamera::new(self.kv_store.clone()),
            sync_requests,
            self.network.clone(),
            sync_server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (initial_sync_shutdown, initial_sync_shutdown_receiver) = mpsc::channel();
        let initial_sync = InitialSyncClient::new(
            initial_sync_config,
            chain_service.clone(),
            chain_start_latch.clone(),
            sync_responses,
            self.network,
            initial_sync_shutdown_receiver,
            event_publisher,
        )
        .start();

        let (chain_service_shutdown, chain_service_shutdown_receiver) = mpsc::channel();
        let chain_service = chain_service.start(gossip, chain_service_shutdown_receiver);

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(
                        event_handlers,
                        event_subscriber,
                        event_bus_shutdown_receiver,
                    )),
                    Some(event_bus_shutdown),
                )
            }
            None => (None, None),
        };

        Ok(BeaconNode {
            beacon_store_camera: BeaconStoreCamera::new(self.kv_store),
            chain_start_latch,
            operation_pool,
            poller: Some(poller),
            poller_shutdown,
            chain_service: Some(chain_service),
            chain_service_shutdown,
            initial_sync: Some(initial_sync),
            initial_sync_shutdown,
            sync_server: Some(sync_server),
            sync_server_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a beacon node. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct BeaconNode<K: KVStore> {
    beacon_store_camera: BeaconStoreCamera<K>,
    chain_start_latch: ChainStartLatch,
    operation_pool: OperationPool,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    chain_service: Option<JoinHandle<()>>,
    chain_service_shutdown: Sender<()>,
    initial_sync: Option<JoinHandle<()>>,
    initial_sync_shutdown: Sender<()>,
    sync_server: Option<JoinHandle<()>>,
    sync_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> BeaconNode<K> {
    /// Initializes a node's [Beacon Store](crate::beacon_store) with the genesis state built from
    /// `deposits`, so that the node starts with its chain already started.
    pub fn initialize(
        kv_store: K,
        genesis_time: Timestamp,
        deposits: &[Deposit],
        eth1_data: Eth1Data,
        parameters: &ChainParameters,
    ) -> Result<(BeaconBlock, BeaconState), BeaconStoreError> {
        let mut beacon_store = BeaconStore::new(kv_store);
        beacon_store.initialize_state(genesis_time, deposits, eth1_data, parameters)
    }

    /// Returns a [Beacon Store Camera](crate::beacon_store::accessors::public::BeaconStoreCamera)
    /// which can be used to peek into the node's Beacon Store.
    pub fn beacon_store_camera(&self) -> &BeaconStoreCamera<K> {
        &self.beacon_store_camera
    }

    /// Returns the node's chain start latch, which fires once the node's chain has started.
    pub fn chain_start_latch(&self) -> &ChainStartLatch {
        &self.chain_start_latch
    }

    /// Returns the node's pool of operations waiting to be included in a block.
    pub fn operation_pool(&self) -> &OperationPool {
        &self.operation_pool
    }
}

impl<K: KVStore> Drop for BeaconNode<K> {
    fn drop(&mut self) {
        // The order of thread shutdown matters. The chain service, initial sync, and sync server
        // threads receive messages from the poller, and assume that it outlives them.

        // Release the initial sync thread if the chain never started.
        self.chain_start_latch.close();

        if let (Some(shutdown), Some(event_bus)) =
            (self.event_bus_shutdown.take(), self.event_bus.take())
        {
            let _ = shutdown.send(());
            let _ = event_bus.join();
        }

        let _ = self.initial_sync_shutdown.send(());
        if let Some(initial_sync) = self.initial_sync.take() {
            let _ = initial_sync.join();
        }

        let _ = self.chain_service_shutdown.send(());
        if let Some(chain_service) = self.chain_service.take() {
            let _ = chain_service.join();
        }

        let _ = self.sync_server_shutdown.send(());
        if let Some(sync_server) = self.sync_server.take() {
            let _ = sync_server.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}

#[derive(Debug)]
pub enum BeaconNodeError {
    BeaconStoreError(BeaconStoreError),
    ChainServiceError(ChainServiceError),
}

impl Display for BeaconNodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BeaconNodeError::BeaconStoreError(err) => Display::fmt(err, f),
            BeaconNodeError::ChainServiceError(err) => Display::fmt(err, f),
        }
    }
}

impl From<BeaconStoreError> for BeaconNodeError {
    fn from(value: BeaconStoreError) -> Self {
        BeaconNodeError::BeaconStoreError(value)
    }
}

impl From<ChainServiceError> for BeaconNodeError {
    fn from(value: ChainServiceError) -> Self {
        BeaconNodeError::ChainServiceError(value)
    }
}
