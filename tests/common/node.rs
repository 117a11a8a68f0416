use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use beacon_rs::{
    beacon_node::{BeaconNode, NodeSpec},
    config::Configuration,
    events::{EndSyncEvent, StartSyncEvent},
    fork_choice::rules::{ForkChoiceRule, HeaviestAttestedChain},
    types::data_types::{CryptoHash, Slot},
};

use crate::common::{mem_db::MemDB, network::NetworkStub};

/// A running beacon node over a [`MemDB`] and a [`NetworkStub`], with its sync events recorded.
pub(crate) struct Node {
    start_sync_events: Arc<Mutex<Vec<(Slot, Slot)>>>,
    end_sync_events: Arc<Mutex<Vec<(Slot, u64)>>>,
    beacon_node: BeaconNode<MemDB>,
}

impl Node {
    /// Start a node on `kv_store`. The chain starts once the deposit log holds
    /// `chain_start_validator_count` deposits, or immediately if `kv_store` is already initialized.
    pub(crate) fn new(
        kv_store: MemDB,
        network: NetworkStub,
        chain_start_validator_count: u64,
        sync_batch_size: u64,
    ) -> Node {
        Node::with_rule(
            kv_store,
            network,
            chain_start_validator_count,
            sync_batch_size,
            HeaviestAttestedChain,
        )
    }

    /// Start a node like [`Node::new`] does, but with `fork_choice_rule` choosing its head.
    pub(crate) fn with_rule<F: ForkChoiceRule>(
        kv_store: MemDB,
        network: NetworkStub,
        chain_start_validator_count: u64,
        sync_batch_size: u64,
        fork_choice_rule: F,
    ) -> Node {
        let configuration = Configuration::builder()
            .chain_start_validator_count(chain_start_validator_count)
            .sync_batch_size(sync_batch_size)
            .sync_response_timeout(Duration::from_millis(500))
            .chain_start_poll_interval(Duration::from_millis(20))
            .log_events(false)
            .build();

        let start_sync_events = Arc::new(Mutex::new(Vec::new()));
        let end_sync_events = Arc::new(Mutex::new(Vec::new()));
        let start_sync_events_clone = start_sync_events.clone();
        let end_sync_events_clone = end_sync_events.clone();

        let beacon_node = NodeSpec::builder()
            .kv_store(kv_store)
            .network(network)
            .fork_choice_rule(fork_choice_rule)
            .configuration(configuration)
            .on_start_sync(move |event: &StartSyncEvent| {
                start_sync_events_clone
                    .lock()
                    .unwrap()
                    .push((event.current_slot, event.highest_observed_slot))
            })
            .on_end_sync(move |event: &EndSyncEvent| {
                end_sync_events_clone
                    .lock()
                    .unwrap()
                    .push((event.current_slot, event.blocks_synced))
            })
            .build()
            .start()
            .unwrap();

        Node {
            start_sync_events,
            end_sync_events,
            beacon_node,
        }
    }

    pub(crate) fn beacon_node(&self) -> &BeaconNode<MemDB> {
        &self.beacon_node
    }

    pub(crate) fn head_slot(&self) -> Slot {
        let (head, _) = self
            .beacon_node
            .beacon_store_camera()
            .snapshot()
            .chain_head()
            .unwrap();
        head.slot
    }

    pub(crate) fn head_state_root(&self) -> CryptoHash {
        self.beacon_node
            .beacon_store_camera()
            .snapshot()
            .head_state()
            .unwrap()
            .root()
    }

    /// `(current_slot, highest_observed_slot)` of every start sync event so far.
    pub(crate) fn start_sync_events(&self) -> Vec<(Slot, Slot)> {
        self.start_sync_events.lock().unwrap().clone()
    }

    /// `(current_slot, blocks_synced)` of every end sync event so far.
    pub(crate) fn end_sync_events(&self) -> Vec<(Slot, u64)> {
        self.end_sync_events.lock().unwrap().clone()
    }
}
