/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of a beacon node, as specified by the operator.
//!
//! [`Configuration`] is split up into smaller, subsystem specific configuration structs before being
//! passed to the services that make up a [`BeaconNode`](crate::beacon_node::BeaconNode).
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .chain_start_validator_count(4)
//!     .sync_batch_size(16)
//!     .sync_response_timeout(Duration::from_secs(3))
//!     .chain_start_poll_interval(Duration::from_millis(200))
//!     .log_events(true)
//!     .build()
//! ```

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::types::data_types::{Eth1Address, Gwei, Slot};

/// Protocol constants that every node of a chain must agree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainParameters {
    /// Slot of the genesis block and genesis state.
    pub genesis_slot: Slot,

    /// Smallest deposit amount that registers a new validator.
    pub min_deposit_amount: Gwei,

    /// Cap on a validator's effective balance. Top-ups beyond it are absorbed.
    pub max_effective_balance: Gwei,
}

impl ChainParameters {
    pub const GWEI_PER_ETH: u64 = 1_000_000_000;
}

impl Default for ChainParameters {
    fn default() -> Self {
        ChainParameters {
            genesis_slot: Slot::new(0),
            min_deposit_amount: Gwei::new(Self::GWEI_PER_ETH),
            max_effective_balance: Gwei::new(32 * Self::GWEI_PER_ETH),
        }
    }
}

/// Stores the user-defined parameters required to start a beacon node, that is:
/// 1. The number of validator deposits that must be in the deposit log before the chain starts.
/// 2. The sync batch size, i.e., how many slots the initial sync service requests from a peer at once.
/// 3. The sync response timeout, after which the initial sync service gives up on a request and asks
///    again, possibly from another peer.
/// 4. The interval at which the chain service checks the deposit log for chain start.
/// 5. The "Log Events" flag, if set to "true" then events are logged.
/// 6. The [chain parameters](ChainParameters).
/// 7. Optionally, the address of the deposit contract the node's store must be bound to.
///
/// ## Sync response timeout
///
/// Durations must be "well below" [`u64::MAX`] seconds, since calling code adds them to
/// [`Instant`](std::time::Instant)s.
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.chain_start_validator_count(...)`
    - `.sync_batch_size(...)`
    - `.sync_response_timeout(...)`
    - `.chain_start_poll_interval(...)`
    - `.log_events(...)`

    Optional:
    - `.chain_parameters(...)`
    - `.deposit_contract_address(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the number of deposits required to start the chain. Required."))]
    pub chain_start_validator_count: u64,
    #[builder(setter(doc = "Set the number of slots requested in one batched block request. Required."))]
    pub sync_batch_size: u64,
    #[builder(setter(doc = "Set the timeout for receiving a sync response from a peer. Required."))]
    pub sync_response_timeout: Duration,
    #[builder(setter(doc = "Set how often the deposit log is checked for chain start. Required."))]
    pub chain_start_poll_interval: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
    #[builder(default, setter(doc = "Set the protocol constants of the chain. Optional."))]
    pub chain_parameters: ChainParameters,
    #[builder(default, setter(strip_option, doc = "Bind the node's store to this deposit contract. Optional."))]
    pub deposit_contract_address: Option<Eth1Address>,
}

impl Into<(ChainServiceConfiguration, InitialSyncConfiguration)> for Configuration {
    fn into(self) -> (ChainServiceConfiguration, InitialSyncConfiguration) {
        let chain_service_config = ChainServiceConfiguration {
            chain_start_validator_count: self.chain_start_validator_count,
            chain_start_poll_interval: self.chain_start_poll_interval,
            chain_parameters: self.chain_parameters,
        };
        let initial_sync_config = InitialSyncConfiguration {
            batch_size: self.sync_batch_size.max(1),
            response_timeout: self.sync_response_timeout,
        };
        (chain_service_config, initial_sync_config)
    }
}

/// Immutable parameters that define the behaviour of the
/// [`ChainService`](crate::chain_service::ChainService).
#[derive(Clone, Copy, Debug)]
pub struct ChainServiceConfiguration {
    pub chain_start_validator_count: u64,
    pub chain_start_poll_interval: Duration,
    pub chain_parameters: ChainParameters,
}

/// Immutable parameters that define the behaviour of the
/// [`InitialSyncService`](crate::initial_sync::InitialSyncService).
#[derive(Clone, Copy, Debug)]
pub struct InitialSyncConfiguration {
    pub batch_size: u64,
    pub response_timeout: Duration,
}
