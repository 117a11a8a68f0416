/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A beacon chain core: the state transition, fork choice, and synchronization machinery of a
//! proof-of-stake beacon node.
//!
//! Blocks reach a node either as live gossip, or in batches fetched by the
//! [initial sync](initial_sync) protocol when the node is behind the network. Either way, every block
//! goes through the [chain service](chain_service), which runs the
//! [state transition function](state_transition) on it and hands the result to the
//! [fork choice engine](fork_choice), which persists it into the [Beacon Store](beacon_store) and
//! decides the canonical chain head.
//!
//! Library users plug in their own [key-value store](beacon_store::pluggables::KVStore),
//! [peer-to-peer network](networking::network::Network), and
//! [fork choice rule](fork_choice::rules::ForkChoiceRule), and start a node using
//! [`NodeSpec`](beacon_node::NodeSpec).

pub mod beacon_node;

pub mod beacon_store;

pub mod chain_service;

pub mod config;

pub(crate) mod event_bus;

pub mod events;

pub mod fork_choice;

pub mod initial_sync;

pub mod logging;

pub mod networking;

pub mod replay;

pub mod state_transition;

pub mod types;
