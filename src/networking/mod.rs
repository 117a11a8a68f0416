/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! The library user provides the peer transport by implementing the [`Network`](network::Network)
//! trait. Everything received from the network is untrusted: messages are routed by type to the
//! service that handles them, and each service validates what it receives.

pub mod network;

pub mod messages;

pub mod receiving;

pub(crate) mod sending;
