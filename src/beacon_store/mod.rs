/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persistent state of a beacon node.
//!
//! # The Beacon Store
//!
//! The Beacon Store keeps every [block](crate::types::block::BeaconBlock) the node has accepted, the
//! [state](crate::types::state::BeaconState) that results from applying each of them, the canonical
//! chain head, and the deposit log that genesis is built from.
//!
//! Blocks form a tree rooted at the genesis block. The leaves of that tree are called "tips". Exactly
//! one tip is the **chain head**, selected by the [fork choice engine](crate::fork_choice). The blocks
//! on the path from genesis to the chain head are the canonical chain, and are indexed by slot so that
//! [`block_by_slot`](accessors::internal::BeaconStore::block_by_slot) only ever returns canonical
//! blocks. Slots without a canonical block (skipped slots) simply have no entry.
//!
//! # Pluggable persistence
//!
//! The Beacon Store is kept in a user-provided key-value store, which only has to implement the
//! abstract functionality of a key-value store with atomic, batched writes. This functionality is
//! made concrete by the traits defined in the [`pluggables`] module.
//!
//! # Accessing the Beacon Store
//!
//! Implementations of the pluggable traits get wrapped inside the types in [`accessors`]:
//! - [`BeaconStore`](accessors::internal::BeaconStore): the read-write handle used by the services in
//!   this crate. All of its clones share one single-writer lock that serializes chain head updates.
//! - [`BeaconStoreCamera`](accessors::public::BeaconStoreCamera): a read-only handle given to library
//!   users, which hands out consistent [snapshots](accessors::public::BeaconStoreSnapshot).

pub mod accessors;

pub mod pluggables;

pub mod variables;
