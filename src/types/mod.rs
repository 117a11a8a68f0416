//! Types that are used across multiple components of the beacon chain core.
//!
//! Every type that is persisted into the [beacon store](crate::beacon_store) or sent over the
//! [network](crate::networking) implements Borsh serialization, and every root is the SHA256 hash of
//! that serialization.

pub mod data_types;

pub mod crypto_primitives;

pub mod block;

pub mod state;

pub mod deposit;

pub mod operations;
