//! Types that wrap a [`KVStore`](super::pluggables::KVStore) to read and write the Beacon Store's
//! variables at the right keys.

pub mod internal;

pub mod public;
