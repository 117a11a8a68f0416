/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable weighting strategies for the [fork choice engine](super::ForkChoice).

use crate::types::{block::BeaconBlock, data_types::Weight, state::BeaconState};

/// Scores a chain tip. The fork choice engine makes the highest-scoring tip the chain head.
///
/// `weight` must be a pure function of its arguments: nodes that hold the same blocks must pick the
/// same head.
pub trait ForkChoiceRule: Send + Sync + 'static {
    fn weight(&self, block: &BeaconBlock, state: &BeaconState) -> Weight;
}

/// Prefer the chain whose blocks include the most attesting stake.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaviestAttestedChain;

impl ForkChoiceRule for HeaviestAttestedChain {
    fn weight(&self, _: &BeaconBlock, state: &BeaconState) -> Weight {
        state.chain_weight
    }
}

/// Prefer the chain whose tip has the highest slot.
#[derive(Clone, Copy, Debug, Default)]
pub struct LongestChain;

impl ForkChoiceRule for LongestChain {
    fn weight(&self, block: &BeaconBlock, _: &BeaconState) -> Weight {
        Weight::new(block.slot.int() as u128)
    }
}
