/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Construction of the genesis state from the deposit log.

use crate::{
    config::ChainParameters,
    types::{
        data_types::{CryptoHash, Timestamp, Weight},
        deposit::{Deposit, Eth1Data},
        state::BeaconState,
    },
};

use super::operations::apply_deposit;

/// Build the state at the genesis slot.
///
/// Every deposit with a valid proof of possession and at least
/// [`min_deposit_amount`](ChainParameters::min_deposit_amount) registers a validator that is active
/// from genesis. Repeated deposits for one key top up its balance. All of `deposits` count as
/// processed, so the first block after genesis must continue the log at `deposits.len()`. The
/// state's Eth1 deposit count is raised to at least that number.
pub fn genesis_state(
    genesis_time: Timestamp,
    deposits: &[Deposit],
    eth1_data: Eth1Data,
    parameters: &ChainParameters,
) -> BeaconState {
    let eth1_data = Eth1Data {
        deposit_count: eth1_data.deposit_count.max(deposits.len() as u64),
        ..eth1_data
    };
    let mut state = BeaconState {
        slot: parameters.genesis_slot,
        genesis_time,
        validators: Vec::new(),
        eth1_data,
        eth1_deposit_index: deposits.len() as u64,
        chain_weight: Weight::new(0),
        latest_attested_root: CryptoHash::zero(),
    };

    for deposit in deposits {
        apply_deposit(&mut state, deposit, parameters.genesis_slot, parameters);
    }

    state
}
