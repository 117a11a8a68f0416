/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Staging area for operations received over gossip and not yet included in a canonical block.
//!
//! Gossiped attestations and voluntary exits are checked against the head state before they are
//! pooled, and pruned once they can no longer be included, so that the pool stays bounded by the
//! validator set.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    state_transition::operations::{is_includable_attestation, is_includable_voluntary_exit},
    types::{
        block::BeaconBlock,
        data_types::{DepositIndex, Slot, ValidatorIndex},
        deposit::Deposit,
        operations::{Attestation, VoluntaryExit},
        state::BeaconState,
    },
};

/// A shared, thread-safe pool of pending operations.
///
/// Cloning an `OperationPool` yields another handle to the same pool. Operations are keyed so that
/// re-gossiped copies replace, rather than duplicate, what is already pending:
/// - Deposits by their index in the deposit log.
/// - Voluntary exits by the exiting validator.
/// - Attestations by `(slot, validator)`.
#[derive(Clone, Default)]
pub struct OperationPool {
    inner: Arc<Mutex<PendingOperations>>,
}

#[derive(Default)]
struct PendingOperations {
    deposits: BTreeMap<DepositIndex, Deposit>,
    voluntary_exits: BTreeMap<ValidatorIndex, VoluntaryExit>,
    attestations: BTreeMap<(Slot, ValidatorIndex), Attestation>,
}

impl OperationPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_deposit(&self, deposit: Deposit) {
        self.lock().deposits.insert(deposit.index, deposit);
    }

    /// Pool `exit` if it could be included in the next block on top of `head_state`. Returns
    /// whether it was pooled.
    pub fn add_voluntary_exit(&self, exit: VoluntaryExit, head_state: &BeaconState) -> bool {
        if !is_includable_voluntary_exit(head_state, &exit) {
            return false;
        }
        self.lock().voluntary_exits.insert(exit.validator_index, exit);
        true
    }

    /// Pool `attestation` if it could be included in a block on top of `head_state`. Returns
    /// whether it was pooled.
    pub fn add_attestation(&self, attestation: Attestation, head_state: &BeaconState) -> bool {
        if !is_includable_attestation(head_state, &attestation) {
            return false;
        }
        self.lock()
            .attestations
            .insert((attestation.slot, attestation.validator_index), attestation);
        true
    }

    /// Get the pending deposits, ordered by index.
    pub fn pending_deposits(&self) -> Vec<Deposit> {
        self.lock().deposits.values().cloned().collect()
    }

    pub fn pending_voluntary_exits(&self) -> Vec<VoluntaryExit> {
        self.lock().voluntary_exits.values().cloned().collect()
    }

    /// Get the pending attestations, ordered by slot and then by validator.
    pub fn pending_attestations(&self) -> Vec<Attestation> {
        self.lock().attestations.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let pending = self.lock();
        pending.deposits.len() + pending.voluntary_exits.len() + pending.attestations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every operation that `block` includes, along with deposits that the block's deposits
    /// supersede in the log, attestations to slots before the block's, and exits of validators that
    /// have already exited in `post_state`, the block's post-state. Calling this more than once for
    /// the same block has no further effect.
    pub fn cleanup(&self, block: &BeaconBlock, post_state: &BeaconState) -> usize {
        let mut pending = self.lock();
        let before =
            pending.deposits.len() + pending.voluntary_exits.len() + pending.attestations.len();

        if let Some(last) = block.body.deposits.iter().map(|deposit| deposit.index).max() {
            pending.deposits.retain(|index, _| *index > last);
        }
        for exit in &block.body.voluntary_exits {
            pending.voluntary_exits.remove(&exit.validator_index);
        }
        for attestation in &block.body.attestations {
            pending
                .attestations
                .remove(&(attestation.slot, attestation.validator_index));
        }
        pending
            .attestations
            .retain(|(slot, _), _| *slot >= block.slot);
        pending.voluntary_exits.retain(|validator_index, _| {
            post_state
                .validator(*validator_index)
                .is_some_and(|validator| validator.exit_slot.is_none())
        });

        let after =
            pending.deposits.len() + pending.voluntary_exits.len() + pending.attestations.len();
        before - after
    }

    fn lock(&self) -> MutexGuard<'_, PendingOperations> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
