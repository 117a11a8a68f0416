/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::types::data_types::{CryptoHash, Slot};

/// Process-local progress of the initial sync service. Not persisted: a restarted node derives a
/// fresh `SyncProgress` from its chain head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncProgress {
    current_slot: Slot,
    highest_observed_slot: Slot,
    highest_observed_root: Option<CryptoHash>,
    is_synced: bool,
    stall: Option<StallRecord>,
}

/// Repeated failures to apply a block at one slot.
///
/// A stall is different from a skipped slot: a skipped slot has no block at all and is never
/// recorded here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StallRecord {
    pub slot: Slot,
    pub failures: u32,
    pub last_error: String,
}

impl SyncProgress {
    /// Start tracking progress from `current_slot`, the slot of the local chain head.
    pub fn new(current_slot: Slot) -> Self {
        SyncProgress {
            current_slot,
            highest_observed_slot: current_slot,
            highest_observed_root: None,
            is_synced: false,
            stall: None,
        }
    }

    /// Highest slot successfully applied locally.
    pub fn current_slot(&self) -> Slot {
        self.current_slot
    }

    /// Highest head slot that a peer has reported.
    pub fn highest_observed_slot(&self) -> Slot {
        self.highest_observed_slot
    }

    /// State root of the head that a peer reported at [`highest_observed_slot`](Self::highest_observed_slot).
    pub fn highest_observed_root(&self) -> Option<CryptoHash> {
        self.highest_observed_root
    }

    pub fn is_synced(&self) -> bool {
        self.is_synced
    }

    pub fn stall(&self) -> Option<&StallRecord> {
        self.stall.as_ref()
    }

    pub fn is_behind(&self) -> bool {
        self.current_slot < self.highest_observed_slot
    }

    /// Raise the watermark to `(slot, state_root)` if `slot` is higher than the current watermark, or
    /// equal to it while no root is known yet. The watermark is never lowered. Returns whether it was
    /// raised.
    pub fn observe(&mut self, slot: Slot, state_root: CryptoHash) -> bool {
        let raised = slot > self.highest_observed_slot
            || (slot == self.highest_observed_slot && self.highest_observed_root.is_none());
        if !raised {
            return false;
        }
        self.highest_observed_slot = slot;
        self.highest_observed_root = Some(state_root);
        true
    }

    pub(crate) fn advance(&mut self, slot: Slot) {
        if slot > self.current_slot {
            self.current_slot = slot;
        }
        if self.stall.as_ref().is_some_and(|stall| stall.slot <= slot) {
            self.stall = None;
        }
    }

    pub(crate) fn record_failure(&mut self, slot: Slot, error: String) {
        match &mut self.stall {
            Some(stall) if stall.slot == slot => {
                stall.failures = stall.failures.saturating_add(1);
                stall.last_error = error;
            }
            // Blocks above a stalled slot cannot apply until it does.
            Some(stall) if stall.slot < slot => (),
            _ => {
                self.stall = Some(StallRecord {
                    slot,
                    failures: 1,
                    last_error: error,
                })
            }
        }
    }

    pub(crate) fn set_synced(&mut self, is_synced: bool) {
        self.is_synced = is_synced;
    }
}
