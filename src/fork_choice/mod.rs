/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fork choice engine, which decides which known chain tip is the canonical chain head.
//!
//! ## Head selection
//!
//! The Beacon Store tracks the set of tips, i.e., saved blocks without a saved child. Every time a
//! block is applied, the engine scores every tip using a pluggable [`ForkChoiceRule`] and picks the
//! tip with the highest `(weight, slot)`. Ties are broken in favor of the tip with the
//! lexicographically lowest block root, so the choice depends only on the store's contents and never
//! on the order in which blocks arrived.
//!
//! ## Atomicity
//!
//! [`apply`](ForkChoice::apply) computes the new head and writes the candidate block, its state, the
//! new tip set, and (if the head moved) the new chain head and canonical slot index in one write
//! batch, all while holding the store's single-writer lock. Two threads applying fork choice at the
//! same time are therefore serialized, and observers never see a head block without its state.

pub mod rules;

use std::{cmp::Reverse, sync::Arc};

use crate::{
    beacon_store::{
        accessors::internal::{BeaconStore, BeaconStoreError, BeaconStoreWriteBatch},
        pluggables::KVStore,
    },
    types::{
        block::BeaconBlock,
        data_types::{CryptoHash, Slot, Weight},
        state::BeaconState,
    },
};

use rules::ForkChoiceRule;

pub struct ForkChoice<F: ForkChoiceRule> {
    rule: Arc<F>,
}

impl<F: ForkChoiceRule> Clone for ForkChoice<F> {
    fn clone(&self) -> Self {
        ForkChoice {
            rule: self.rule.clone(),
        }
    }
}

impl<F: ForkChoiceRule> ForkChoice<F> {
    pub fn new(rule: F) -> Self {
        ForkChoice {
            rule: Arc::new(rule),
        }
    }

    pub fn rule(&self) -> &F {
        &self.rule
    }

    /// Insert `(block, state)` into the block tree and re-select the chain head.
    ///
    /// `state` must be the post-state of `block`, already computed by the state transition function.
    /// If the candidate is not chosen, it stays retrievable from the store as a non-canonical branch.
    /// A block whose block and state are both already stored is left as it is, and the head is not
    /// re-selected.
    pub fn apply<K: KVStore>(
        &self,
        store: &mut BeaconStore<K>,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<ForkChoiceOutcome, ForkChoiceError> {
        let root = block.root();

        if block.is_genesis()
            || !store.contains_block(&block.parent_root)?
            || store.state(&block.parent_root)?.is_none()
        {
            return Err(ForkChoiceError::MissingAncestor {
                block: root,
                parent: block.parent_root,
            });
        }

        store.with_writer_lock(|store| {
            let old_head = store.chain_head_root()?;
            if store.contains_block(&root)? && store.state(&root)?.is_some() {
                return Ok(ForkChoiceOutcome::AlreadyKnown {
                    head: old_head.ok_or(BeaconStoreError::NotInitialized)?,
                });
            }

            let tips = store.tips_after_insert(&root, block)?;

            let mut best: Option<(HeadScore, CryptoHash, BeaconBlock)> = None;
            for tip in &tips {
                let (tip_block, score) = if tip == &root {
                    (block.clone(), self.score(&root, block, state))
                } else {
                    let tip_block = store
                        .block(tip)?
                        .ok_or(BeaconStoreError::BlockExpectedButNotFound { block: *tip })?;
                    let tip_state = store
                        .state(tip)?
                        .ok_or(BeaconStoreError::StateExpectedButNotFound { block: *tip })?;
                    let score = self.score(tip, &tip_block, &tip_state);
                    (tip_block, score)
                };

                if best.as_ref().map_or(true, |(best_score, _, _)| score > *best_score) {
                    best = Some((score, *tip, tip_block));
                }
            }

            let mut wb = BeaconStoreWriteBatch::new();
            wb.set_block(&root, block).map_err(BeaconStoreError::from)?;
            wb.set_state(&root, state).map_err(BeaconStoreError::from)?;
            wb.set_tips(&tips).map_err(BeaconStoreError::from)?;

            // `tips` always contains the candidate, so `best` is always set.
            let head = match best {
                Some((_, head_root, head_block)) => {
                    if old_head != Some(head_root) {
                        store.set_canonical_chain(&mut wb, &head_root, &head_block)?;
                    }
                    head_root
                }
                None => root,
            };
            store.write(wb);

            if head == root {
                Ok(ForkChoiceOutcome::NewHead)
            } else {
                Ok(ForkChoiceOutcome::NotChosen { head })
            }
        })
    }

    fn score(&self, root: &CryptoHash, block: &BeaconBlock, state: &BeaconState) -> HeadScore {
        (self.rule.weight(block, state), block.slot, Reverse(*root))
    }
}

type HeadScore = (Weight, Slot, Reverse<CryptoHash>);

/// Result of a successful [`ForkChoice::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkChoiceOutcome {
    /// The candidate block is the new chain head.
    NewHead,

    /// The candidate was saved, but `head` is the chain head.
    NotChosen { head: CryptoHash },

    /// The candidate and its state were already stored. Nothing was written.
    AlreadyKnown { head: CryptoHash },
}

#[derive(Debug)]
pub enum ForkChoiceError {
    /// The candidate's parent block or parent state is not in the store.
    MissingAncestor {
        block: CryptoHash,
        parent: CryptoHash,
    },
    BeaconStoreError(BeaconStoreError),
}

impl From<BeaconStoreError> for ForkChoiceError {
    fn from(value: BeaconStoreError) -> Self {
        ForkChoiceError::BeaconStoreError(value)
    }
}
