//! Tests for the initial sync service, driven directly with sync responses as if they came from a
//! peer.

use std::{sync::mpsc, time::Duration};

use beacon_rs::{
    beacon_store::accessors::internal::BeaconStore,
    chain_service::{BlockProcessor, ChainService},
    config::{ChainParameters, ChainServiceConfiguration},
    events::Event,
    fork_choice::{rules::HeaviestAttestedChain, ForkChoice},
    initial_sync::{
        messages::{BatchedBlockResponse, ChainHeadResponse, SyncResponse},
        InitialSyncService,
    },
    state_transition::InvalidBlockReason,
    types::{
        block::BeaconBlock,
        data_types::{CryptoHash, Slot, ValidatorIndex},
        state::BeaconState,
    },
};
use ed25519_dalek::VerifyingKey;

mod common;

use common::{chain_builder::ChainBuilder, mem_db::MemDB};

type TestChainService = ChainService<MemDB, HeaviestAttestedChain>;

fn syncing_service(builder: &ChainBuilder) -> InitialSyncService<TestChainService> {
    let store = builder.initialize_store(MemDB::new());
    let chain_service = ChainService::new(
        store,
        ForkChoice::new(HeaviestAttestedChain),
        ChainServiceConfiguration {
            chain_start_validator_count: builder.deposits.len() as u64,
            chain_start_poll_interval: Duration::from_millis(20),
            chain_parameters: ChainParameters::default(),
        },
        None,
    )
    .unwrap();
    InitialSyncService::new(chain_service).unwrap()
}

fn peer(builder: &ChainBuilder) -> VerifyingKey {
    builder.keypairs[0].public()
}

fn batch(chain: &[(BeaconBlock, BeaconState)], start_slot: u64, end_slot: u64) -> SyncResponse {
    SyncResponse::BatchedBlocks(BatchedBlockResponse {
        start_slot: Slot::new(start_slot),
        end_slot: Slot::new(end_slot),
        batched_blocks: chain
            .iter()
            .map(|(block, _)| block.clone())
            .filter(|block| block.slot.int() >= start_slot && block.slot.int() <= end_slot)
            .collect(),
    })
}

fn chain_head(block: &BeaconBlock, state: &BeaconState) -> SyncResponse {
    SyncResponse::ChainHead(ChainHeadResponse {
        slot: block.slot,
        block_root: block.root(),
        state_root: state.root(),
    })
}

fn head_of(service: &InitialSyncService<TestChainService>) -> BeaconBlock {
    service.processor().chain_head().unwrap().0
}

/// Tests that a batch spanning the slots above the local head brings `current_slot` to the end of the
/// batch, without touching a higher watermark.
#[test]
fn batch_advances_current_slot_test() {
    let builder = ChainBuilder::new(4);
    let chain = builder.build_chain(1..=40);
    let mut service = syncing_service(&builder);

    // 1. Get to slot 5 first.
    service.on_sync_response(peer(&builder), batch(&chain, 1, 5)).unwrap();
    assert_eq!(service.progress().current_slot(), Slot::new(5));

    // 2. Learn about a head at slot 40.
    let (tip, tip_state) = &chain[39];
    service
        .on_sync_response(peer(&builder), chain_head(tip, tip_state))
        .unwrap();
    assert_eq!(service.progress().highest_observed_slot(), Slot::new(40));
    assert_eq!(service.next_slot(), Slot::new(6));

    // 3. Sync slots 6 to 25.
    service.on_sync_response(peer(&builder), batch(&chain, 6, 25)).unwrap();
    assert_eq!(service.progress().current_slot(), Slot::new(25));
    assert_eq!(service.progress().highest_observed_slot(), Slot::new(40));
    assert_eq!(service.progress().highest_observed_root(), Some(tip_state.root()));
    assert!(service.progress().is_behind());
    assert_eq!(service.blocks_synced(), 25);
    assert_eq!(head_of(&service), chain[24].0);
    assert!(!service.check_synced().unwrap());

    // 4. A lower chain head never lowers the watermark.
    let (old, old_state) = &chain[9];
    assert!(!service.on_chain_head(&ChainHeadResponse {
        slot: old.slot,
        block_root: old.root(),
        state_root: old_state.root(),
    }));
    assert_eq!(service.progress().highest_observed_slot(), Slot::new(40));

    // 5. Replaying blocks that are already applied changes nothing.
    service.on_sync_response(peer(&builder), batch(&chain, 1, 25)).unwrap();
    assert_eq!(service.blocks_synced(), 25);
}

/// Tests that skipped slots within a batch are stepped over, and do not count as failures.
#[test]
fn skipped_slots_test() {
    let builder = ChainBuilder::new(4);
    let skipped = [4, 6, 13, 17];
    let chain = builder.build_chain((1..=20).filter(|slot| !skipped.contains(slot)));
    let (tip, tip_state) = chain.last().unwrap();
    let mut service = syncing_service(&builder);

    service
        .on_sync_response(peer(&builder), chain_head(tip, tip_state))
        .unwrap();
    service.on_sync_response(peer(&builder), batch(&chain, 1, 20)).unwrap();

    assert_eq!(service.progress().current_slot(), Slot::new(20));
    assert_eq!(service.blocks_synced(), 16);
    assert_eq!(service.progress().stall(), None);
    assert!(service.check_synced().unwrap());
    assert!(service.progress().is_synced());

    let camera = service.processor().camera();
    {
        let snapshot = camera.snapshot();
        for slot in skipped {
            assert_eq!(snapshot.block_by_slot(Slot::new(slot)).unwrap(), None);
        }
    }

    // An empty batch over a range of skipped slots is not an error.
    let empty = SyncResponse::BatchedBlocks(BatchedBlockResponse {
        start_slot: Slot::new(21),
        end_slot: Slot::new(30),
        batched_blocks: Vec::new(),
    });
    service.on_sync_response(peer(&builder), empty).unwrap();
    assert_eq!(service.progress().current_slot(), Slot::new(20));
}

/// Tests that a block that fails to apply stops `current_slot` below it and is recorded as a stall,
/// which clears once a valid block for the slot arrives.
#[test]
fn failing_block_records_stall_test() {
    let builder = ChainBuilder::new(4);
    let chain = builder.build_chain(1..=10);
    let mut service = syncing_service(&builder);

    let mut tampered: Vec<(BeaconBlock, BeaconState)> = chain.clone();
    let forger = ValidatorIndex::new((tampered[5].0.proposer_index.int() + 1) % 4);
    tampered[5].0.sign(builder.keypair(forger));

    // 1. Blocks 1 to 5 apply, block 6 fails, and blocks 7 to 10 cannot apply without it.
    let result = service.on_sync_response(peer(&builder), batch(&tampered, 1, 10));
    let err = result.unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(
        err.invalid_block_reason(),
        Some(InvalidBlockReason::InvalidProposerSignature { .. })
    ));
    assert_eq!(service.progress().current_slot(), Slot::new(5));
    assert_eq!(service.blocks_synced(), 5);
    let stall = service.progress().stall().unwrap();
    assert_eq!(stall.slot, Slot::new(6));
    assert_eq!(stall.failures, 1);

    // 2. The same failure again.
    let result = service.on_sync_response(peer(&builder), batch(&tampered, 6, 10));
    assert!(result.is_err());
    assert_eq!(service.progress().stall().unwrap().failures, 2);
    assert_eq!(service.progress().current_slot(), Slot::new(5));

    // 3. The real chain from another peer.
    let other_peer = builder.keypairs[1].public();
    service.on_sync_response(other_peer, batch(&chain, 6, 10)).unwrap();
    assert_eq!(service.progress().current_slot(), Slot::new(10));
    assert_eq!(service.progress().stall(), None);
}

/// Tests that being at the watermark slot is not enough to be synced: the head state must also have
/// the observed state root.
#[test]
fn check_synced_test() {
    let builder = ChainBuilder::new(4);
    let chain = builder.build_chain(1..=3);
    let mut service = syncing_service(&builder);

    // 1. No watermark yet.
    assert!(!service.check_synced().unwrap());

    // 2. A peer at slot 3 with a different state.
    let (tip, _) = &chain[2];
    assert!(service.on_chain_head(&ChainHeadResponse {
        slot: tip.slot,
        block_root: tip.root(),
        state_root: CryptoHash::new([9; 32]),
    }));
    service.on_sync_response(peer(&builder), batch(&chain, 1, 3)).unwrap();
    assert_eq!(service.progress().current_slot(), Slot::new(3));
    assert!(!service.check_synced().unwrap());

    // 3. The head catches up by other means, e.g., gossip, beyond the watermark.
    let mut store: BeaconStore<MemDB> = service.processor().store().clone();
    let (tip, tip_state) = &chain[2];
    for (block, state) in builder.extend_chain(tip, tip_state, [4]) {
        store.update_chain_head(&block, &state).unwrap();
    }
    assert!(service.check_synced().unwrap());
    assert_eq!(service.progress().current_slot(), Slot::new(4));
}

/// Tests that a batch of blocks that gossip already applied advances `current_slot` without applying
/// them again.
#[test]
fn batch_of_known_blocks_test() {
    let builder = ChainBuilder::new(4);
    let chain = builder.build_chain(1..=3);
    let (events_sender, events) = mpsc::channel();
    let store = builder.initialize_store(MemDB::new());
    let chain_service = ChainService::new(
        store,
        ForkChoice::new(HeaviestAttestedChain),
        ChainServiceConfiguration {
            chain_start_validator_count: builder.deposits.len() as u64,
            chain_start_poll_interval: Duration::from_millis(20),
            chain_parameters: ChainParameters::default(),
        },
        Some(events_sender),
    )
    .unwrap();
    let mut service = InitialSyncService::new(chain_service.clone()).unwrap();

    // 1. Gossip applies blocks 1 to 3 behind the sync service's back.
    let mut gossip = chain_service;
    for (block, _) in &chain {
        gossip.process_block(block).unwrap();
    }
    let tip = chain[2].0.root();
    assert_eq!(service.processor().store().tips().unwrap(), vec![tip]);
    let inserted_by_gossip = events
        .try_iter()
        .filter(|event| matches!(event, Event::InsertBlock(_)))
        .count();
    assert_eq!(inserted_by_gossip, 3);

    // 2. A sync batch for slots 1 to 2 arrives.
    service.on_sync_response(peer(&builder), batch(&chain, 1, 2)).unwrap();
    assert_eq!(service.progress().current_slot(), Slot::new(2));
    assert_eq!(service.blocks_synced(), 0);
    assert_eq!(service.processor().store().tips().unwrap(), vec![tip]);
    assert_eq!(head_of(&service).root(), tip);
    assert_eq!(
        events
            .try_iter()
            .filter(|event| matches!(event, Event::InsertBlock(_)))
            .count(),
        0
    );
}
