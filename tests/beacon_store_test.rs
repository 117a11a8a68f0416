use beacon_rs::{
    beacon_store::accessors::{
        internal::{BeaconStore, BeaconStoreError},
        public::DepositRange,
    },
    types::data_types::{DepositIndex, Eth1Address, Slot},
};

mod common;

use common::{chain_builder::ChainBuilder, mem_db::MemDB};

/// Tests that the first contract address binds the store, the same address verifies again, and a
/// different address is reported without replacing the stored one.
#[test]
fn verify_contract_address_test() {
    let mut store = BeaconStore::new(MemDB::new());
    let address = Eth1Address::new([7; 20]);
    let other = Eth1Address::new([8; 20]);

    assert_eq!(store.deposit_contract_address().unwrap(), None);
    store.verify_contract_address(address).unwrap();
    store.verify_contract_address(address).unwrap();
    assert_eq!(store.deposit_contract_address().unwrap(), Some(address));

    let result = store.verify_contract_address(other);
    assert!(matches!(
        result,
        Err(BeaconStoreError::InvalidDepositContract { expected, got })
            if expected == address && got == other
    ));
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("try running with a cleared database"));
    assert_eq!(store.deposit_contract_address().unwrap(), Some(address));
}

/// Tests that the deposit log only accepts the next index, and that re-saving a logged deposit is a
/// no-op.
#[test]
fn deposit_log_test() {
    let builder = ChainBuilder::new(3);
    let mut store = BeaconStore::new(MemDB::new());

    store.save_deposit(&builder.deposits[0]).unwrap();
    let result = store.save_deposit(&builder.deposits[2]);
    assert!(matches!(
        result,
        Err(BeaconStoreError::DepositOutOfOrder { expected: 1, got }) if got == DepositIndex::new(2)
    ));

    store.save_deposit(&builder.deposits[1]).unwrap();
    store.save_deposit(&builder.deposits[0]).unwrap();
    store.save_deposit(&builder.deposits[2]).unwrap();
    assert_eq!(store.deposit_count().unwrap(), 3);

    assert_eq!(store.all_deposits(DepositRange::all()).unwrap(), builder.deposits);
    assert_eq!(
        store.all_deposits(DepositRange::first(2)).unwrap(),
        builder.deposits[..2].to_vec()
    );
    assert_eq!(
        store
            .all_deposits(DepositRange {
                start: DepositIndex::new(1),
                max_count: None,
            })
            .unwrap(),
        builder.deposits[1..].to_vec()
    );
}

/// Tests that a store is initialized exactly once.
#[test]
fn initialize_state_test() {
    let builder = ChainBuilder::new(4);
    let mut store = BeaconStore::new(MemDB::new());
    assert!(!store.is_initialized().unwrap());
    assert!(matches!(
        store.chain_head(),
        Err(BeaconStoreError::NotInitialized)
    ));

    let (genesis_block, genesis_state) = store
        .initialize_state(
            builder.genesis_time,
            &builder.deposits,
            builder.eth1_data,
            &builder.parameters,
        )
        .unwrap();
    assert!(store.is_initialized().unwrap());
    assert_eq!(genesis_block.state_root, genesis_state.root());
    assert_eq!(store.genesis_time().unwrap(), Some(builder.genesis_time));
    assert_eq!(store.tips().unwrap(), vec![genesis_block.root()]);
    assert_eq!(store.chain_head().unwrap(), (genesis_block.clone(), genesis_state));

    let result = store.initialize_state(
        builder.genesis_time,
        &builder.deposits[..1],
        builder.eth1_data,
        &builder.parameters,
    );
    assert!(matches!(result, Err(BeaconStoreError::AlreadyInitialized)));
    assert_eq!(store.chain_head_root().unwrap(), Some(genesis_block.root()));
}

/// Tests that a chain head update with a state the block does not commit to is rejected, and leaves
/// the head unchanged.
#[test]
fn update_chain_head_test() {
    let builder = ChainBuilder::new(4);
    let mut store = builder.initialize_store(MemDB::new());
    let chain = builder.build_chain([1, 2]);

    let (block_1, state_1) = &chain[0];
    let (block_2, state_2) = &chain[1];
    let result = store.update_chain_head(block_1, state_2);
    assert!(matches!(
        result,
        Err(BeaconStoreError::HeadStateMismatch { block }) if block == block_1.root()
    ));
    assert_eq!(store.chain_head_root().unwrap(), Some(builder.genesis_block.root()));
    assert!(!store.contains_block(&block_1.root()).unwrap());

    store.update_chain_head(block_1, state_1).unwrap();
    store.update_chain_head(block_2, state_2).unwrap();
    let (head, head_state) = store.chain_head().unwrap();
    assert_eq!(&head, block_2);
    assert_eq!(&head_state, state_2);
    assert_eq!(store.tips().unwrap(), vec![block_2.root()]);
}

/// Tests that the canonical slot index has no entry for skipped slots, and that range queries skip
/// over them.
#[test]
fn block_by_slot_test() {
    let builder = ChainBuilder::new(4);
    let mut store = builder.initialize_store(MemDB::new());
    for (block, state) in builder.build_chain([1, 3, 4, 8]) {
        store.update_chain_head(&block, &state).unwrap();
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.block_by_slot(Slot::new(2)).unwrap(), None);
    assert_eq!(snapshot.block_by_slot(Slot::new(9)).unwrap(), None);
    assert_eq!(
        snapshot.block_by_slot(Slot::new(3)).unwrap().map(|block| block.slot),
        Some(Slot::new(3))
    );

    let slots: Vec<Slot> = snapshot
        .blocks_by_slot_range(Slot::new(2), Slot::new(20))
        .unwrap()
        .into_iter()
        .map(|block| block.slot)
        .collect();
    assert_eq!(slots, vec![Slot::new(3), Slot::new(4), Slot::new(8)]);
    assert!(snapshot
        .blocks_by_slot_range(Slot::new(5), Slot::new(7))
        .unwrap()
        .is_empty());
}

/// Tests that a camera sees writes made through the store after the camera was created.
#[test]
fn camera_test() {
    let builder = ChainBuilder::new(4);
    let mut store = builder.initialize_store(MemDB::new());
    let camera = store.camera();

    let (block, state) =
        builder.build_block(&builder.genesis_block, &builder.genesis_state, Slot::new(1));
    store.update_chain_head(&block, &state).unwrap();

    let snapshot = camera.snapshot();
    assert_eq!(snapshot.chain_head_root().unwrap(), Some(block.root()));
    assert_eq!(snapshot.head_state().unwrap().root(), block.state_root);
}

/// Tests that blocks and states can be saved without becoming canonical.
#[test]
fn save_block_test() {
    let builder = ChainBuilder::new(4);
    let mut store = builder.initialize_store(MemDB::new());
    let (block, state) =
        builder.build_block(&builder.genesis_block, &builder.genesis_state, Slot::new(1));

    let root = store.save_block(&block).unwrap();
    assert_eq!(root, block.root());
    assert_eq!(store.block(&root).unwrap(), Some(block));
    assert_eq!(store.state(&root).unwrap(), None);

    store.save_state(&root, &state).unwrap();
    assert_eq!(store.state(&root).unwrap(), Some(state));
    assert_eq!(store.chain_head_root().unwrap(), Some(builder.genesis_block.root()));
    assert_eq!(store.block_by_slot(Slot::new(1)).unwrap(), None);
}
