use beacon_rs::{
    state_transition::{
        genesis::genesis_state, transition, verify_block_validity, InvalidBlockReason,
        TransitionError,
    },
    types::{
        block::{BeaconBlock, BlockBody},
        data_types::{Gwei, Slot, ValidatorIndex},
        operations::VoluntaryExit,
    },
};

mod common;

use common::chain_builder::{deposit, ChainBuilder};

/// Tests that applying the same block to the same state twice gives identical post-states, and that
/// the input state is left untouched.
#[test]
fn transition_is_deterministic_and_pure_test() {
    let builder = ChainBuilder::new(4);
    let (block, expected) =
        builder.build_block(&builder.genesis_block, &builder.genesis_state, Slot::new(1));

    let state_before = builder.genesis_state.clone();
    let first = transition(&builder.genesis_state, &block, &builder.parameters).unwrap();
    let second = transition(&builder.genesis_state, &block, &builder.parameters).unwrap();

    assert_eq!(first.root(), second.root());
    assert_eq!(first.root(), expected.root());
    assert_eq!(first.root(), block.state_root);
    assert_eq!(builder.genesis_state, state_before);
}

/// Tests that skipped slots are legal, and leave only the slot number in the post-state.
#[test]
fn transition_across_skipped_slots_test() {
    let builder = ChainBuilder::new(4);
    let (block, _) =
        builder.build_block(&builder.genesis_block, &builder.genesis_state, Slot::new(7));

    let post_state = transition(&builder.genesis_state, &block, &builder.parameters).unwrap();
    assert_eq!(post_state.slot, Slot::new(7));
    assert_eq!(post_state.validators, builder.genesis_state.validators);
}

/// Tests that every kind of invalid block is reported as an invalid block, without touching the
/// input state.
#[test]
fn invalid_blocks_test() {
    let builder = ChainBuilder::new(4);
    let genesis_state = &builder.genesis_state;
    let chain = builder.build_chain([1, 2]);
    let (block_1, state_1) = &chain[0];
    let (block_2, _) = &chain[1];

    // A block whose slot is not above the state's slot.
    let result = transition(state_1, block_1, &builder.parameters);
    assert!(matches!(
        result,
        Err(TransitionError::InvalidBlock(InvalidBlockReason::SlotNotIncreasing { .. }))
    ));

    // A block signed by someone other than its proposer.
    let mut forged = block_2.clone();
    let other = ValidatorIndex::new((forged.proposer_index.int() + 1) % 4);
    forged.sign(builder.keypair(other));
    assert!(matches!(
        transition(state_1, &forged, &builder.parameters),
        Err(TransitionError::InvalidBlock(InvalidBlockReason::InvalidProposerSignature { .. }))
    ));
    assert!(verify_block_validity(&forged, state_1).is_err());

    // A block that names the wrong proposer.
    let mut wrong_proposer = block_2.clone();
    wrong_proposer.proposer_index = other;
    wrong_proposer.sign(builder.keypair(other));
    assert!(matches!(
        transition(state_1, &wrong_proposer, &builder.parameters),
        Err(TransitionError::InvalidBlock(InvalidBlockReason::WrongProposer { .. }))
    ));

    // A block that commits to the wrong state root.
    let mut wrong_root = block_2.clone();
    wrong_root.state_root = genesis_state.root();
    wrong_root.sign(builder.keypair(wrong_root.proposer_index));
    assert!(verify_block_validity(&wrong_root, state_1).is_ok());
    assert!(matches!(
        transition(state_1, &wrong_root, &builder.parameters),
        Err(TransitionError::InvalidBlock(InvalidBlockReason::StateRootMismatch { .. }))
    ));

    // A block whose Eth1 data forgets deposits.
    let mut eth1_data = genesis_state.eth1_data;
    eth1_data.deposit_count -= 1;
    let regressing = BlockBody {
        eth1_data,
        ..BlockBody::default()
    };
    let proposer_index = genesis_state.proposer_index(Slot::new(1)).unwrap();
    let mut regressing_block = BeaconBlock::new(
        Slot::new(1),
        builder.genesis_block.root(),
        proposer_index,
        regressing,
    );
    regressing_block.sign(builder.keypair(proposer_index));
    assert!(matches!(
        transition(genesis_state, &regressing_block, &builder.parameters),
        Err(TransitionError::InvalidBlock(InvalidBlockReason::Eth1DataRegression { .. }))
    ));

    assert_eq!(genesis_state, &builder.genesis_state);
}

/// Tests that deposits, exits, and attestations included in blocks change the validator set and
/// the chain weight.
#[test]
fn block_operations_test() {
    let builder = ChainBuilder::new(4);
    let new_validator = ChainBuilder::new(1);

    // 1. A block with a new validator's deposit.
    let new_deposit = deposit(
        builder.deposits.len() as u64,
        &new_validator.keypairs[0],
        builder.parameters.max_effective_balance,
    );
    let mut eth1_data = builder.genesis_state.eth1_data;
    eth1_data.deposit_count += 1;
    let (block_1, state_1) = builder.build_block_with_body(
        &builder.genesis_block,
        &builder.genesis_state,
        Slot::new(1),
        BlockBody {
            eth1_data,
            deposits: vec![new_deposit.clone()],
            ..BlockBody::default()
        },
    );
    assert_eq!(state_1.validators.len(), 5);
    assert_eq!(state_1.eth1_deposit_index, 5);
    assert_eq!(state_1.validators[4].activation_slot, Slot::new(2));
    assert!(!state_1.validators[4].is_active_at(Slot::new(1)));

    // The same deposit cannot be included twice.
    let duplicate = BlockBody {
        eth1_data,
        deposits: vec![new_deposit],
        ..BlockBody::default()
    };
    let proposer_index = state_1.proposer_index(Slot::new(2)).unwrap();
    let mut duplicate_block = BeaconBlock::new(
        Slot::new(2),
        block_1.root(),
        proposer_index,
        duplicate,
    );
    duplicate_block.sign(builder.keypair(proposer_index));
    assert!(matches!(
        transition(&state_1, &duplicate_block, &builder.parameters),
        Err(TransitionError::InvalidBlock(InvalidBlockReason::DepositOutOfOrder { .. }))
    ));

    // 2. A block with attestations from two validators.
    let attesters = [ValidatorIndex::new(0), ValidatorIndex::new(1)];
    let (block_2, state_2) =
        builder.build_attested_block(&block_1, &state_1, Slot::new(2), &attesters);
    assert_eq!(
        state_2.chain_weight.int(),
        2 * builder.parameters.max_effective_balance.int() as u128
    );
    assert_eq!(state_2.latest_attested_root, block_1.root());

    // 3. A block with a voluntary exit.
    let exiting = ValidatorIndex::new(3);
    let exit = VoluntaryExit::new_signed(builder.keypair(exiting), exiting, Slot::new(3));
    let (_, state_3) = builder.build_block_with_body(
        &block_2,
        &state_2,
        Slot::new(3),
        BlockBody {
            eth1_data: state_2.eth1_data,
            voluntary_exits: vec![exit],
            ..BlockBody::default()
        },
    );
    assert_eq!(state_3.validators[3].exit_slot, Some(Slot::new(4)));
    assert!(!state_3.validators[3].is_active_at(Slot::new(4)));
}

/// Tests that top-ups are capped at the maximum effective balance, and that deposits below the
/// minimum do not register a validator at genesis.
#[test]
fn genesis_deposits_test() {
    let builder = ChainBuilder::new(2);
    let parameters = builder.parameters;

    let small = ChainBuilder::new(1);
    let deposits = vec![
        builder.deposits[0].clone(),
        deposit(1, &builder.keypairs[0], parameters.max_effective_balance),
        deposit(2, &small.keypairs[0], Gwei::new(parameters.min_deposit_amount.int() - 1)),
    ];
    let state = genesis_state(
        builder.genesis_time,
        &deposits,
        builder.eth1_data,
        &parameters,
    );

    assert_eq!(state.validators.len(), 1);
    assert_eq!(
        state.validators[0].effective_balance,
        parameters.max_effective_balance
    );
    assert_eq!(state.eth1_deposit_index, 3);
}
