//! Builds correctly signed chains of beacon blocks, so that tests can feed blocks to a node without
//! running a proposer.

use beacon_rs::{
    beacon_store::{accessors::internal::BeaconStore, pluggables::KVStore},
    config::ChainParameters,
    state_transition::{compute_post_state, genesis::genesis_state},
    types::{
        block::{BeaconBlock, BlockBody},
        crypto_primitives::{hash_borsh, Keypair, SigningKey},
        data_types::{CryptoHash, DepositIndex, Gwei, Slot, Timestamp, ValidatorIndex},
        deposit::{Deposit, DepositData, Eth1Data},
        operations::Attestation,
        state::BeaconState,
    },
};
use rand_core::OsRng;

/// A validator set together with the genesis it produces.
///
/// Validator `i` is the signer of deposit `i`, so its keypair is `keypairs[i]`.
pub(crate) struct ChainBuilder {
    pub(crate) keypairs: Vec<Keypair>,
    pub(crate) deposits: Vec<Deposit>,
    pub(crate) parameters: ChainParameters,
    pub(crate) genesis_time: Timestamp,
    pub(crate) eth1_data: Eth1Data,
    pub(crate) genesis_block: BeaconBlock,
    pub(crate) genesis_state: BeaconState,
}

impl ChainBuilder {
    /// Generate `validator_count` keypairs, each with a 32 ETH deposit.
    pub(crate) fn new(validator_count: usize) -> ChainBuilder {
        let mut csprg = OsRng {};
        let keypairs: Vec<Keypair> = (0..validator_count)
            .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
            .collect();
        let parameters = ChainParameters::default();
        let deposits: Vec<Deposit> = keypairs
            .iter()
            .enumerate()
            .map(|(index, keypair)| deposit(index as u64, keypair, parameters.max_effective_balance))
            .collect();

        let genesis_time = Timestamp::new(1_700_000_000);
        let eth1_data = Eth1Data {
            deposit_root: hash_borsh(&deposits),
            deposit_count: deposits.len() as u64,
            block_hash: CryptoHash::zero(),
        };
        let genesis_state = genesis_state(genesis_time, &deposits, eth1_data, &parameters);
        let genesis_block = BeaconBlock::genesis(genesis_state.root(), genesis_state.slot);

        ChainBuilder {
            keypairs,
            deposits,
            parameters,
            genesis_time,
            eth1_data,
            genesis_block,
            genesis_state,
        }
    }

    /// Initialize `kv_store` with this builder's genesis, and fill its deposit log.
    pub(crate) fn initialize_store<K: KVStore>(&self, kv_store: K) -> BeaconStore<K> {
        let mut store = BeaconStore::new(kv_store);
        for deposit in &self.deposits {
            store.save_deposit(deposit).unwrap();
        }
        let (genesis_block, genesis_state) = store
            .initialize_state(
                self.genesis_time,
                &self.deposits,
                self.eth1_data,
                &self.parameters,
            )
            .unwrap();
        assert_eq!(genesis_block, self.genesis_block);
        assert_eq!(genesis_state.root(), self.genesis_state.root());
        store
    }

    pub(crate) fn keypair(&self, validator_index: ValidatorIndex) -> &Keypair {
        &self.keypairs[validator_index.int() as usize]
    }

    /// Build a block at `slot` on top of `(parent, parent_state)` with an empty body, signed by the
    /// slot's proposer. Returns the block with its post-state.
    pub(crate) fn build_block(
        &self,
        parent: &BeaconBlock,
        parent_state: &BeaconState,
        slot: Slot,
    ) -> (BeaconBlock, BeaconState) {
        let body = BlockBody {
            eth1_data: parent_state.eth1_data,
            ..BlockBody::default()
        };
        self.build_block_with_body(parent, parent_state, slot, body)
    }

    /// Build a block at `slot` carrying `body`, with a correct state root and proposer signature.
    pub(crate) fn build_block_with_body(
        &self,
        parent: &BeaconBlock,
        parent_state: &BeaconState,
        slot: Slot,
        body: BlockBody,
    ) -> (BeaconBlock, BeaconState) {
        let proposer_index = parent_state.proposer_index(slot).unwrap();
        let mut block = BeaconBlock::new(slot, parent.root(), proposer_index, body);
        let post_state = compute_post_state(parent_state, &block, &self.parameters).unwrap();
        block.state_root = post_state.root();
        block.sign(self.keypair(proposer_index));
        (block, post_state)
    }

    /// Build a block at `slot` that carries one attestation to `parent` by each of `attesters`.
    pub(crate) fn build_attested_block(
        &self,
        parent: &BeaconBlock,
        parent_state: &BeaconState,
        slot: Slot,
        attesters: &[ValidatorIndex],
    ) -> (BeaconBlock, BeaconState) {
        let attestations = attesters
            .iter()
            .map(|attester| {
                Attestation::new_signed(
                    self.keypair(*attester),
                    *attester,
                    parent.slot,
                    parent.root(),
                )
            })
            .collect();
        let body = BlockBody {
            eth1_data: parent_state.eth1_data,
            attestations,
            ..BlockBody::default()
        };
        self.build_block_with_body(parent, parent_state, slot, body)
    }

    /// Build a chain on top of genesis with one block at each of `slots`, which must be increasing.
    pub(crate) fn build_chain(
        &self,
        slots: impl IntoIterator<Item = u64>,
    ) -> Vec<(BeaconBlock, BeaconState)> {
        self.extend_chain(&self.genesis_block, &self.genesis_state, slots)
    }

    /// Build a chain on top of `(parent, parent_state)` with one block at each of `slots`.
    pub(crate) fn extend_chain(
        &self,
        parent: &BeaconBlock,
        parent_state: &BeaconState,
        slots: impl IntoIterator<Item = u64>,
    ) -> Vec<(BeaconBlock, BeaconState)> {
        let mut chain: Vec<(BeaconBlock, BeaconState)> = Vec::new();
        for slot in slots {
            let (parent, parent_state) = match chain.last() {
                Some((block, state)) => (block, state),
                None => (parent, parent_state),
            };
            let next = self.build_block(parent, parent_state, Slot::new(slot));
            chain.push(next);
        }
        chain
    }
}

/// A signed deposit of `amount` for `keypair`, at position `index` of the deposit log.
pub(crate) fn deposit(index: u64, keypair: &Keypair, amount: Gwei) -> Deposit {
    Deposit {
        index: DepositIndex::new(index),
        data: DepositData::new_signed(keypair, CryptoHash::zero(), amount),
    }
}
