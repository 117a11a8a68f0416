//! Exhaustive enumerations around every message variant exchanged between beacon nodes.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    initial_sync::messages::{SyncMessage, SyncRequest, SyncResponse},
    types::{
        block::BeaconBlock,
        deposit::Deposit,
        operations::{Attestation, VoluntaryExit},
    },
};

/// All message variants exchanged between beacon nodes.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`SyncMessage`].
    SyncMessage(SyncMessage),

    /// See: [`GossipMessage`].
    GossipMessage(GossipMessage),
}

/// Objects that nodes relay to each other as soon as they learn about them. Processed by the
/// [`ChainService`](crate::chain_service::ChainService)'s thread.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum GossipMessage {
    Block(BeaconBlock),
    Deposit(Deposit),
    VoluntaryExit(VoluntaryExit),
    Attestation(Attestation),
}

impl From<SyncRequest> for Message {
    fn from(value: SyncRequest) -> Self {
        Message::SyncMessage(SyncMessage::SyncRequest(value))
    }
}

impl From<SyncResponse> for Message {
    fn from(value: SyncResponse) -> Self {
        Message::SyncMessage(SyncMessage::SyncResponse(value))
    }
}

impl From<GossipMessage> for Message {
    fn from(value: GossipMessage) -> Self {
        Message::GossipMessage(value)
    }
}

impl From<BeaconBlock> for Message {
    fn from(value: BeaconBlock) -> Self {
        Message::GossipMessage(GossipMessage::Block(value))
    }
}

impl From<Deposit> for Message {
    fn from(value: Deposit) -> Self {
        Message::GossipMessage(GossipMessage::Deposit(value))
    }
}

impl From<VoluntaryExit> for Message {
    fn from(value: VoluntaryExit) -> Self {
        Message::GossipMessage(GossipMessage::VoluntaryExit(value))
    }
}

impl From<Attestation> for Message {
    fn from(value: Attestation) -> Self {
        Message::GossipMessage(GossipMessage::Attestation(value))
    }
}
