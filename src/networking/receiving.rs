//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Instant,
};

use ed25519_dalek::VerifyingKey;

use crate::initial_sync::messages::{SyncMessage, SyncRequest, SyncResponse};

use super::{
    messages::{GossipMessage, Message},
    network::Network,
};

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into receiver
/// handles.
///
/// The kinds of messages that the poller distributes are:
/// 1. Sync requests (processed by the [`SyncServer`][crate::initial_sync::server::SyncServer]),
/// 2. Sync responses (processed by the [`InitialSyncClient`][crate::initial_sync::client::InitialSyncClient]),
///    and
/// 3. Gossip (processed by the [`ChainService`][crate::chain_service::ChainService]'s thread).
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(VerifyingKey, SyncRequest)>,
    Receiver<(VerifyingKey, SyncResponse)>,
    Receiver<(VerifyingKey, GossipMessage)>,
) {
    let (to_sync_request_receiver, sync_request_receiver) = mpsc::channel();
    let (to_sync_response_receiver, sync_response_receiver) = mpsc::channel();
    let (to_gossip_receiver, gossip_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::SyncMessage(SyncMessage::SyncRequest(request)) => {
                    let _ = to_sync_request_receiver.send((origin, request));
                }
                Message::SyncMessage(SyncMessage::SyncResponse(response)) => {
                    let _ = to_sync_response_receiver.send((origin, response));
                }
                Message::GossipMessage(gossip) => {
                    let _ = to_gossip_receiver.send((origin, gossip));
                }
            }
        } else {
            thread::yield_now()
        }
    });
    (
        poller_thread,
        sync_request_receiver,
        sync_response_receiver,
        gossip_receiver,
    )
}

/// A message received from a peer, as handed to a message handler.
///
/// `data` is `None` if the message carried no payload. Handlers are never invoked on such messages;
/// see [`safely_handle_message`](crate::initial_sync::safe_handling::safely_handle_message).
#[derive(Clone, Debug)]
pub struct PeerMessage<T> {
    pub peer: VerifyingKey,
    pub data: Option<T>,
}

impl<T> PeerMessage<T> {
    pub fn new(peer: VerifyingKey, data: T) -> Self {
        PeerMessage {
            peer,
            data: Some(data),
        }
    }

    pub fn empty(peer: VerifyingKey) -> Self {
        PeerMessage { peer, data: None }
    }
}

/// A receiving end for sync responses. The [`SyncClientStub::recv_response`] method returns the
/// next response from any peer.
pub(crate) struct SyncClientStub {
    responses: Receiver<(VerifyingKey, SyncResponse)>,
}

impl SyncClientStub {
    pub(crate) fn new(responses: Receiver<(VerifyingKey, SyncResponse)>) -> SyncClientStub {
        SyncClientStub { responses }
    }

    /// Receive a [`SyncResponse`] from any peer. Waits for a response until the deadline is reached,
    /// and if no response is received it returns [`SyncResponseReceiveError::Timeout`].
    pub(crate) fn recv_response(
        &self,
        deadline: Instant,
    ) -> Result<PeerMessage<SyncResponse>, SyncResponseReceiveError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(SyncResponseReceiveError::Timeout);
        }
        match self.responses.recv_timeout(deadline - now) {
            Ok((origin, response)) => Ok(PeerMessage::new(origin, response)),
            Err(RecvTimeoutError::Timeout) => Err(SyncResponseReceiveError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SyncResponseReceiveError::Disconnected),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SyncResponseReceiveError {
    Disconnected,
    Timeout,
}

/// A receiving end for sync requests. The [`SyncServerStub::recv_request`] method returns the
/// received request.
pub(crate) struct SyncServerStub {
    requests: Receiver<(VerifyingKey, SyncRequest)>,
}

impl SyncServerStub {
    pub(crate) fn new(requests: Receiver<(VerifyingKey, SyncRequest)>) -> SyncServerStub {
        SyncServerStub { requests }
    }

    /// Receive a [`SyncRequest`] if available, else return [`SyncRequestReceiveError::NotAvailable`].
    pub(crate) fn recv_request(
        &self,
    ) -> Result<(VerifyingKey, SyncRequest), SyncRequestReceiveError> {
        match self.requests.try_recv() {
            Ok((origin, request)) => Ok((origin, request)),
            // The sync server thread shuts down before the poller thread (the sender side of this
            // channel), so this is never disconnected in practice.
            Err(TryRecvError::Disconnected) => Err(SyncRequestReceiveError::Disconnected),
            Err(TryRecvError::Empty) => Err(SyncRequestReceiveError::NotAvailable),
        }
    }
}

#[derive(Debug)]
pub enum SyncRequestReceiveError {
    Disconnected,
    NotAvailable,
}
