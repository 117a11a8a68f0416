/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use ed25519_dalek::VerifyingKey;

use super::messages::Message;

/// The peer transport that a beacon node runs on top of.
///
/// Peers are identified by their [`VerifyingKey`]. Implementations decide who their peers are and
/// how messages are encoded on the wire; every [`Message`] is Borsh-serializable for convenience.
pub trait Network: Clone + Send {
    /// Send a message to all connected peers without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}
