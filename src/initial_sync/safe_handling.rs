/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The safety net around handlers of peer messages.

use std::{
    any::Any,
    fmt::{self, Display, Formatter},
    panic::{self, AssertUnwindSafe},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use ed25519_dalek::VerifyingKey;

use crate::networking::receiving::PeerMessage;

/// Invoke `handler` on the payload of `message`, recovering from a panic inside it.
///
/// A message without a payload is logged ("message contains no data") and the handler is not
/// invoked. A panic inside the handler is logged ("Panicked when handling p2p message!") with the
/// sending peer and the panic message, and reported as [`HandleMessageError::Panicked`]. Either way
/// the caller's control loop can keep running.
///
/// The handler may leave whatever it captured half-updated when it panics. Handlers are expected to
/// only make changes that are valid on their own, e.g., atomic Beacon Store writes.
pub fn safely_handle_message<T, R>(
    handler: impl FnOnce(VerifyingKey, T) -> R,
    message: PeerMessage<T>,
) -> Result<R, HandleMessageError> {
    let PeerMessage { peer, data } = message;

    let data = match data {
        Some(data) => data,
        None => {
            log::warn!(
                "Dropping message from peer {}: message contains no data",
                short_peer(&peer)
            );
            return Err(HandleMessageError::NoData);
        }
    };

    panic::catch_unwind(AssertUnwindSafe(|| handler(peer, data))).map_err(|payload| {
        let error = payload_into_string(payload);
        log::error!(
            "Panicked when handling p2p message! peer: {}, error: {}",
            short_peer(&peer),
            error
        );
        HandleMessageError::Panicked(error)
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleMessageError {
    /// The message carried no payload.
    NoData,

    /// The handler panicked with the contained message.
    Panicked(String),
}

impl Display for HandleMessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HandleMessageError::NoData => write!(f, "message contains no data"),
            HandleMessageError::Panicked(error) => write!(f, "handler panicked: {}", error),
        }
    }
}

fn payload_into_string(payload: Box<dyn Any + Send + 'static>) -> String {
    let payload = match payload.downcast::<String>() {
        Ok(string) => return *string,
        Err(other) => other,
    };

    if let Ok(string) = payload.downcast::<&str>() {
        return string.to_string();
    }

    String::from("panic with payload of unknown type")
}

fn short_peer(peer: &VerifyingKey) -> String {
    let encoded = STANDARD_NO_PAD.encode(peer.to_bytes());
    encoded.chars().take(7).collect()
}
