use std::cell::Cell;

use beacon_rs::{
    initial_sync::safe_handling::{safely_handle_message, HandleMessageError},
    networking::receiving::PeerMessage,
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use common::logging::{captured_logs, first_seven_base64_chars, setup_logger};

fn random_peer() -> ed25519_dalek::VerifyingKey {
    ed25519_dalek::SigningKey::generate(&mut OsRng).verifying_key()
}

/// Tests that a handler's return value is passed through.
#[test]
fn handler_result_test() {
    let peer = random_peer();
    let result = safely_handle_message(
        |from, data: u64| {
            assert_eq!(from, peer);
            data * 2
        },
        PeerMessage {
            peer,
            data: Some(21),
        },
    );
    assert_eq!(result, Ok(42));
}

/// Tests that a panic inside the handler is caught, logged with the sending peer, and reported.
#[test]
fn panicking_handler_test() {
    setup_logger(LevelFilter::Info);
    let peer = random_peer();

    let result = safely_handle_message(
        |_, data: String| -> () { panic!("cannot handle {}", data) },
        PeerMessage {
            peer,
            data: Some(String::from("poisoned batch")),
        },
    );

    assert_eq!(
        result,
        Err(HandleMessageError::Panicked(String::from(
            "cannot handle poisoned batch"
        )))
    );
    let logs = captured_logs("Panicked when handling p2p message!");
    assert!(logs.iter().any(|line| line.contains("cannot handle poisoned batch")
        && line.contains(&first_seven_base64_chars(&peer.to_bytes()))));

    // The caller keeps working after the panic.
    let result = safely_handle_message(|_, data: u8| data, PeerMessage { peer, data: Some(1) });
    assert_eq!(result, Ok(1));
}

/// Tests that a message without data is logged and dropped without invoking the handler.
#[test]
fn message_without_data_test() {
    setup_logger(LevelFilter::Info);
    let peer = random_peer();
    let invoked = Cell::new(false);

    let result = safely_handle_message(
        |_, _: u64| invoked.set(true),
        PeerMessage { peer, data: None },
    );

    assert_eq!(result, Err(HandleMessageError::NoData));
    assert!(!invoked.get());
    let logs = captured_logs("message contains no data");
    assert!(logs
        .iter()
        .any(|line| line.contains(&first_seven_base64_chars(&peer.to_bytes()))));
}
