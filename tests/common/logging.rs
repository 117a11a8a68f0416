use std::{
    io,
    sync::{Mutex, Once},
    thread,
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

static CAPTURED_LOGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

// Set up a logger that prints log messages with level `level` and above, and also keeps every
// message at Warn and above so that tests can inspect them with `captured_logs`.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        let stdout = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout());

        let capture = fern::Dispatch::new()
            .level(LevelFilter::Warn)
            .chain(fern::Output::call(|record| {
                CAPTURED_LOGS
                    .lock()
                    .unwrap()
                    .push(format!("[{}] {}", record.level(), record.args()))
            }));

        fern::Dispatch::new()
            .chain(stdout)
            .chain(capture)
            .apply()
            .unwrap();
    })
}

// Get every captured log line that contains `pattern`.
pub(crate) fn captured_logs(pattern: &str) -> Vec<String> {
    CAPTURED_LOGS
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.contains(pattern))
        .cloned()
        .collect()
}

// Print a message from the test itself, prefixed with the name of the node it is about.
pub(crate) fn log_with_context(context: Option<&str>, message: &str) {
    match context {
        Some(context) => log::info!("[{}] {}", context, message),
        None => log::info!("[test] {}", message),
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}
