use serde::de::DeserializeOwned;
use std::io::{self, Read};

use super::{parse_request, InputResult};

/// Request piped on stdin; `None` when stdin is a terminal or carries only
/// whitespace.
pub fn read_piped<T: DeserializeOwned>() -> InputResult<Option<T>> {
    if atty::is(atty::Stream::Stdin) {
        tracing::debug!("stdin is a terminal, no piped request");
        return Ok(None);
    }
    let mut text = String::new();
    io::stdin()
        .lock()
        .read_to_string(&mut text)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;
    parse_request(&text, "stdin")
}
