pub mod evaluate;
pub mod optimize;

use serde::de::DeserializeOwned;

use crate::input;

/// Read a request from `--input` or, failing that, from piped stdin.
pub(crate) fn read_request<T: DeserializeOwned>(
    path: Option<&str>,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        input::file::read_request_file(path)
    } else if let Some(request) = input::stdin::read_piped()? {
        Ok(request)
    } else {
        Err("a JSON request is required (provide --input or pipe it on stdin)".into())
    }
}
