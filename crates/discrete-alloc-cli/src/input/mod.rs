pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

pub type InputResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Decode a JSON request read from `source`. Blank text is no request.
pub(crate) fn parse_request<T: DeserializeOwned>(text: &str, source: &str) -> InputResult<Option<T>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| format!("Invalid request in {}: {}", source, e).into())
}
