use serde::de::DeserializeOwned;
use std::fs;
use std::path::PathBuf;

use super::{parse_request, InputResult};

/// Request stored as JSON in `path`, relative to the working directory
/// unless absolute. An empty file is an error rather than no request.
pub fn read_request_file<T: DeserializeOwned>(path: &str) -> InputResult<T> {
    let resolved = resolve_path(path)?;
    let label = format!("'{}'", resolved.display());
    let text = fs::read_to_string(&resolved)
        .map_err(|e| format!("Failed to read {}: {}", label, e))?;
    parse_request(&text, &label)?.ok_or_else(|| format!("Request file {} is empty", label).into())
}

fn resolve_path(path: &str) -> InputResult<PathBuf> {
    if path.trim().is_empty() {
        return Err("Input path is empty".into());
    }
    // Joining an absolute path replaces the base.
    let resolved = std::env::current_dir()?.join(path);
    match fs::metadata(&resolved) {
        Ok(meta) if meta.is_file() => Ok(resolved),
        Ok(_) => Err(format!("Not a regular file: {}", resolved.display()).into()),
        Err(e) => Err(format!("Cannot open {}: {}", resolved.display(), e).into()),
    }
}
