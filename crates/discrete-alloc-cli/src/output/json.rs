use serde_json::Value;
use std::io::{self, Write};

/// Pretty-printed JSON terminated by a newline.
pub fn render_json(value: &Value) -> serde_json::Result<String> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

/// Write the rendered value to stdout. A closed pipe (`dalloc ... | head`)
/// ends output quietly.
pub fn print_json(value: &Value) {
    let text = match render_json(value) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("JSON serialization error: {}", e);
            return;
        }
    };
    let mut out = io::stdout().lock();
    if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
        if e.kind() != io::ErrorKind::BrokenPipe {
            eprintln!("Failed to write output: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_keeps_decimal_strings() {
        let value = json!({ "result": { "state": { "value": "999.90", "deficit": "-0.10" } } });
        let text = render_json(&value).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\"value\": \"999.90\""));
        assert!(text.contains("\n  \"result\""));
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
