use serde_json::Value;

/// Print one line per position, then the key portfolio figures.
///
/// Falls back to the first field of the result when the output is not a
/// portfolio report.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Some(positions) = result_obj.get("positions").and_then(Value::as_array) {
        for position in positions {
            println!(
                "{}\t{}\t{}",
                format_minimal(&position["name"]),
                format_minimal(&position["shares"]),
                format_minimal(&position["weight"]),
            );
        }
        let state = &result_obj["state"];
        println!("value: {}", format_minimal(&state["value"]));
        println!("deficit: {}", format_minimal(&state["deficit"]));
        if let Some(sharpe) = result_obj.get("metrics").and_then(|m| m.get("sharpe")) {
            println!("sharpe: {}", format_minimal(sharpe));
        }
        return;
    }

    if let Value::Object(map) = result_obj {
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
