pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// `{"tickers": [..], "values": [..]}` as (ticker, value) pairs.
pub(crate) fn labeled_pairs(value: &Value) -> Option<Vec<(String, Value)>> {
    let map = value.as_object()?;
    if map.len() != 2 {
        return None;
    }
    let tickers = map.get("tickers")?.as_array()?;
    let values = map.get("values")?.as_array()?;
    if tickers.len() != values.len() {
        return None;
    }
    Some(
        tickers
            .iter()
            .zip(values.iter())
            .map(|(t, v)| (t.as_str().unwrap_or_default().to_string(), v.clone()))
            .collect(),
    )
}

/// Flatten nested objects into dotted `field` / `value` rows. Labeled
/// vectors become one row per ticker; arrays of objects stay as JSON.
pub(crate) fn flatten_rows(map: &Map<String, Value>) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    for (key, val) in map {
        push_rows(key, val, &mut rows);
    }
    rows
}

fn push_rows(prefix: &str, value: &Value, rows: &mut Vec<(String, String)>) {
    if let Some(pairs) = labeled_pairs(value) {
        for (ticker, v) in pairs {
            rows.push((format!("{}.{}", prefix, ticker), format_scalar(&v)));
        }
        return;
    }
    match value {
        Value::Object(inner) if !inner.is_empty() => {
            for (key, val) in inner {
                push_rows(&format!("{}.{}", prefix, key), val, rows);
            }
        }
        _ => rows.push((prefix.to_string(), format_scalar(value))),
    }
}

pub(crate) fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(arr) if arr.iter().all(|v| !v.is_object() && !v.is_array()) => {
            let items: Vec<String> = arr.iter().map(format_scalar).collect();
            items.join(", ")
        }
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_report() {
        let value = json!({
            "weights": {"tickers": ["A", "B"], "values": ["0.4", "0.6"]},
            "metrics": {"risk": 12.5, "sharpeRatio": 0.8},
            "iterations": 3
        });
        let rows = flatten_rows(value.as_object().unwrap());
        assert!(rows.contains(&("weights.A".to_string(), "0.4".to_string())));
        assert!(rows.contains(&("metrics.risk".to_string(), "12.5".to_string())));
        assert!(rows.contains(&("iterations".to_string(), "3".to_string())));
    }

    #[test]
    fn test_plain_object_is_not_labeled() {
        assert!(labeled_pairs(&json!({"tickers": ["A"], "values": [1], "x": 2})).is_none());
        assert!(labeled_pairs(&json!({"tickers": ["A"], "values": [1, 2]})).is_none());
    }
}
