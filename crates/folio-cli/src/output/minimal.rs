use serde_json::Value;

use super::{format_scalar, labeled_pairs};

/// Print just the key answer from the output: the allocation when there is
/// one, otherwise the headline figure.
pub fn print_minimal(value: &Value) {
    for line in minimal_lines(value) {
        println!("{}", line);
    }
}

fn minimal_lines(value: &Value) -> Vec<String> {
    let result = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    // Report weights are a ticker -> percent map; optimizer weights are a
    // labeled vector.
    let weight_sources = [
        result.pointer("/report/weights"),
        result.pointer("/weights"),
        result.pointer("/portfolio/weights"),
    ];
    for source in weight_sources.into_iter().flatten() {
        if let Some(pairs) = labeled_pairs(source) {
            return pairs
                .iter()
                .map(|(t, v)| format!("{} {}", t, format_scalar(v)))
                .collect();
        }
        if let Value::Object(map) = source {
            return map
                .iter()
                .map(|(t, v)| format!("{} {}", t, format_scalar(v)))
                .collect();
        }
    }

    let priority_keys = [
        "expected_return_pct",
        "cumulative_return_pct",
        "beta",
        "beta_mkt_rf",
        "observations",
    ];
    if let Value::Object(map) = result {
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    return vec![format_scalar(val)];
                }
            }
        }
        if let Some((key, val)) = map.iter().next() {
            return vec![format!("{}: {}", key, format_scalar(val))];
        }
    }

    vec![format_scalar(result)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_output_prints_report_weights() {
        let out = json!({"result": {"report": {"weights": {"SPY": 60.0, "TLT": 40.0}}}});
        assert_eq!(minimal_lines(&out), vec!["SPY 60.0", "TLT 40.0"]);
    }

    #[test]
    fn test_optimizer_output_prints_labeled_weights() {
        let out = json!({"result": {"weights": {"tickers": ["A", "B"], "values": ["0.25", "0.75"]}}});
        assert_eq!(minimal_lines(&out), vec!["A 0.25", "B 0.75"]);
    }

    #[test]
    fn test_capm_prints_expected_return() {
        let out = json!({"result": {"beta": "1.1", "expected_return_pct": "8.6"}});
        assert_eq!(minimal_lines(&out), vec!["8.6"]);
    }
}
