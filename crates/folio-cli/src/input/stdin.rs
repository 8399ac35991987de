use serde_json::Value;
use std::io::{self, Read};

/// Attempt to read JSON (or YAML) from stdin if data is being piped.
/// Returns None if stdin is a TTY (interactive).
pub fn read_stdin() -> Result<Option<Value>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    parse_document(&buffer)
}

fn parse_document(buffer: &str) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(Some(serde_json::from_str(trimmed)?));
    }
    let value: Value = serde_yaml::from_str(trimmed)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_and_yaml() {
        let json = parse_document(r#" {"tau": 0.5} "#).unwrap().unwrap();
        assert_eq!(json["tau"], 0.5);
        let yaml = parse_document("tau: 0.5\nrisk_model: risk-parity\n").unwrap().unwrap();
        assert_eq!(yaml["risk_model"], "risk-parity");
    }

    #[test]
    fn test_blank_input_is_none() {
        assert!(parse_document("  \n").unwrap().is_none());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(parse_document("{\"tau\": ").is_err());
    }
}
