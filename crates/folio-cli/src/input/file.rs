use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Read a JSON or YAML file (chosen by extension) into a typed struct.
pub fn read_document<T: DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    let canonical = resolve_path(path)?;
    let contents = fs::read_to_string(&canonical)
        .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
    let value: T = if is_yaml(&canonical) {
        serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e))?
    } else {
        serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e))?
    };
    Ok(value)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("yaml") | Some("yml")
    )
}

/// Resolve and validate the path, preventing directory traversal.
fn resolve_path(path: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let p = Path::new(path);
    let canonical = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };

    if !canonical.exists() {
        return Err(format!("File not found: {}", canonical.display()).into());
    }

    if !canonical.is_file() {
        return Err(format!("Not a file: {}", canonical.display()).into());
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::config::EngineConfig;
    use folio_core::optimizers::RiskModel;
    use rust_decimal_macros::dec;

    fn write_temp(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("folio-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_yaml_config_by_extension() {
        let path = write_temp(
            "config.yaml",
            "risk_model: maximum-sharpe\ntau: 0.25\nsolver:\n  max_iterations: 200\n",
        );
        let cfg: EngineConfig = read_document(&path).unwrap();
        assert_eq!(cfg.risk_model, RiskModel::MaximumSharpe);
        assert_eq!(cfg.tau, dec!(0.25));
        assert_eq!(cfg.solver.max_iterations, 200);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_json_config() {
        let path = write_temp("config.json", r#"{"allow_short": true}"#);
        let cfg: EngineConfig = read_document(&path).unwrap();
        assert!(cfg.allow_short);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_file() {
        let err = read_document::<EngineConfig>("/nonexistent/folio.json").unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }
}
