pub mod engine;
pub mod optimizers;
pub mod report;
pub mod return_models;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::input;

/// Deserialize a command's input from `--input` or, failing that, piped
/// stdin.
pub(crate) fn load_input<T: DeserializeOwned>(
    path: Option<&str>,
    what: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        debug!(path = %path, "reading {} input from file", what);
        input::file::read_document(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        debug!("reading {} input from stdin", what);
        Ok(serde_json::from_value(data)?)
    } else {
        Err(format!("--input <file.json|file.yaml> or stdin required for {}", what).into())
    }
}
