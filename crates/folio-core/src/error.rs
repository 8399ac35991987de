use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FolioError {
    #[error("Invalid input: {field} — {reason}")]
    Validation { field: String, reason: String },

    #[error("Data error: {0}")]
    Data(String),

    #[error("Numerical error in {context}: {reason}")]
    Numerical { context: String, reason: String },

    #[error("Convergence failure: {solver} did not converge after {iterations} iterations (delta: {last_delta})")]
    Convergence {
        solver: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FolioError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FolioError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn numerical(context: impl Into<String>, reason: impl Into<String>) -> Self {
        FolioError::Numerical {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the caller's input (configuration or data),
    /// false for failures of the computation itself.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            FolioError::Validation { .. } | FolioError::Data(_) | FolioError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for FolioError {
    fn from(e: serde_json::Error) -> Self {
        FolioError::Serialization(e.to_string())
    }
}
