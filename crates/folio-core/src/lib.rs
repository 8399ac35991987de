pub mod error;
pub mod linalg;
pub mod risk;
pub mod solver;
pub mod types;

#[cfg(feature = "statistics")]
pub mod statistics;

#[cfg(feature = "optimizers")]
pub mod optimizers;

#[cfg(feature = "report")]
pub mod report;

#[cfg(feature = "return_models")]
pub mod return_models;

#[cfg(feature = "engine")]
pub mod config;

#[cfg(feature = "engine")]
pub mod engine;

pub use error::FolioError;
pub use types::*;

/// Standard result type for all folio computations
pub type FolioResult<T> = Result<T, FolioError>;
