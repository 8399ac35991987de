use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::FolioError;
use crate::FolioResult;

/// Rates and returns expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Tolerance on the full-investment constraint sum(w) = 1.
pub const WEIGHT_SUM_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Tickers
// ---------------------------------------------------------------------------

/// Immutable, ordered asset labels shared by every vector and matrix built
/// from the same universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Tickers(Arc<[String]>);

impl Tickers {
    pub fn new(names: Vec<String>) -> FolioResult<Self> {
        if names.is_empty() {
            return Err(FolioError::validation(
                "tickers",
                "At least one ticker required",
            ));
        }
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(FolioError::validation(
                    format!("tickers[{}]", i),
                    "Ticker must not be empty",
                ));
            }
            if names[..i].contains(name) {
                return Err(FolioError::validation(
                    format!("tickers[{}]", i),
                    format!("Duplicate ticker '{}'", name),
                ));
            }
        }
        Ok(Tickers(names.into()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.0.iter().position(|t| t == ticker)
    }
}

impl TryFrom<Vec<String>> for Tickers {
    type Error = FolioError;

    fn try_from(names: Vec<String>) -> FolioResult<Self> {
        Tickers::new(names)
    }
}

impl From<Tickers> for Vec<String> {
    fn from(tickers: Tickers) -> Self {
        tickers.0.to_vec()
    }
}

// ---------------------------------------------------------------------------
// Labelled containers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawLabeledVector {
    tickers: Tickers,
    values: Vec<Decimal>,
}

/// A dense vector with one value per ticker (mean returns, weights, risk
/// contributions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLabeledVector")]
pub struct LabeledVector {
    tickers: Tickers,
    values: Vec<Decimal>,
}

impl LabeledVector {
    pub fn new(tickers: Tickers, values: Vec<Decimal>) -> FolioResult<Self> {
        if values.len() != tickers.len() {
            return Err(FolioError::validation(
                "values",
                format!(
                    "Expected {} values (one per ticker) but got {}",
                    tickers.len(),
                    values.len()
                ),
            ));
        }
        Ok(LabeledVector { tickers, values })
    }

    pub fn tickers(&self) -> &Tickers {
        &self.tickers
    }

    pub fn values(&self) -> &[Decimal] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Decimal> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, ticker: &str) -> Option<Decimal> {
        self.tickers.position(ticker).map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Decimal)> {
        self.tickers.iter().zip(self.values.iter())
    }

    pub fn sum(&self) -> Decimal {
        self.values.iter().sum()
    }

    /// Fails unless both vectors are labelled with the same tickers in the
    /// same order.
    pub fn ensure_aligned(&self, other: &Tickers, field: &str) -> FolioResult<()> {
        if &self.tickers != other {
            return Err(FolioError::validation(
                field,
                format!(
                    "Tickers {:?} do not match {:?}",
                    self.tickers.as_slice(),
                    other.as_slice()
                ),
            ));
        }
        Ok(())
    }
}

impl TryFrom<RawLabeledVector> for LabeledVector {
    type Error = FolioError;

    fn try_from(raw: RawLabeledVector) -> FolioResult<Self> {
        LabeledVector::new(raw.tickers, raw.values)
    }
}

#[derive(Deserialize)]
struct RawCovarianceMatrix {
    tickers: Tickers,
    values: Vec<Vec<Decimal>>,
}

/// Square, symmetric covariance matrix indexed by ticker on both axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCovarianceMatrix")]
pub struct CovarianceMatrix {
    tickers: Tickers,
    values: Vec<Vec<Decimal>>,
}

impl CovarianceMatrix {
    pub fn new(tickers: Tickers, values: Vec<Vec<Decimal>>) -> FolioResult<Self> {
        validate_covariance_matrix(&values, tickers.len())?;
        Ok(CovarianceMatrix { tickers, values })
    }

    pub fn tickers(&self) -> &Tickers {
        &self.tickers
    }

    pub fn values(&self) -> &[Vec<Decimal>] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Diagonal of the matrix (asset variances).
    pub fn variances(&self) -> Vec<Decimal> {
        (0..self.dim()).map(|i| self.values[i][i]).collect()
    }

    /// Optimizers need at least two assets to have anything to allocate.
    pub fn ensure_optimizable(&self) -> FolioResult<()> {
        if self.dim() < 2 {
            return Err(FolioError::Data(format!(
                "At least 2 assets required for covariance-based optimization, got {}",
                self.dim()
            )));
        }
        Ok(())
    }
}

impl TryFrom<RawCovarianceMatrix> for CovarianceMatrix {
    type Error = FolioError;

    fn try_from(raw: RawCovarianceMatrix) -> FolioResult<Self> {
        CovarianceMatrix::new(raw.tickers, raw.values)
    }
}

#[allow(clippy::needless_range_loop)]
fn validate_covariance_matrix(cov: &[Vec<Decimal>], n: usize) -> FolioResult<()> {
    if cov.len() != n {
        return Err(FolioError::validation(
            "covariance_matrix",
            format!("Expected {}x{} matrix but got {} rows", n, n, cov.len()),
        ));
    }
    for (i, row) in cov.iter().enumerate() {
        if row.len() != n {
            return Err(FolioError::validation(
                "covariance_matrix",
                format!("Row {} has {} columns, expected {}", i, row.len(), n),
            ));
        }
        if row[i] < Decimal::ZERO {
            return Err(FolioError::validation(
                "covariance_matrix",
                format!("Negative variance on the diagonal at [{},{}]", i, i),
            ));
        }
    }
    let tolerance = dec!(0.0000001);
    for i in 0..n {
        for j in (i + 1)..n {
            if (cov[i][j] - cov[j][i]).abs() > tolerance {
                return Err(FolioError::validation(
                    "covariance_matrix",
                    format!(
                        "Not symmetric: [{},{}]={} != [{},{}]={}",
                        i, j, cov[i][j], j, i, cov[j][i]
                    ),
                ));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Return model
// ---------------------------------------------------------------------------

/// How period returns are derived from consecutive prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReturnModel {
    /// P_t / P_{t-1} - 1
    #[default]
    Simple,
    /// ln(P_t / P_{t-1})
    Log,
}

impl FromStr for ReturnModel {
    type Err = FolioError;

    fn from_str(s: &str) -> FolioResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ReturnModel::Simple),
            "log" => Ok(ReturnModel::Log),
            other => Err(FolioError::validation(
                "return_model",
                format!("Must be 'simple' or 'log', got '{}'", other),
            )),
        }
    }
}

impl TryFrom<String> for ReturnModel {
    type Error = FolioError;

    fn try_from(s: String) -> FolioResult<Self> {
        s.parse()
    }
}

impl From<ReturnModel> for String {
    fn from(model: ReturnModel) -> Self {
        model.to_string()
    }
}

impl fmt::Display for ReturnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnModel::Simple => write!(f, "simple"),
            ReturnModel::Log => write!(f, "log"),
        }
    }
}

// ---------------------------------------------------------------------------
// Weight bounds
// ---------------------------------------------------------------------------

/// Per-asset lower/upper weight limits applied uniformly to every asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub lower: Decimal,
    pub upper: Decimal,
}

impl WeightBounds {
    /// [0, 1]: fully invested, no short selling.
    pub const fn long_only() -> Self {
        WeightBounds {
            lower: Decimal::ZERO,
            upper: Decimal::ONE,
        }
    }

    /// [-1, 1]: short selling allowed up to 100% per asset.
    pub const fn long_short() -> Self {
        WeightBounds {
            lower: Decimal::NEGATIVE_ONE,
            upper: Decimal::ONE,
        }
    }

    pub fn validate(&self, n: usize) -> FolioResult<()> {
        if self.lower > self.upper {
            return Err(FolioError::validation(
                "bounds",
                format!("lower {} exceeds upper {}", self.lower, self.upper),
            ));
        }
        let count = Decimal::from(n as i64);
        if self.lower * count > Decimal::ONE || self.upper * count < Decimal::ONE {
            return Err(FolioError::validation(
                "bounds",
                format!(
                    "[{}, {}] cannot hold {} weights summing to 1",
                    self.lower, self.upper, n
                ),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, w: Decimal) -> bool {
        w >= self.lower - WEIGHT_SUM_TOLERANCE && w <= self.upper + WEIGHT_SUM_TOLERANCE
    }
}

impl Default for WeightBounds {
    fn default() -> Self {
        WeightBounds::long_only()
    }
}

// ---------------------------------------------------------------------------
// Output envelope
// ---------------------------------------------------------------------------

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
