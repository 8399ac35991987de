pub mod black_litterman;
pub mod max_sharpe;
pub mod mean_variance;
pub mod min_variance;
pub mod risk_parity;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FolioError;
use crate::linalg::{mat_inverse, sqrt_decimal};
use crate::risk;
use crate::solver::SolverSettings;
use crate::types::*;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Allocation objective. Serialized in kebab-case (`"risk-parity"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RiskModel {
    #[default]
    MeanVariance,
    MinimumVariance,
    MaximumSharpe,
    RiskParity,
    BlackLitterman,
}

impl RiskModel {
    pub const ALL: [RiskModel; 5] = [
        RiskModel::MeanVariance,
        RiskModel::MinimumVariance,
        RiskModel::MaximumSharpe,
        RiskModel::RiskParity,
        RiskModel::BlackLitterman,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskModel::MeanVariance => "mean-variance",
            RiskModel::MinimumVariance => "minimum-variance",
            RiskModel::MaximumSharpe => "maximum-sharpe",
            RiskModel::RiskParity => "risk-parity",
            RiskModel::BlackLitterman => "black-litterman",
        }
    }
}

impl fmt::Display for RiskModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskModel {
    type Err = FolioError;

    fn from_str(s: &str) -> FolioResult<Self> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        RiskModel::ALL
            .into_iter()
            .find(|m| m.as_str() == key)
            .ok_or_else(|| {
                FolioError::validation(
                    "risk_model",
                    format!(
                        "Unknown risk model '{}'; expected one of {}",
                        s,
                        RiskModel::ALL.map(|m| m.as_str()).join(", ")
                    ),
                )
            })
    }
}

impl TryFrom<String> for RiskModel {
    type Error = FolioError;

    fn try_from(s: String) -> FolioResult<Self> {
        s.parse()
    }
}

impl From<RiskModel> for String {
    fn from(m: RiskModel) -> Self {
        m.as_str().to_string()
    }
}

/// The optimizer-specific figure of merit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerMetric {
    /// Minimum variance has nothing beyond the variance itself.
    Variance,
    /// Ratio of expected return to variance, μ_p / σ²_p.
    ReturnVarianceRatio { ratio: Decimal },
    /// Mean-variance point on the frontier with the τ that produced it.
    FrontierPoint { tau: Decimal, ratio: Decimal },
    SharpeRatio { sharpe_ratio: Decimal },
    RiskContributions { contributions: LabeledVector },
}

/// Weights and summary figures produced by any optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub risk_model: RiskModel,
    pub weights: LabeledVector,
    /// wᵗμ, present when the optimizer was given expected returns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<Decimal>,
    pub variance: Decimal,
    pub volatility: Decimal,
    pub metric: OptimizerMetric,
    /// Outer solver iterations (0 for closed-form results).
    pub iterations: u32,
}

/// Bounds and solver controls shared by the iterative optimizers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub bounds: WeightBounds,
    pub solver: SolverSettings,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

impl OptimizationResult {
    pub(crate) fn assemble(
        risk_model: RiskModel,
        tickers: &Tickers,
        weights: Vec<Decimal>,
        mean: Option<&[Decimal]>,
        cov: &CovarianceMatrix,
        metric: OptimizerMetric,
        iterations: u32,
    ) -> FolioResult<Self> {
        let variance = risk::portfolio_variance(&weights, cov.values());
        let expected_return = mean.map(|mu| risk::portfolio_return(&weights, mu));
        Ok(OptimizationResult {
            risk_model,
            weights: LabeledVector::new(tickers.clone(), weights)?,
            expected_return,
            variance,
            volatility: sqrt_decimal(variance),
            metric,
            iterations,
        })
    }

    pub fn weight_sum(&self) -> Decimal {
        self.weights.sum()
    }
}

/// Σ⁻¹, or a NumericalError when Σ is singular (e.g. two identical return
/// series).
pub(crate) fn covariance_inverse(cov: &CovarianceMatrix) -> FolioResult<Vec<Vec<Decimal>>> {
    mat_inverse(cov.values(), "covariance matrix")
}

/// Common preconditions for optimizers that also take expected returns.
pub(crate) fn check_mean_and_covariance(mean: &LabeledVector, cov: &CovarianceMatrix) -> FolioResult<()> {
    cov.ensure_optimizable()?;
    mean.ensure_aligned(cov.tickers(), "mean_returns")
}

/// μ_p / σ²_p, failing when the variance is zero.
pub(crate) fn return_variance_ratio(expected_return: Decimal, variance: Decimal, context: &str) -> FolioResult<Decimal> {
    if variance <= Decimal::ZERO {
        return Err(FolioError::numerical(context, "Portfolio variance is zero"));
    }
    Ok(expected_return / variance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_model_names_round_trip() {
        for m in RiskModel::ALL {
            assert_eq!(m.as_str().parse::<RiskModel>().unwrap(), m);
        }
        assert_eq!("Risk_Parity".parse::<RiskModel>().unwrap(), RiskModel::RiskParity);
    }

    #[test]
    fn test_unknown_risk_model() {
        let err = "kelly".parse::<RiskModel>().unwrap_err();
        assert!(matches!(err, FolioError::Validation { .. }));
    }

    #[test]
    fn test_metric_serializes_with_kind_tag() {
        let m = OptimizerMetric::SharpeRatio {
            sharpe_ratio: Decimal::ONE,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["kind"], "sharpe_ratio");
    }
}
