use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Instant;
use tracing::info;

use crate::error::FolioError;
use crate::linalg::sqrt_decimal;
use crate::risk;
use crate::types::*;
use crate::FolioResult;

const REPORT_DP: u32 = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Periods per year (252 for daily data).
    pub annualization_factor: Decimal,
    /// Annual risk-free rate as a decimal.
    pub risk_free_rate: Rate,
    /// How `portfolio_returns` compound into the drawdown series.
    pub return_model: ReturnModel,
}

impl Default for ReportSettings {
    fn default() -> Self {
        ReportSettings {
            annualization_factor: dec!(252),
            risk_free_rate: dec!(0.02),
            return_model: ReturnModel::Simple,
        }
    }
}

impl ReportSettings {
    pub fn validate(&self) -> FolioResult<()> {
        if self.annualization_factor <= Decimal::ZERO {
            return Err(FolioError::validation(
                "annualization_factor",
                "Must be positive",
            ));
        }
        Ok(())
    }
}

/// Annualized metrics. Returns, risk and drawdown are percentages; the two
/// ratios are dimensionless. Everything is rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    #[serde(with = "rust_decimal::serde::float")]
    pub expected_return: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub risk: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub sharpe_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub sortino_ratio: Decimal,
    /// Magnitude of the largest peak-to-trough decline.
    #[serde(with = "rust_decimal::serde::float")]
    pub max_drawdown: Decimal,
}

/// `{"weights": {ticker: pct, ...}, "metrics": {...}}` with tickers in input
/// order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    #[serde(serialize_with = "serialize_percent_map")]
    pub weights: LabeledVector,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInput {
    pub weights: LabeledVector,
    pub mean_returns: LabeledVector,
    pub covariance: CovarianceMatrix,
    /// Per-period portfolio returns used for downside deviation and drawdown.
    pub portfolio_returns: Vec<Decimal>,
    #[serde(default)]
    pub settings: ReportSettings,
}

fn serialize_percent_map<S: Serializer>(weights: &LabeledVector, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(weights.len()))?;
    for (ticker, pct) in weights.iter() {
        map.serialize_entry(ticker, &pct.to_f64().unwrap_or_default())?;
    }
    map.end()
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Standardized performance report for a weight vector.
pub fn report(
    weights: &LabeledVector,
    mean: &LabeledVector,
    cov: &CovarianceMatrix,
    portfolio_returns: &[Decimal],
    settings: &ReportSettings,
) -> FolioResult<PerformanceReport> {
    settings.validate()?;
    weights.ensure_aligned(cov.tickers(), "weights")?;
    mean.ensure_aligned(cov.tickers(), "mean_returns")?;

    let factor = settings.annualization_factor;
    let rf = settings.risk_free_rate;

    // --- Annualized return and volatility ---
    let annual_return = risk::portfolio_return(weights.values(), mean.values()) * factor;
    let annual_vol = sqrt_decimal(risk::portfolio_variance(weights.values(), cov.values()) * factor);
    let excess = annual_return - rf;

    // --- Sharpe and Sortino ---
    let sharpe = if annual_vol.is_zero() {
        Decimal::ZERO
    } else {
        excess / annual_vol
    };
    let annual_downside = risk::downside_deviation(portfolio_returns, Decimal::ZERO) * sqrt_decimal(factor);
    let sortino = if annual_downside.is_zero() {
        Decimal::ZERO
    } else {
        excess / annual_downside
    };

    // --- Max drawdown on the compounded value series ---
    let values = risk::cumulative_series(portfolio_returns, settings.return_model)?;
    let drawdown = risk::max_drawdown(&values)?.abs();

    let hundred = dec!(100);
    let pct_weights = LabeledVector::new(
        weights.tickers().clone(),
        weights
            .values()
            .iter()
            .map(|w| (*w * hundred).round_dp(REPORT_DP))
            .collect(),
    )?;

    info!(
        expected_return = %annual_return,
        volatility = %annual_vol,
        "performance report produced"
    );

    Ok(PerformanceReport {
        weights: pct_weights,
        metrics: PerformanceMetrics {
            expected_return: (annual_return * hundred).round_dp(REPORT_DP),
            risk: (annual_vol * hundred).round_dp(REPORT_DP),
            sharpe_ratio: sharpe.round_dp(REPORT_DP),
            sortino_ratio: sortino.round_dp(REPORT_DP),
            max_drawdown: (drawdown * hundred).round_dp(REPORT_DP),
        },
    })
}

pub fn run_report(input: &ReportInput) -> FolioResult<ComputationOutput<PerformanceReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let weight_sum = input.weights.sum();
    if (weight_sum - Decimal::ONE).abs() > WEIGHT_SUM_TOLERANCE {
        warnings.push(format!("Weights sum to {} rather than 1", weight_sum));
    }
    let result = report(
        &input.weights,
        &input.mean_returns,
        &input.covariance,
        &input.portfolio_returns,
        &input.settings,
    )?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Annualized performance report (Sharpe, Sortino, max drawdown)",
        &serde_json::json!({
            "annualization_factor": input.settings.annualization_factor.to_string(),
            "risk_free_rate": input.settings.risk_free_rate.to_string(),
            "return_model": input.settings.return_model.to_string(),
            "observations": input.portfolio_returns.len(),
        }),
        warnings,
        elapsed,
        result,
    ))
}
