use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::FolioError;
use crate::linalg::{dot, mat_vec_multiply, sqrt_decimal};
use crate::optimizers::{
    check_mean_and_covariance, covariance_inverse, OptimizationResult, OptimizerMetric, OptimizerSettings, RiskModel,
};
use crate::risk::MIN_VOLATILITY;
use crate::solver::{bound_vectors, feasible_start, minimize, Objective};
use crate::types::*;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaximumSharpeInput {
    pub mean_returns: LabeledVector,
    pub covariance: CovarianceMatrix,
    /// Same periodicity as `mean_returns`.
    #[serde(default)]
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub settings: OptimizerSettings,
}

/// -(wᵗμ - rf) / √(wᵗΣw)
struct NegativeSharpe<'a> {
    mean: &'a [Decimal],
    cov: &'a [Vec<Decimal>],
    risk_free_rate: Decimal,
}

impl NegativeSharpe<'_> {
    fn moments(&self, w: &[Decimal]) -> FolioResult<(Decimal, Vec<Decimal>, Decimal, Decimal)> {
        let sigma_w = mat_vec_multiply(self.cov, w);
        let variance = dot(w, &sigma_w);
        let vol = sqrt_decimal(variance);
        if vol < MIN_VOLATILITY {
            return Err(FolioError::numerical(
                "maximum Sharpe",
                "Portfolio volatility is below 1e-12",
            ));
        }
        let excess = dot(w, self.mean) - self.risk_free_rate;
        Ok((excess, sigma_w, variance, vol))
    }
}

impl Objective for NegativeSharpe<'_> {
    fn name(&self) -> &str {
        "negative Sharpe ratio"
    }

    fn value(&self, w: &[Decimal]) -> FolioResult<Decimal> {
        let (excess, _, _, vol) = self.moments(w)?;
        Ok(-excess / vol)
    }

    fn gradient(&self, w: &[Decimal]) -> FolioResult<Vec<Decimal>> {
        // ∂/∂w [-(e/σ)] = -μ/σ + (e/σ) Σw / σ²
        let (excess, sigma_w, variance, vol) = self.moments(w)?;
        let curvature = (excess / vol).checked_div(variance).ok_or_else(|| {
            FolioError::numerical("maximum Sharpe", "Sharpe ratio over variance overflows")
        })?;
        self.mean
            .iter()
            .zip(sigma_w.iter())
            .map(|(mu, sw)| {
                (-*mu)
                    .checked_div(vol)
                    .zip(curvature.checked_mul(*sw))
                    .and_then(|(a, b)| a.checked_add(b))
                    .ok_or_else(|| FolioError::numerical("maximum Sharpe", "Gradient overflows"))
            })
            .collect()
    }
}

/// Rescale to unit largest variance: Σ/c², μ/c and rf/c with c² = max Σᵢᵢ.
/// The Sharpe ratio of every weight vector is unchanged.
fn unit_scaled(
    mean: &[Decimal],
    cov: &[Vec<Decimal>],
    risk_free_rate: Rate,
) -> FolioResult<(Vec<Decimal>, Vec<Vec<Decimal>>, Rate)> {
    let max_variance = cov
        .iter()
        .enumerate()
        .map(|(i, row)| row[i])
        .fold(Decimal::ZERO, Decimal::max);
    let c = sqrt_decimal(max_variance);
    if c < MIN_VOLATILITY {
        return Err(FolioError::numerical(
            "maximum Sharpe",
            "Every asset volatility is below 1e-12",
        ));
    }
    let overflow = || FolioError::numerical("maximum Sharpe", "Rescaled inputs overflow");
    let scaled_cov = cov
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| v.checked_div(max_variance).ok_or_else(overflow))
                .collect::<FolioResult<Vec<_>>>()
        })
        .collect::<FolioResult<Vec<_>>>()?;
    let scaled_mean = mean
        .iter()
        .map(|m| m.checked_div(c).ok_or_else(overflow))
        .collect::<FolioResult<Vec<_>>>()?;
    let scaled_rf = risk_free_rate.checked_div(c).ok_or_else(overflow)?;
    Ok((scaled_mean, scaled_cov, scaled_rf))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Tangency portfolio under the configured bounds.
pub fn optimize(
    mean: &LabeledVector,
    cov: &CovarianceMatrix,
    risk_free_rate: Rate,
    settings: &OptimizerSettings,
) -> FolioResult<OptimizationResult> {
    check_mean_and_covariance(mean, cov)?;
    settings.solver.validate()?;
    let n = cov.dim();
    settings.bounds.validate(n)?;
    covariance_inverse(cov)?;

    let (scaled_mean, scaled_cov, scaled_rf) = unit_scaled(mean.values(), cov.values(), risk_free_rate)?;
    let objective = NegativeSharpe {
        mean: &scaled_mean,
        cov: &scaled_cov,
        risk_free_rate: scaled_rf,
    };
    let (lower, upper) = bound_vectors(&settings.bounds, n);
    let start = feasible_start(&lower, &upper, Decimal::ONE)?;
    let solution = minimize(&objective, &start, &lower, &upper, &settings.solver)?;

    OptimizationResult::assemble(
        RiskModel::MaximumSharpe,
        cov.tickers(),
        solution.x,
        Some(mean.values()),
        cov,
        OptimizerMetric::SharpeRatio {
            sharpe_ratio: -solution.value,
        },
        solution.iterations,
    )
}

pub fn run_maximum_sharpe(input: &MaximumSharpeInput) -> FolioResult<ComputationOutput<OptimizationResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let result = optimize(
        &input.mean_returns,
        &input.covariance,
        input.risk_free_rate,
        &input.settings,
    )?;
    if let OptimizerMetric::SharpeRatio { sharpe_ratio } = &result.metric {
        if sharpe_ratio.is_sign_negative() {
            warnings.push(format!(
                "Best attainable Sharpe ratio {} is negative: no portfolio beats the risk-free rate",
                sharpe_ratio.round_dp(4)
            ));
        }
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Maximum Sharpe ratio portfolio (SQP with damped BFGS)",
        &serde_json::json!({
            "assets": input.covariance.dim(),
            "risk_free_rate": input.risk_free_rate.to_string(),
            "bounds": [input.settings.bounds.lower.to_string(), input.settings.bounds.upper.to_string()],
        }),
        warnings,
        elapsed,
        result,
    ))
}
