use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::error::FolioError;
use crate::linalg::{mat_scale, mat_vec_multiply};
use crate::optimizers::{
    check_mean_and_covariance, covariance_inverse, return_variance_ratio, OptimizationResult, OptimizerMetric,
    RiskModel,
};
use crate::risk;
use crate::solver::{bound_vectors, feasible_start, solve_qp, BoxQp, SolverSettings};
use crate::types::*;
use crate::FolioResult;

/// Decimal places kept on numerically optimized weights.
const WEIGHT_DP: u32 = 12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeanVarianceMethod {
    /// Active-set QP with bounds.
    #[default]
    Numeric,
    /// Closed-form two-fund frontier (unbounded unless a sweep filters it).
    Analytic,
}

/// Upper limit on `TauSweep::samples`.
pub const MAX_SWEEP_SAMPLES: u32 = 100_000;

/// Grid search over the analytic frontier for the best return/variance
/// ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TauSweep {
    pub start: Decimal,
    pub end: Decimal,
    pub samples: u32,
    /// Only consider frontier points without short positions.
    pub long_only: bool,
}

impl Default for TauSweep {
    fn default() -> Self {
        TauSweep {
            start: Decimal::ZERO,
            end: Decimal::ONE,
            samples: 1001,
            long_only: true,
        }
    }
}

impl TauSweep {
    pub fn validate(&self) -> FolioResult<()> {
        if self.start < Decimal::ZERO {
            return Err(FolioError::validation("sweep.start", "Tau must be non-negative"));
        }
        if self.end < self.start {
            return Err(FolioError::validation(
                "sweep.end",
                format!("End {} is below start {}", self.end, self.start),
            ));
        }
        if self.samples < 2 {
            return Err(FolioError::validation("sweep.samples", "At least 2 samples required"));
        }
        if self.samples > MAX_SWEEP_SAMPLES {
            return Err(FolioError::validation(
                "sweep.samples",
                format!("At most {} samples allowed, got {}", MAX_SWEEP_SAMPLES, self.samples),
            ));
        }
        Ok(())
    }

    fn points(&self) -> impl Iterator<Item = Decimal> + '_ {
        let step = (self.end - self.start) / Decimal::from(self.samples - 1);
        (0..self.samples).map(move |k| self.start + step * Decimal::from(k))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanVarianceSettings {
    pub method: MeanVarianceMethod,
    /// Analytic method only: search τ instead of using the given one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<TauSweep>,
    /// Numeric method only.
    pub bounds: WeightBounds,
    pub solver: SolverSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanVarianceInput {
    pub mean_returns: LabeledVector,
    pub covariance: CovarianceMatrix,
    #[serde(default = "default_tau")]
    pub tau: Decimal,
    #[serde(default)]
    pub settings: MeanVarianceSettings,
}

fn default_tau() -> Decimal {
    dec!(0.5)
}

/// The two-fund decomposition `w(τ) = A/a + τ(B - (b/a)A)` with
/// A = Σ⁻¹1, B = Σ⁻¹μ, a = 1ᵗA, b = 1ᵗB.
#[derive(Debug, Clone)]
pub struct TwoFundFrontier {
    mean: Vec<Decimal>,
    cov: Vec<Vec<Decimal>>,
    min_variance_fund: Vec<Decimal>,
    tilt: Vec<Decimal>,
}

/// A selected frontier point.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierPoint {
    pub tau: Decimal,
    pub weights: Vec<Decimal>,
    pub ratio: Decimal,
}

// ---------------------------------------------------------------------------
// Analytic frontier
// ---------------------------------------------------------------------------

impl TwoFundFrontier {
    pub fn new(mean: &LabeledVector, cov: &CovarianceMatrix) -> FolioResult<Self> {
        check_mean_and_covariance(mean, cov)?;
        let inv = covariance_inverse(cov)?;
        let n = cov.dim();

        let a_vec = mat_vec_multiply(&inv, &vec![Decimal::ONE; n]);
        let b_vec = mat_vec_multiply(&inv, mean.values());
        let a: Decimal = a_vec.iter().sum();
        let b: Decimal = b_vec.iter().sum();
        if a.is_zero() {
            return Err(FolioError::numerical(
                "mean-variance frontier",
                "1ᵗΣ⁻¹1 is zero",
            ));
        }
        let b_over_a = b / a;

        Ok(TwoFundFrontier {
            mean: mean.values().to_vec(),
            cov: cov.values().to_vec(),
            min_variance_fund: a_vec.iter().map(|x| *x / a).collect(),
            tilt: b_vec
                .iter()
                .zip(a_vec.iter())
                .map(|(bi, ai)| *bi - b_over_a * *ai)
                .collect(),
        })
    }

    /// One frontier portfolio. τ = 0 is the unconstrained minimum-variance
    /// portfolio.
    pub fn frontier_weights(&self, tau: Decimal) -> FolioResult<Vec<Decimal>> {
        if tau < Decimal::ZERO {
            return Err(FolioError::validation("tau", "Must be non-negative"));
        }
        Ok(self
            .min_variance_fund
            .iter()
            .zip(self.tilt.iter())
            .map(|(m, t)| *m + tau * *t)
            .collect())
    }

    /// The sampled τ with the highest μ_p/σ²_p. Ties keep the smaller τ.
    pub fn sweep(&self, sweep: &TauSweep) -> FolioResult<FrontierPoint> {
        sweep.validate()?;
        let mut best: Option<FrontierPoint> = None;
        for tau in sweep.points() {
            let weights = self.frontier_weights(tau)?;
            if sweep.long_only && weights.iter().any(|w| w.is_sign_negative() && !w.is_zero()) {
                continue;
            }
            let variance = risk::portfolio_variance(&weights, &self.cov);
            if variance <= Decimal::ZERO {
                continue;
            }
            let ratio = risk::portfolio_return(&weights, &self.mean) / variance;
            if best.as_ref().map_or(true, |b| ratio > b.ratio) {
                best = Some(FrontierPoint { tau, weights, ratio });
            }
        }
        best.ok_or_else(|| {
            FolioError::numerical(
                "mean-variance sweep",
                "No admissible frontier point in the tau range",
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Mean-variance utility portfolio with risk tolerance `tau`.
pub fn optimize(
    mean: &LabeledVector,
    cov: &CovarianceMatrix,
    tau: Decimal,
    settings: &MeanVarianceSettings,
) -> FolioResult<OptimizationResult> {
    if tau < Decimal::ZERO {
        return Err(FolioError::validation("tau", format!("Must be non-negative, got {}", tau)));
    }
    match settings.method {
        MeanVarianceMethod::Numeric => optimize_numeric(mean, cov, tau, settings),
        MeanVarianceMethod::Analytic => optimize_analytic(mean, cov, tau, settings.sweep.as_ref()),
    }
}

/// maximize 2τ·wᵗμ - wᵗΣw under full investment and bounds, i.e. the QP
/// with H = 2Σ and c = -2τμ.
pub fn optimize_numeric(
    mean: &LabeledVector,
    cov: &CovarianceMatrix,
    tau: Decimal,
    settings: &MeanVarianceSettings,
) -> FolioResult<OptimizationResult> {
    check_mean_and_covariance(mean, cov)?;
    settings.solver.validate()?;
    let n = cov.dim();
    settings.bounds.validate(n)?;
    covariance_inverse(cov)?;

    let hessian = mat_scale(cov.values(), Decimal::TWO);
    let linear: Vec<Decimal> = mean.values().iter().map(|m| -Decimal::TWO * tau * *m).collect();
    let (lower, upper) = bound_vectors(&settings.bounds, n);
    let start = feasible_start(&lower, &upper, Decimal::ONE)?;

    let problem = BoxQp {
        hessian: &hessian,
        linear: &linear,
        total: Decimal::ONE,
        lower: &lower,
        upper: &upper,
    };
    let solution = solve_qp(&problem, &start, &settings.solver)?;
    let weights: Vec<Decimal> = solution.x.iter().map(|w| w.round_dp(WEIGHT_DP)).collect();
    debug!(tau = %tau, iterations = solution.iterations, "mean-variance QP solved");

    let expected = risk::portfolio_return(&weights, mean.values());
    let variance = risk::portfolio_variance(&weights, cov.values());
    let ratio = return_variance_ratio(expected, variance, "mean-variance")?;

    OptimizationResult::assemble(
        RiskModel::MeanVariance,
        cov.tickers(),
        weights,
        Some(mean.values()),
        cov,
        OptimizerMetric::FrontierPoint { tau, ratio },
        solution.iterations,
    )
}

/// Closed-form frontier portfolio at `tau`, or the best sampled τ when a
/// sweep is given.
pub fn optimize_analytic(
    mean: &LabeledVector,
    cov: &CovarianceMatrix,
    tau: Decimal,
    sweep: Option<&TauSweep>,
) -> FolioResult<OptimizationResult> {
    let frontier = TwoFundFrontier::new(mean, cov)?;
    let point = match sweep {
        Some(s) => frontier.sweep(s)?,
        None => {
            let weights = frontier.frontier_weights(tau)?;
            let expected = risk::portfolio_return(&weights, mean.values());
            let variance = risk::portfolio_variance(&weights, cov.values());
            FrontierPoint {
                tau,
                ratio: return_variance_ratio(expected, variance, "mean-variance")?,
                weights,
            }
        }
    };
    debug!(tau = %point.tau, ratio = %point.ratio, "analytic frontier point selected");

    OptimizationResult::assemble(
        RiskModel::MeanVariance,
        cov.tickers(),
        point.weights,
        Some(mean.values()),
        cov,
        OptimizerMetric::FrontierPoint {
            tau: point.tau,
            ratio: point.ratio,
        },
        0,
    )
}

pub fn run_mean_variance(input: &MeanVarianceInput) -> FolioResult<ComputationOutput<OptimizationResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let result = optimize(&input.mean_returns, &input.covariance, input.tau, &input.settings)?;
    if input.settings.method == MeanVarianceMethod::Analytic
        && result.weights.values().iter().any(|w| *w < Decimal::ZERO)
    {
        warnings.push("Analytic frontier weights include short positions".to_string());
    }

    let methodology = match input.settings.method {
        MeanVarianceMethod::Numeric => "Mean-variance utility (active-set QP, long-only)",
        MeanVarianceMethod::Analytic => "Mean-variance utility (closed-form two-fund frontier)",
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        methodology,
        &serde_json::json!({
            "tau": input.tau.to_string(),
            "method": input.settings.method,
            "sweep": input.settings.sweep,
        }),
        warnings,
        elapsed,
        result,
    ))
}
