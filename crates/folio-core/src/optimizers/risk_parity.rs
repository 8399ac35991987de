use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::FolioError;
use crate::linalg::{dot, mat_vec_multiply, max_abs, solve_linear, sqrt_decimal};
use crate::optimizers::{covariance_inverse, OptimizationResult, OptimizerMetric, OptimizerSettings, RiskModel};
use crate::risk::{self, MIN_VOLATILITY};
use crate::solver::{bound_vectors, equal_weights, feasible_start, minimize, Objective, SolverSettings};
use crate::types::*;
use crate::FolioResult;

const ARMIJO_C: Decimal = dec!(0.0001);
const MAX_BACKTRACKS: u32 = 60;
/// Relative Newton step below which the full step is taken unchecked.
const FULL_STEP_RADIUS: Decimal = dec!(0.001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParityInput {
    pub covariance: CovarianceMatrix,
    #[serde(default)]
    pub settings: OptimizerSettings,
}

/// Σ(RC_i - mean RC)², the dispersion of risk contributions.
struct ContributionDispersion<'a> {
    cov: &'a [Vec<Decimal>],
}

impl ContributionDispersion<'_> {
    fn parts(&self, w: &[Decimal]) -> FolioResult<(Vec<Decimal>, Vec<Decimal>, Decimal)> {
        let marginal = mat_vec_multiply(self.cov, w);
        let sigma = sqrt_decimal(dot(w, &marginal));
        if sigma < MIN_VOLATILITY {
            return Err(FolioError::numerical("risk parity", "Portfolio volatility is zero"));
        }
        let rc = w.iter().zip(&marginal).map(|(wi, mi)| *wi * *mi / sigma).collect();
        Ok((rc, marginal, sigma))
    }
}

impl Objective for ContributionDispersion<'_> {
    fn name(&self) -> &str {
        "risk contribution dispersion"
    }

    fn value(&self, w: &[Decimal]) -> FolioResult<Decimal> {
        let (rc, _, _) = self.parts(w)?;
        let mean = rc.iter().copied().sum::<Decimal>() / Decimal::from(rc.len() as i64);
        Ok(rc.iter().map(|r| (*r - mean) * (*r - mean)).sum())
    }

    fn gradient(&self, w: &[Decimal]) -> FolioResult<Vec<Decimal>> {
        // f = Σ RC_i² - σ²/n since Σ RC_i = σ.
        // ∂f/∂w_k = 2[(RC_k m_k + (Σ(RC∘w))_k)/σ - (Σ RC_i²) m_k/σ²] - 2 m_k / n
        let (rc, marginal, sigma) = self.parts(w)?;
        let n = Decimal::from(rc.len() as i64);
        let rc_w: Vec<Decimal> = rc.iter().zip(w).map(|(r, wi)| *r * *wi).collect();
        let cov_rc_w = mat_vec_multiply(self.cov, &rc_w);
        let sum_sq: Decimal = rc.iter().map(|r| *r * *r).sum();
        let sigma_sq = sigma * sigma;
        Ok((0..rc.len())
            .map(|k| {
                let first = (rc[k] * marginal[k] + cov_rc_w[k]) / sigma;
                let second = sum_sq * marginal[k] / sigma_sq;
                Decimal::TWO * (first - second) - Decimal::TWO * marginal[k] / n
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Equal-risk-contribution portfolio.
///
/// The unconstrained equal-risk point is the minimizer of the strictly
/// convex F(y) = ½yᵗΣy - (1/n)Σ ln y_i over y > 0, normalized to sum 1; it
/// zeroes the dispersion objective. Only when that point breaks the bounds is
/// the dispersion minimized directly by SQP.
pub fn optimize(cov: &CovarianceMatrix, settings: &OptimizerSettings) -> FolioResult<OptimizationResult> {
    cov.ensure_optimizable()?;
    settings.solver.validate()?;
    let n = cov.dim();
    settings.bounds.validate(n)?;
    covariance_inverse(cov)?;

    let (y, newton_iterations) = equal_risk_newton(cov.values(), &settings.solver)?;
    let total: Decimal = y.iter().sum();
    let mut weights: Vec<Decimal> = y.iter().map(|v| *v / total).collect();
    let mut iterations = newton_iterations;

    if !weights.iter().all(|w| settings.bounds.contains(*w)) {
        info!("equal-risk point violates weight bounds, minimizing contribution dispersion");
        let objective = ContributionDispersion { cov: cov.values() };
        let (lower, upper) = bound_vectors(&settings.bounds, n);
        let start = feasible_start(&lower, &upper, Decimal::ONE)?;
        let solution = minimize(&objective, &start, &lower, &upper, &settings.solver)?;
        weights = solution.x;
        iterations += solution.iterations;
    }

    let contributions = LabeledVector::new(
        cov.tickers().clone(),
        risk::risk_contributions(&weights, cov.values())?,
    )?;

    OptimizationResult::assemble(
        RiskModel::RiskParity,
        cov.tickers(),
        weights,
        None,
        cov,
        OptimizerMetric::RiskContributions { contributions },
        iterations,
    )
}

pub fn run_risk_parity(input: &RiskParityInput) -> FolioResult<ComputationOutput<OptimizationResult>> {
    let start = Instant::now();
    let result = optimize(&input.covariance, &input.settings)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Equal risk contribution (damped Newton, SQP under binding bounds)",
        &serde_json::json!({
            "assets": input.covariance.dim(),
            "bounds": [input.settings.bounds.lower.to_string(), input.settings.bounds.upper.to_string()],
        }),
        Vec::new(),
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Equal-risk Newton
// ---------------------------------------------------------------------------

/// Damped Newton on F(y) = ½yᵗΣy - b Σ ln y_i, b = 1/n.
/// Gradient Σy - b/y, Hessian Σ + diag(b/y²). Steps are halved until y stays
/// positive and F decreases sufficiently.
fn equal_risk_newton(cov: &[Vec<Decimal>], solver: &SolverSettings) -> FolioResult<(Vec<Decimal>, u32)> {
    let n = cov.len();
    let b = Decimal::ONE / Decimal::from(n as i64);

    let w0 = equal_weights(n);
    let sigma0 = risk::portfolio_volatility(&w0, cov);
    if sigma0 < MIN_VOLATILITY {
        return Err(FolioError::numerical("risk parity", "Equal-weight volatility is zero"));
    }
    let mut y: Vec<Decimal> = w0.iter().map(|w| *w / sigma0).collect();
    let mut f = log_barrier(cov, &y, b)?;
    let mut last_delta = Decimal::ZERO;

    for iteration in 1..=solver.max_iterations {
        let sigma_y = mat_vec_multiply(cov, &y);
        let gradient: Vec<Decimal> = sigma_y.iter().zip(&y).map(|(sy, yi)| *sy - b / *yi).collect();
        let mut hessian: Vec<Vec<Decimal>> = cov.to_vec();
        for (i, row) in hessian.iter_mut().enumerate() {
            row[i] += b / (y[i] * y[i]);
        }
        let neg_gradient: Vec<Decimal> = gradient.iter().map(|g| -*g).collect();
        let step = solve_linear(&hessian, &neg_gradient, "risk parity Newton system")?;

        last_delta = max_abs(&step) / max_abs(&y);
        if last_delta <= solver.tolerance {
            debug!(iterations = iteration, "equal-risk Newton converged");
            return Ok((y, iteration));
        }

        let slope = dot(&gradient, &step);
        let mut alpha = Decimal::ONE;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate: Vec<Decimal> = y.iter().zip(&step).map(|(yi, si)| *yi + alpha * *si).collect();
            if candidate.iter().all(|v| *v > Decimal::ZERO) {
                let f_new = log_barrier(cov, &candidate, b)?;
                let local = alpha == Decimal::ONE && last_delta <= FULL_STEP_RADIUS;
                if local || f_new <= f + ARMIJO_C * alpha * slope {
                    accepted = Some((candidate, f_new));
                    break;
                }
            }
            alpha /= Decimal::TWO;
        }
        match accepted {
            Some((candidate, f_new)) => {
                y = candidate;
                f = f_new;
            }
            // Newton decrement below working precision
            None if last_delta <= sqrt_decimal(solver.tolerance) => return Ok((y, iteration)),
            None => {
                return Err(FolioError::Convergence {
                    solver: "Equal-risk Newton".into(),
                    iterations: iteration,
                    last_delta,
                })
            }
        }
    }

    Err(FolioError::Convergence {
        solver: "Equal-risk Newton".into(),
        iterations: solver.max_iterations,
        last_delta,
    })
}

fn log_barrier(cov: &[Vec<Decimal>], y: &[Decimal], b: Decimal) -> FolioResult<Decimal> {
    let mut log_sum = Decimal::ZERO;
    for v in y {
        log_sum += v.checked_ln().ok_or_else(|| {
            FolioError::numerical("risk parity", format!("ln({}) is undefined", v))
        })?;
    }
    Ok(risk::portfolio_variance(y, cov) / Decimal::TWO - b * log_sum)
}
