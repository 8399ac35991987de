use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::linalg::mat_scale;
use crate::optimizers::{covariance_inverse, OptimizationResult, OptimizerMetric, RiskModel};
use crate::solver::{bound_vectors, feasible_start, solve_qp, BoxQp, SolverSettings};
use crate::types::*;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimumVarianceSettings {
    /// Widens the default bounds from [0, 1] to [-1, 1].
    pub allow_short: bool,
    /// Explicit bounds; takes precedence over `allow_short`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<WeightBounds>,
    pub solver: SolverSettings,
}

impl MinimumVarianceSettings {
    pub fn bounds(&self) -> WeightBounds {
        match self.bounds {
            Some(b) => b,
            None if self.allow_short => WeightBounds::long_short(),
            None => WeightBounds::long_only(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimumVarianceInput {
    pub covariance: CovarianceMatrix,
    #[serde(default)]
    pub settings: MinimumVarianceSettings,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Global minimum-variance portfolio: minimize wᵗΣw subject to full
/// investment and per-asset bounds.
pub fn optimize(cov: &CovarianceMatrix, settings: &MinimumVarianceSettings) -> FolioResult<OptimizationResult> {
    cov.ensure_optimizable()?;
    settings.solver.validate()?;
    let bounds = settings.bounds();
    let n = cov.dim();
    bounds.validate(n)?;
    covariance_inverse(cov)?;

    // ½ wᵗ(2Σ)w = wᵗΣw
    let hessian = mat_scale(cov.values(), Decimal::TWO);
    let linear = vec![Decimal::ZERO; n];
    let (lower, upper) = bound_vectors(&bounds, n);
    let start = feasible_start(&lower, &upper, Decimal::ONE)?;

    let problem = BoxQp {
        hessian: &hessian,
        linear: &linear,
        total: Decimal::ONE,
        lower: &lower,
        upper: &upper,
    };
    let solution = solve_qp(&problem, &start, &settings.solver)?;
    debug!(iterations = solution.iterations, "minimum variance solved");

    OptimizationResult::assemble(
        RiskModel::MinimumVariance,
        cov.tickers(),
        solution.x,
        None,
        cov,
        OptimizerMetric::Variance,
        solution.iterations,
    )
}

pub fn run_minimum_variance(input: &MinimumVarianceInput) -> FolioResult<ComputationOutput<OptimizationResult>> {
    let start = Instant::now();
    let result = optimize(&input.covariance, &input.settings)?;
    let bounds = input.settings.bounds();

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Minimum variance portfolio (active-set QP, full investment)",
        &serde_json::json!({
            "assets": input.covariance.dim(),
            "bounds": [bounds.lower.to_string(), bounds.upper.to_string()],
            "allow_short": input.settings.allow_short,
        }),
        Vec::new(),
        elapsed,
        result,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FolioError;
    use crate::risk::portfolio_variance;
    use rust_decimal_macros::dec;

    fn tickers(n: usize) -> Tickers {
        Tickers::new((0..n).map(|i| format!("A{}", i)).collect()).unwrap()
    }

    fn diag_cov(values: &[Decimal]) -> CovarianceMatrix {
        let n = values.len();
        let m = (0..n)
            .map(|i| (0..n).map(|j| if i == j { values[i] } else { Decimal::ZERO }).collect())
            .collect();
        CovarianceMatrix::new(tickers(n), m).unwrap()
    }

    fn assert_close(a: Decimal, b: Decimal, tol: Decimal) {
        assert!((a - b).abs() < tol, "expected {} ~= {} (tol {})", a, b, tol);
    }

    #[test]
    fn test_diagonal_inverse_variance_weights() {
        let cov = diag_cov(&[dec!(0.04), dec!(0.09), dec!(0.01)]);
        let r = optimize(&cov, &MinimumVarianceSettings::default()).unwrap();
        let w = r.weights.values();
        assert_close(w[0], dec!(0.1837), dec!(0.0001));
        assert_close(w[1], dec!(0.0816), dec!(0.0001));
        assert_close(w[2], dec!(0.7347), dec!(0.0001));
        assert_close(r.weight_sum(), Decimal::ONE, dec!(0.000001));
    }

    #[test]
    fn test_variance_not_above_equal_weight() {
        let cov = CovarianceMatrix::new(
            tickers(3),
            vec![
                vec![dec!(0.04), dec!(0.006), dec!(0.002)],
                vec![dec!(0.006), dec!(0.09), dec!(0.009)],
                vec![dec!(0.002), dec!(0.009), dec!(0.01)],
            ],
        )
        .unwrap();
        let r = optimize(&cov, &MinimumVarianceSettings::default()).unwrap();
        let third = Decimal::ONE / dec!(3);
        let eq = portfolio_variance(&[third, third, third], cov.values());
        assert!(r.variance <= eq);
        assert!(r.weights.values().iter().all(|w| *w >= Decimal::ZERO));
    }

    #[test]
    fn test_short_selling_allows_negative_weights() {
        // Highly correlated pair: the minimum-variance hedge shorts the riskier asset.
        let cov = CovarianceMatrix::new(
            tickers(2),
            vec![vec![dec!(0.04), dec!(0.054)], vec![dec!(0.054), dec!(0.09)]],
        )
        .unwrap();
        let long_only = optimize(&cov, &MinimumVarianceSettings::default()).unwrap();
        assert_close(long_only.weights.values()[0], Decimal::ONE, dec!(0.000001));

        let short = optimize(
            &cov,
            &MinimumVarianceSettings {
                allow_short: true,
                ..Default::default()
            },
        )
        .unwrap();
        // w0 = (0.09 - 0.054) / (0.04 + 0.09 - 0.108) = 1.6364 > 1, clipped at upper bound 1
        assert_close(short.weights.values()[0], Decimal::ONE, dec!(0.000001));
        assert!(short.variance <= long_only.variance + dec!(0.0000000001));
    }

    #[test]
    fn test_short_selling_interior() {
        let cov = CovarianceMatrix::new(
            tickers(3),
            vec![
                vec![dec!(0.04), dec!(0.05), dec!(0.0)],
                vec![dec!(0.05), dec!(0.09), dec!(0.0)],
                vec![dec!(0.0), dec!(0.0), dec!(0.04)],
            ],
        )
        .unwrap();
        let r = optimize(
            &cov,
            &MinimumVarianceSettings {
                allow_short: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(r.weights.values()[1] < Decimal::ZERO);
        assert_close(r.weight_sum(), Decimal::ONE, dec!(0.000001));
    }

    #[test]
    fn test_identical_assets_singular() {
        let cov = CovarianceMatrix::new(
            tickers(2),
            vec![vec![dec!(0.0004), dec!(0.0004)], vec![dec!(0.0004), dec!(0.0004)]],
        )
        .unwrap();
        let err = optimize(&cov, &MinimumVarianceSettings::default()).unwrap_err();
        assert!(matches!(err, FolioError::Numerical { .. }));
    }

    #[test]
    fn test_single_asset_is_data_error() {
        let cov = diag_cov(&[dec!(0.04)]);
        let err = optimize(&cov, &MinimumVarianceSettings::default()).unwrap_err();
        assert!(matches!(err, FolioError::Data(_)));
    }

    #[test]
    fn test_run_wraps_envelope() {
        let input = MinimumVarianceInput {
            covariance: diag_cov(&[dec!(0.04), dec!(0.09)]),
            settings: MinimumVarianceSettings::default(),
        };
        let out = run_minimum_variance(&input).unwrap();
        assert!(out.methodology.contains("Minimum variance"));
        assert_eq!(out.result.risk_model, RiskModel::MinimumVariance);
    }
}
