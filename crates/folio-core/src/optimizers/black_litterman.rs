use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::warn;

use crate::error::FolioError;
use crate::linalg::{diagonal_of, mat_add, mat_inverse, mat_multiply, mat_scale, mat_vec_multiply, transpose};
use crate::optimizers::{
    check_mean_and_covariance, covariance_inverse, return_variance_ratio, OptimizationResult, OptimizerMetric,
    RiskModel,
};
use crate::risk;
use crate::types::*;
use crate::FolioResult;

/// Below this |1ᵗΣ⁻¹μ| the weights cannot be normalized.
const MIN_WEIGHT_SUM: Decimal = dec!(0.000000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Investor views in matrix form: `p` (k x N) picks assets, `q` (k) holds the
/// view returns and `omega` (k x k) their uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpecification {
    pub p: Vec<Vec<Decimal>>,
    pub q: Vec<Decimal>,
    /// Defaults to diag(diag(P·τΣ·Pᵗ)).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omega: Option<Vec<Vec<Decimal>>>,
}

/// A view addressed by ticker rather than by pick-matrix row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TickerView {
    /// "`ticker` will return `expected_return`."
    Absolute { ticker: String, expected_return: Rate },
    /// "`long` will outperform `short` by `expected_return`."
    Relative {
        long: String,
        short: String,
        expected_return: Rate,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackLittermanInput {
    /// Prior (equilibrium) returns. Ignored when `market_weights` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equilibrium_returns: Option<LabeledVector>,
    /// Market-cap weights for implied equilibrium returns δΣw_mkt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_weights: Option<LabeledVector>,
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: Decimal,
    pub covariance: CovarianceMatrix,
    pub views: ViewSpecification,
    #[serde(default = "default_tau")]
    pub tau: Decimal,
}

pub fn default_tau() -> Decimal {
    dec!(0.05)
}

pub fn default_risk_aversion() -> Decimal {
    dec!(2.5)
}

/// Posterior returns and the portfolio built from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackLittermanOutput {
    pub prior_returns: LabeledVector,
    pub posterior_returns: LabeledVector,
    pub portfolio: OptimizationResult,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

impl ViewSpecification {
    /// Build P and Q from ticker-addressed views over `tickers`.
    pub fn from_views(
        tickers: &Tickers,
        views: &[TickerView],
        omega: Option<Vec<Vec<Decimal>>>,
    ) -> FolioResult<Self> {
        if views.is_empty() {
            return Err(FolioError::validation("views", "At least one view required"));
        }
        let n = tickers.len();
        let locate = |ticker: &str| {
            tickers.position(ticker).ok_or_else(|| {
                FolioError::validation("views", format!("Unknown ticker '{}' in view", ticker))
            })
        };

        let mut p = Vec::with_capacity(views.len());
        let mut q = Vec::with_capacity(views.len());
        for view in views {
            let mut row = vec![Decimal::ZERO; n];
            match view {
                TickerView::Absolute {
                    ticker,
                    expected_return,
                } => {
                    row[locate(ticker)?] = Decimal::ONE;
                    q.push(*expected_return);
                }
                TickerView::Relative {
                    long,
                    short,
                    expected_return,
                } => {
                    let (li, si) = (locate(long)?, locate(short)?);
                    if li == si {
                        return Err(FolioError::validation(
                            "views",
                            format!("Relative view compares '{}' with itself", long),
                        ));
                    }
                    row[li] = Decimal::ONE;
                    row[si] = Decimal::NEGATIVE_ONE;
                    q.push(*expected_return);
                }
            }
            p.push(row);
        }
        let spec = ViewSpecification { p, q, omega };
        spec.validate(n)?;
        Ok(spec)
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn validate(&self, n: usize) -> FolioResult<()> {
        let k = self.q.len();
        if k == 0 {
            return Err(FolioError::validation("views.q", "At least one view required"));
        }
        if self.p.len() != k {
            return Err(FolioError::validation(
                "views.p",
                format!("Pick matrix has {} rows but there are {} views", self.p.len(), k),
            ));
        }
        if let Some(i) = self.p.iter().position(|row| row.len() != n) {
            return Err(FolioError::validation(
                format!("views.p[{}]", i),
                format!("Expected {} columns (one per asset)", n),
            ));
        }
        if let Some(omega) = &self.omega {
            if omega.len() != k || omega.iter().any(|row| row.len() != k) {
                return Err(FolioError::validation(
                    "views.omega",
                    format!("Must be {}x{}", k, k),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Reverse optimization: π = δΣw_mkt.
pub fn implied_equilibrium_returns(
    cov: &CovarianceMatrix,
    market_weights: &LabeledVector,
    risk_aversion: Decimal,
) -> FolioResult<LabeledVector> {
    market_weights.ensure_aligned(cov.tickers(), "market_weights")?;
    if risk_aversion <= Decimal::ZERO {
        return Err(FolioError::validation("risk_aversion", "Must be positive"));
    }
    let sigma_w = mat_vec_multiply(cov.values(), market_weights.values());
    LabeledVector::new(
        cov.tickers().clone(),
        sigma_w.into_iter().map(|v| risk_aversion * v).collect(),
    )
}

/// Posterior returns μ_bl = μ_eq + τΣPᵗ(PτΣPᵗ + Ω)⁻¹(Q - Pμ_eq).
pub fn blend(
    prior: &LabeledVector,
    cov: &CovarianceMatrix,
    views: &ViewSpecification,
    tau: Decimal,
) -> FolioResult<LabeledVector> {
    check_mean_and_covariance(prior, cov)?;
    if tau <= Decimal::ZERO {
        return Err(FolioError::validation("tau", format!("Must be positive, got {}", tau)));
    }
    views.validate(cov.dim())?;

    // --- Step 1: τΣ and the view-space covariance PτΣPᵗ ---
    let tau_sigma = mat_scale(cov.values(), tau);
    let pt = transpose(&views.p);
    let tau_sigma_pt = mat_multiply(&tau_sigma, &pt);
    let view_cov = mat_multiply(&views.p, &tau_sigma_pt);

    // --- Step 2: Ω ---
    let omega = match &views.omega {
        Some(o) => o.clone(),
        None => diagonal_of(&view_cov),
    };

    // --- Step 3: (PτΣPᵗ + Ω)⁻¹ ---
    let blend_inv = mat_inverse(&mat_add(&view_cov, &omega), "Black-Litterman blend matrix")?;

    // --- Step 4: μ_eq + τΣPᵗ · (PτΣPᵗ + Ω)⁻¹ · (Q - Pμ_eq) ---
    let implied_views = mat_vec_multiply(&views.p, prior.values());
    let surprise: Vec<Decimal> = views
        .q
        .iter()
        .zip(implied_views.iter())
        .map(|(q, pm)| *q - *pm)
        .collect();
    let adjustment = mat_vec_multiply(&tau_sigma_pt, &mat_vec_multiply(&blend_inv, &surprise));

    LabeledVector::new(
        cov.tickers().clone(),
        prior
            .values()
            .iter()
            .zip(adjustment.iter())
            .map(|(m, a)| *m + *a)
            .collect(),
    )
}

/// Blend the views into the prior, then hold w = Σ⁻¹μ_bl / 1ᵗΣ⁻¹μ_bl.
///
/// Weights outside [0, 1] are kept as computed; each one produces a warning.
pub fn optimize(
    prior: &LabeledVector,
    cov: &CovarianceMatrix,
    views: &ViewSpecification,
    tau: Decimal,
) -> FolioResult<(BlackLittermanOutput, Vec<String>)> {
    let posterior = blend(prior, cov, views, tau)?;
    let inv = covariance_inverse(cov)?;

    let raw = mat_vec_multiply(&inv, posterior.values());
    let total: Decimal = raw.iter().sum();
    if total.abs() < MIN_WEIGHT_SUM {
        return Err(FolioError::numerical(
            "Black-Litterman weights",
            "Σ⁻¹μ_bl sums to zero and cannot be normalized",
        ));
    }
    let weights: Vec<Decimal> = raw.iter().map(|w| *w / total).collect();

    let bounds = WeightBounds::long_only();
    let mut warnings = Vec::new();
    for (ticker, w) in cov.tickers().iter().zip(weights.iter()) {
        if !bounds.contains(*w) {
            warn!(ticker = %ticker, weight = %w, "Black-Litterman weight outside [0, 1]");
            warnings.push(format!(
                "Weight for {} is {} (outside [0, 1]); not clipped",
                ticker,
                w.round_dp(6)
            ));
        }
    }

    let expected = risk::portfolio_return(&weights, posterior.values());
    let variance = risk::portfolio_variance(&weights, cov.values());
    let ratio = return_variance_ratio(expected, variance, "Black-Litterman")?;

    let portfolio = OptimizationResult::assemble(
        RiskModel::BlackLitterman,
        cov.tickers(),
        weights,
        Some(posterior.values()),
        cov,
        OptimizerMetric::ReturnVarianceRatio { ratio },
        0,
    )?;

    Ok((
        BlackLittermanOutput {
            prior_returns: prior.clone(),
            posterior_returns: posterior,
            portfolio,
        },
        warnings,
    ))
}

pub fn run_black_litterman(input: &BlackLittermanInput) -> FolioResult<ComputationOutput<BlackLittermanOutput>> {
    let start = Instant::now();

    let prior = match (&input.market_weights, &input.equilibrium_returns) {
        (Some(w), _) => implied_equilibrium_returns(&input.covariance, w, input.risk_aversion)?,
        (None, Some(mu)) => mu.clone(),
        (None, None) => {
            return Err(FolioError::validation(
                "equilibrium_returns",
                "Provide equilibrium_returns or market_weights",
            ))
        }
    };
    let (output, warnings) = optimize(&prior, &input.covariance, &input.views, input.tau)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Black-Litterman posterior returns with Σ⁻¹μ portfolio",
        &serde_json::json!({
            "tau": input.tau.to_string(),
            "views": input.views.len(),
            "omega": if input.views.omega.is_some() { "user" } else { "diag(P·τΣ·Pᵗ)" },
            "prior": if input.market_weights.is_some() { "implied equilibrium" } else { "given" },
        }),
        warnings,
        elapsed,
        output,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tickers(names: &[&str]) -> Tickers {
        Tickers::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn setup() -> (LabeledVector, CovarianceMatrix) {
        let t = tickers(&["AAA", "BBB", "CCC"]);
        let mu = LabeledVector::new(t.clone(), vec![dec!(0.0005), dec!(0.0008), dec!(0.0003)]).unwrap();
        let cov = CovarianceMatrix::new(
            t,
            vec![
                vec![dec!(0.0004), dec!(0.00006), dec!(0.00002)],
                vec![dec!(0.00006), dec!(0.0009), dec!(0.00009)],
                vec![dec!(0.00002), dec!(0.00009), dec!(0.0001)],
            ],
        )
        .unwrap();
        (mu, cov)
    }

    fn zeros(k: usize) -> Vec<Vec<Decimal>> {
        vec![vec![Decimal::ZERO; k]; k]
    }

    fn assert_close(a: Decimal, b: Decimal, tol: Decimal) {
        assert!((a - b).abs() < tol, "expected {} ~= {} (tol {})", a, b, tol);
    }

    #[test]
    fn test_certain_full_views_reproduce_q() {
        let (mu, cov) = setup();
        let q = vec![dec!(0.001), dec!(0.0002), dec!(0.0004)];
        let views = ViewSpecification {
            p: vec![
                vec![dec!(1), dec!(0), dec!(0)],
                vec![dec!(0), dec!(1), dec!(0)],
                vec![dec!(0), dec!(0), dec!(1)],
            ],
            q: q.clone(),
            omega: Some(zeros(3)),
        };
        let post = blend(&mu, &cov, &views, dec!(0.05)).unwrap();
        for (a, b) in post.values().iter().zip(q.iter()) {
            assert_close(*a, *b, dec!(0.0000000001));
        }
    }

    #[test]
    fn test_certain_single_view_pins_asset() {
        let (mu, cov) = setup();
        let t = cov.tickers().clone();
        let views = ViewSpecification::from_views(
            &t,
            &[TickerView::Absolute {
                ticker: "BBB".into(),
                expected_return: dec!(0.0012),
            }],
            Some(zeros(1)),
        )
        .unwrap();
        let post = blend(&mu, &cov, &views, dec!(0.05)).unwrap();
        assert_close(post.get("BBB").unwrap(), dec!(0.0012), dec!(0.0000000001));
        // Correlated assets move in the same direction as the surprise
        assert!(post.get("AAA").unwrap() > mu.get("AAA").unwrap());
    }

    #[test]
    fn test_default_omega_splits_the_difference() {
        // Ω = PτΣPᵗ for one absolute view: posterior is halfway to the view.
        let (mu, cov) = setup();
        let views = ViewSpecification::from_views(
            cov.tickers(),
            &[TickerView::Absolute {
                ticker: "AAA".into(),
                expected_return: dec!(0.0015),
            }],
            None,
        )
        .unwrap();
        let post = blend(&mu, &cov, &views, dec!(0.05)).unwrap();
        assert_close(post.get("AAA").unwrap(), dec!(0.001), dec!(0.0000000001));
    }

    #[test]
    fn test_relative_view_pick_row() {
        let (_, cov) = setup();
        let views = ViewSpecification::from_views(
            cov.tickers(),
            &[TickerView::Relative {
                long: "CCC".into(),
                short: "AAA".into(),
                expected_return: dec!(0.0002),
            }],
            None,
        )
        .unwrap();
        assert_eq!(views.p, vec![vec![dec!(-1), dec!(0), dec!(1)]]);
    }

    #[test]
    fn test_unknown_ticker_in_view() {
        let (_, cov) = setup();
        let err = ViewSpecification::from_views(
            cov.tickers(),
            &[TickerView::Absolute {
                ticker: "ZZZ".into(),
                expected_return: dec!(0.01),
            }],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, FolioError::Validation { .. }));
    }

    #[test]
    fn test_dimension_mismatch() {
        let (mu, cov) = setup();
        let views = ViewSpecification {
            p: vec![vec![dec!(1), dec!(0)]],
            q: vec![dec!(0.001)],
            omega: None,
        };
        let err = blend(&mu, &cov, &views, dec!(0.05)).unwrap_err();
        assert!(matches!(err, FolioError::Validation { .. }));
    }

    #[test]
    fn test_non_positive_tau() {
        let (mu, cov) = setup();
        let views = ViewSpecification {
            p: vec![vec![dec!(1), dec!(0), dec!(0)]],
            q: vec![dec!(0.001)],
            omega: None,
        };
        assert!(blend(&mu, &cov, &views, Decimal::ZERO).is_err());
    }

    #[test]
    fn test_singular_blend_matrix() {
        // Two identical certain views make PτΣPᵗ + Ω singular.
        let (mu, cov) = setup();
        let views = ViewSpecification {
            p: vec![vec![dec!(1), dec!(0), dec!(0)], vec![dec!(1), dec!(0), dec!(0)]],
            q: vec![dec!(0.001), dec!(0.001)],
            omega: Some(zeros(2)),
        };
        let err = blend(&mu, &cov, &views, dec!(0.05)).unwrap_err();
        assert!(matches!(err, FolioError::Numerical { .. }));
    }

    #[test]
    fn test_portfolio_weights_sum_to_one() {
        let (mu, cov) = setup();
        let views = ViewSpecification::from_views(
            cov.tickers(),
            &[TickerView::Absolute {
                ticker: "BBB".into(),
                expected_return: dec!(0.001),
            }],
            None,
        )
        .unwrap();
        let (out, _) = optimize(&mu, &cov, &views, dec!(0.05)).unwrap();
        assert_close(out.portfolio.weight_sum(), Decimal::ONE, dec!(0.000001));
        let OptimizerMetric::ReturnVarianceRatio { ratio } = out.portfolio.metric else {
            panic!("wrong metric");
        };
        assert_close(
            ratio,
            out.portfolio.expected_return.unwrap() / out.portfolio.variance,
            dec!(0.0000001),
        );
    }

    #[test]
    fn test_out_of_range_weights_warn_not_clip() {
        // A bearish view on AAA shorts it (about -0.41) and levers CCC (about 1.12).
        let (mu, cov) = setup();
        let views = ViewSpecification::from_views(
            cov.tickers(),
            &[TickerView::Absolute {
                ticker: "AAA".into(),
                expected_return: dec!(-0.001),
            }],
            None,
        )
        .unwrap();
        let (out, warnings) = optimize(&mu, &cov, &views, dec!(0.05)).unwrap();
        assert!(out.portfolio.weights.get("AAA").unwrap() < Decimal::ZERO);
        assert!(out.portfolio.weights.get("CCC").unwrap() > Decimal::ONE);
        assert_eq!(warnings.len(), 2);
        assert_close(out.portfolio.weight_sum(), Decimal::ONE, dec!(0.000001));
    }

    #[test]
    fn test_implied_equilibrium_returns() {
        let (_, cov) = setup();
        let w = LabeledVector::new(cov.tickers().clone(), vec![dec!(0.5), dec!(0.3), dec!(0.2)]).unwrap();
        let pi = implied_equilibrium_returns(&cov, &w, dec!(2.5)).unwrap();
        // 2.5 * (0.5*0.0004 + 0.3*0.00006 + 0.2*0.00002) = 2.5 * 0.000222
        assert_eq!(pi.values()[0], dec!(0.000555));
    }

    #[test]
    fn test_run_needs_prior() {
        let (_, cov) = setup();
        let input = BlackLittermanInput {
            equilibrium_returns: None,
            market_weights: None,
            risk_aversion: default_risk_aversion(),
            covariance: cov,
            views: ViewSpecification {
                p: vec![vec![dec!(1), dec!(0), dec!(0)]],
                q: vec![dec!(0.001)],
                omega: None,
            },
            tau: default_tau(),
        };
        assert!(matches!(
            run_black_litterman(&input).unwrap_err(),
            FolioError::Validation { .. }
        ));
    }
}
