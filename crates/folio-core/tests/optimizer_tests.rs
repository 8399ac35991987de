use chrono::NaiveDate;
use folio_core::optimizers::black_litterman::{self, ViewSpecification};
use folio_core::optimizers::mean_variance::{self, MeanVarianceMethod, MeanVarianceSettings};
use folio_core::optimizers::min_variance::{self, MinimumVarianceSettings};
use folio_core::optimizers::{max_sharpe, risk_parity, OptimizationResult, OptimizerSettings};
use folio_core::risk;
use folio_core::statistics::{self, PriceRow, PriceTable};
use folio_core::{CovarianceMatrix, FolioError, LabeledVector, ReturnModel, Tickers};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn tickers(names: &[&str]) -> Tickers {
    Tickers::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
}

fn diag_cov(names: &[&str], diag: &[Decimal]) -> CovarianceMatrix {
    let n = diag.len();
    let m = (0..n)
        .map(|i| (0..n).map(|j| if i == j { diag[i] } else { Decimal::ZERO }).collect())
        .collect();
    CovarianceMatrix::new(tickers(names), m).unwrap()
}

fn assert_close(actual: Decimal, expected: Decimal, tol: Decimal) {
    assert!(
        (actual - expected).abs() < tol,
        "expected {} ~= {} (tol {})",
        actual,
        expected,
        tol
    );
}

fn assert_fully_invested(r: &OptimizationResult) {
    assert_close(r.weight_sum(), Decimal::ONE, dec!(0.000001));
}

/// A correlated three-asset universe shared by several properties.
fn universe() -> (LabeledVector, CovarianceMatrix) {
    let names = tickers(&["EQ", "BOND", "GOLD"]);
    let mean = LabeledVector::new(names.clone(), vec![dec!(0.0006), dec!(0.0002), dec!(0.0003)]).unwrap();
    let cov = CovarianceMatrix::new(
        names,
        vec![
            vec![dec!(0.00016), dec!(0.00002), dec!(0.00001)],
            vec![dec!(0.00002), dec!(0.00004), dec!(0.000005)],
            vec![dec!(0.00001), dec!(0.000005), dec!(0.00009)],
        ],
    )
    .unwrap();
    (mean, cov)
}

// ===========================================================================
// Budget constraint
// ===========================================================================

#[test]
fn test_all_optimizers_fully_invested() {
    let (mean, cov) = universe();
    let settings = OptimizerSettings::default();

    let mv = mean_variance::optimize(&mean, &cov, dec!(0.5), &MeanVarianceSettings::default()).unwrap();
    let minv = min_variance::optimize(&cov, &MinimumVarianceSettings::default()).unwrap();
    let ms = max_sharpe::optimize(&mean, &cov, Decimal::ZERO, &settings).unwrap();
    let rp = risk_parity::optimize(&cov, &settings).unwrap();

    for r in [&mv, &minv, &ms, &rp] {
        assert_fully_invested(r);
        assert!(r.weights.values().iter().all(|w| *w >= dec!(-0.0000001)));
    }
}

// ===========================================================================
// Minimum variance
// ===========================================================================

#[test]
fn test_min_variance_diagonal_oracle() {
    // w ∝ 1/σ²: [25, 11.11, 100] / 136.11
    let cov = diag_cov(&["A", "B", "C"], &[dec!(0.04), dec!(0.09), dec!(0.01)]);
    let r = min_variance::optimize(&cov, &MinimumVarianceSettings::default()).unwrap();
    let w = r.weights.values();
    assert_close(w[0], dec!(0.1837), dec!(0.0001));
    assert_close(w[1], dec!(0.0816), dec!(0.0001));
    assert_close(w[2], dec!(0.7347), dec!(0.0001));
}

#[test]
fn test_min_variance_beats_equal_weight() {
    let (_, cov) = universe();
    let r = min_variance::optimize(&cov, &MinimumVarianceSettings::default()).unwrap();
    let third = Decimal::ONE / dec!(3);
    let equal = risk::portfolio_variance(&[third; 3], cov.values());
    assert!(r.variance <= equal);
}

// ===========================================================================
// Mean-variance
// ===========================================================================

#[test]
fn test_mean_variance_two_asset_oracle() {
    let names = tickers(&["A", "B"]);
    let mean = LabeledVector::new(names.clone(), vec![dec!(0.001), dec!(0.002)]).unwrap();
    let cov = CovarianceMatrix::new(
        names,
        vec![vec![dec!(0.0004), dec!(0)], vec![dec!(0), dec!(0.0009)]],
    )
    .unwrap();
    let r = mean_variance::optimize(&mean, &cov, Decimal::ZERO, &MeanVarianceSettings::default()).unwrap();
    assert_close(r.weights.values()[0], dec!(0.6923), dec!(0.0001));
    assert_close(r.weights.values()[1], dec!(0.3077), dec!(0.0001));
}

#[test]
fn test_analytic_at_zero_tau_is_minimum_variance() {
    let (mean, cov) = universe();
    let settings = MeanVarianceSettings {
        method: MeanVarianceMethod::Analytic,
        ..Default::default()
    };
    let analytic = mean_variance::optimize(&mean, &cov, Decimal::ZERO, &settings).unwrap();
    let minv = min_variance::optimize(&cov, &MinimumVarianceSettings::default()).unwrap();
    for (a, m) in analytic.weights.values().iter().zip(minv.weights.values()) {
        assert_close(*a, *m, dec!(0.000001));
    }
}

// ===========================================================================
// Black-Litterman
// ===========================================================================

#[test]
fn test_black_litterman_certain_views_pin_returns() {
    let (prior, cov) = universe();
    let q = vec![dec!(0.001), dec!(0.0001), dec!(0.0004)];
    let tiny = dec!(0.000000000000000001);
    let views = ViewSpecification {
        p: vec![
            vec![dec!(1), dec!(0), dec!(0)],
            vec![dec!(0), dec!(1), dec!(0)],
            vec![dec!(0), dec!(0), dec!(1)],
        ],
        q: q.clone(),
        omega: Some(vec![
            vec![tiny, dec!(0), dec!(0)],
            vec![dec!(0), tiny, dec!(0)],
            vec![dec!(0), dec!(0), tiny],
        ]),
    };
    let posterior = black_litterman::blend(&prior, &cov, &views, dec!(0.05)).unwrap();
    for (mu, target) in posterior.values().iter().zip(q.iter()) {
        assert_close(*mu, *target, dec!(0.00000001));
    }
}

// ===========================================================================
// Risk parity
// ===========================================================================

#[test]
fn test_risk_parity_diagonal_oracle() {
    // w ∝ 1/σ: [5, 3.33, 10] / 18.33
    let cov = diag_cov(&["A", "B", "C"], &[dec!(0.04), dec!(0.09), dec!(0.01)]);
    let r = risk_parity::optimize(&cov, &OptimizerSettings::default()).unwrap();
    let w = r.weights.values();
    assert_close(w[0], dec!(0.2727), dec!(0.0001));
    assert_close(w[1], dec!(0.1818), dec!(0.0001));
    assert_close(w[2], dec!(0.5455), dec!(0.0001));
}

// ===========================================================================
// Drawdown range
// ===========================================================================

#[test]
fn test_max_drawdown_within_unit_interval() {
    let series = [
        vec![dec!(0.05), dec!(-0.30), dec!(0.10), dec!(-0.50)],
        vec![dec!(0.01), dec!(0.02)],
        vec![dec!(-0.99), dec!(-0.99)],
    ];
    for returns in series {
        for model in [ReturnModel::Simple, ReturnModel::Log] {
            let values = risk::cumulative_series(&returns, model).unwrap();
            let dd = risk::max_drawdown(&values).unwrap();
            assert!(dd <= Decimal::ZERO && dd >= Decimal::NEGATIVE_ONE, "drawdown {}", dd);
        }
    }
}

// ===========================================================================
// Singular covariance from duplicated assets
// ===========================================================================

fn duplicated_universe() -> (LabeledVector, CovarianceMatrix) {
    let closes = [
        [dec!(100), dec!(100), dec!(30)],
        [dec!(102), dec!(102), dec!(29.5)],
        [dec!(101), dec!(101), dec!(30.2)],
        [dec!(104), dec!(104), dec!(30.1)],
        [dec!(103), dec!(103), dec!(30.6)],
    ];
    let start = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
    let rows = closes
        .iter()
        .enumerate()
        .map(|(i, c)| PriceRow {
            date: start + chrono::Days::new(i as u64),
            prices: c.iter().map(|p| Some(*p)).collect(),
        })
        .collect();
    let prices = PriceTable::new(tickers(&["X", "X2", "Y"]), rows).unwrap();
    let stats = statistics::build(&prices, ReturnModel::Simple).unwrap();
    (stats.mean, stats.covariance)
}

fn assert_numerical<T: std::fmt::Debug>(r: Result<T, FolioError>) {
    let err = r.unwrap_err();
    assert!(matches!(err, FolioError::Numerical { .. }), "got {:?}", err);
}

#[test]
fn test_identical_assets_are_numerical_errors() {
    let (mean, cov) = duplicated_universe();
    let settings = OptimizerSettings::default();
    let analytic = MeanVarianceSettings {
        method: MeanVarianceMethod::Analytic,
        ..Default::default()
    };
    let views = ViewSpecification {
        p: vec![vec![dec!(1), dec!(0), dec!(0)]],
        q: vec![dec!(0.001)],
        omega: None,
    };

    assert_numerical(min_variance::optimize(&cov, &MinimumVarianceSettings::default()));
    assert_numerical(max_sharpe::optimize(&mean, &cov, Decimal::ZERO, &settings));
    assert_numerical(mean_variance::optimize(&mean, &cov, dec!(0.5), &MeanVarianceSettings::default()));
    assert_numerical(mean_variance::optimize(&mean, &cov, dec!(0.5), &analytic));
    assert_numerical(risk_parity::optimize(&cov, &settings));
    assert_numerical(black_litterman::optimize(&mean, &cov, &views, dec!(0.05)));
}
