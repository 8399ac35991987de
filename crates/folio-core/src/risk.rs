//! Risk calculator: covariance, downside deviation, drawdown and the
//! portfolio-level helpers shared by every optimizer and the report.

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::error::FolioError;
use crate::linalg::{dot, mat_vec_multiply, quad_form, sqrt_decimal};
use crate::types::ReturnModel;
use crate::FolioResult;

/// Portfolio volatility below this is treated as zero by ratio computations.
pub const MIN_VOLATILITY: Decimal = dec!(0.000000000001);

// ---------------------------------------------------------------------------
// Sample statistics
// ---------------------------------------------------------------------------

/// Column means of a row-major observation matrix (rows = periods).
pub fn column_means(rows: &[Vec<Decimal>]) -> FolioResult<Vec<Decimal>> {
    let width = check_rectangular(rows, 1)?;
    let count = Decimal::from(rows.len() as i64);
    Ok((0..width)
        .map(|j| rows.iter().map(|r| r[j]).sum::<Decimal>() / count)
        .collect())
}

/// Unbiased sample covariance (n-1 denominator) of a row-major observation
/// matrix. Needs at least two observations.
#[allow(clippy::needless_range_loop)]
pub fn covariance(rows: &[Vec<Decimal>]) -> FolioResult<Vec<Vec<Decimal>>> {
    let width = check_rectangular(rows, 2)?;
    let means = column_means(rows)?;
    let denom = Decimal::from((rows.len() - 1) as i64);

    let mut cov = vec![vec![Decimal::ZERO; width]; width];
    for i in 0..width {
        for j in i..width {
            let sum: Decimal = rows
                .iter()
                .map(|r| (r[i] - means[i]) * (r[j] - means[j]))
                .sum();
            let c = sum / denom;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    Ok(cov)
}

fn check_rectangular(rows: &[Vec<Decimal>], min_rows: usize) -> FolioResult<usize> {
    if rows.len() < min_rows {
        return Err(FolioError::Data(format!(
            "At least {} return observations required, got {}",
            min_rows,
            rows.len()
        )));
    }
    let width = rows[0].len();
    if let Some((i, _)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(FolioError::Data(format!(
            "Observation {} has {} values, expected {}",
            i,
            rows[i].len(),
            width
        )));
    }
    Ok(width)
}

/// Root mean square of the returns strictly below `target`; zero when none
/// are.
pub fn downside_deviation(returns: &[Decimal], target: Decimal) -> Decimal {
    let below: Vec<Decimal> = returns.iter().copied().filter(|r| *r < target).collect();
    if below.is_empty() {
        return Decimal::ZERO;
    }
    let sum_sq: Decimal = below.iter().map(|r| *r * *r).sum();
    sqrt_decimal(sum_sq / Decimal::from(below.len() as i64))
}

// ---------------------------------------------------------------------------
// Drawdown
// ---------------------------------------------------------------------------

/// Value index implied by a return series, starting at 1.
///
/// Simple returns accumulate additively (`1 + sum r`); log returns compound
/// multiplicatively (`prod e^r`). The output has one more element than the
/// input.
pub fn cumulative_series(returns: &[Decimal], model: ReturnModel) -> FolioResult<Vec<Decimal>> {
    let mut series = Vec::with_capacity(returns.len() + 1);
    series.push(Decimal::ONE);
    let mut running = Decimal::ZERO;
    for r in returns {
        running += *r;
        let value = match model {
            ReturnModel::Simple => Decimal::ONE + running,
            ReturnModel::Log => running.checked_exp().ok_or_else(|| {
                FolioError::numerical(
                    "cumulative_series",
                    format!("exp({}) overflows", running),
                )
            })?,
        };
        series.push(value);
    }
    Ok(series)
}

/// Largest peak-to-trough decline, `min((x_t - peak_t) / peak_t)`, as a
/// fraction in [-1, 0].
pub fn max_drawdown(values: &[Decimal]) -> FolioResult<Decimal> {
    let first = values
        .first()
        .ok_or_else(|| FolioError::Data("Max drawdown needs a non-empty series".into()))?;

    let mut peak = *first;
    let mut worst = Decimal::ZERO;
    for (t, x) in values.iter().enumerate() {
        if *x > peak {
            peak = *x;
        }
        if peak <= Decimal::ZERO {
            return Err(FolioError::Data(format!(
                "Running maximum {} at observation {} is not positive",
                peak, t
            )));
        }
        let dd = (*x - peak) / peak;
        if dd < worst {
            worst = dd;
        }
    }
    Ok(worst.max(Decimal::NEGATIVE_ONE))
}

// ---------------------------------------------------------------------------
// Portfolio helpers
// ---------------------------------------------------------------------------

/// wᵗμ
pub fn portfolio_return(weights: &[Decimal], mu: &[Decimal]) -> Decimal {
    dot(weights, mu)
}

/// wᵗΣw
pub fn portfolio_variance(weights: &[Decimal], cov: &[Vec<Decimal>]) -> Decimal {
    quad_form(weights, cov)
}

pub fn portfolio_volatility(weights: &[Decimal], cov: &[Vec<Decimal>]) -> Decimal {
    sqrt_decimal(portfolio_variance(weights, cov))
}

/// RC_i = w_i (Σw)_i / √(wᵗΣw). Contributions sum to the portfolio
/// volatility.
pub fn risk_contributions(weights: &[Decimal], cov: &[Vec<Decimal>]) -> FolioResult<Vec<Decimal>> {
    let marginal = mat_vec_multiply(cov, weights);
    let sigma = sqrt_decimal(dot(weights, &marginal));
    if sigma < MIN_VOLATILITY {
        return Err(FolioError::numerical(
            "risk_contributions",
            "Portfolio volatility is zero",
        ));
    }
    Ok(weights
        .iter()
        .zip(marginal.iter())
        .map(|(w, m)| *w * *m / sigma)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_close(a: Decimal, b: Decimal, tol: Decimal) {
        assert!((a - b).abs() < tol, "expected {} ~= {} (tol {})", a, b, tol);
    }

    // -----------------------------------------------------------------------
    // 1. Covariance
    // -----------------------------------------------------------------------

    #[test]
    fn test_covariance_two_assets() {
        let rows = vec![
            vec![dec!(0.01), dec!(0.02)],
            vec![dec!(0.03), dec!(0.00)],
            vec![dec!(0.02), dec!(0.01)],
        ];
        let cov = covariance(&rows).unwrap();
        // means 0.02, 0.01; deviations (-.01,.01),(.01,-.01),(0,0)
        assert_eq!(cov[0][0], dec!(0.0001));
        assert_eq!(cov[1][1], dec!(0.0001));
        assert_eq!(cov[0][1], dec!(-0.0001));
        assert_eq!(cov[1][0], cov[0][1]);
    }

    #[test]
    fn test_covariance_needs_two_rows() {
        let err = covariance(&[vec![dec!(0.01), dec!(0.02)]]).unwrap_err();
        assert!(matches!(err, FolioError::Data(_)));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let rows = vec![vec![dec!(0.01), dec!(0.02)], vec![dec!(0.03)]];
        assert!(covariance(&rows).is_err());
    }

    // -----------------------------------------------------------------------
    // 2. Downside deviation
    // -----------------------------------------------------------------------

    #[test]
    fn test_downside_deviation() {
        let r = vec![dec!(0.02), dec!(-0.03), dec!(0.01), dec!(-0.04)];
        // sqrt((0.0009 + 0.0016) / 2) = sqrt(0.00125)
        assert_close(downside_deviation(&r, Decimal::ZERO), dec!(0.0353553391), dec!(0.0000001));
    }

    #[test]
    fn test_downside_deviation_none_below() {
        let r = vec![dec!(0.02), dec!(0.0), dec!(0.01)];
        assert_eq!(downside_deviation(&r, Decimal::ZERO), Decimal::ZERO);
    }

    // -----------------------------------------------------------------------
    // 3. Cumulative series and drawdown
    // -----------------------------------------------------------------------

    #[test]
    fn test_cumulative_simple_is_additive() {
        let s = cumulative_series(&[dec!(0.1), dec!(-0.2), dec!(0.05)], ReturnModel::Simple).unwrap();
        assert_eq!(s, vec![dec!(1), dec!(1.1), dec!(0.9), dec!(0.95)]);
    }

    #[test]
    fn test_cumulative_log_is_multiplicative() {
        let s = cumulative_series(&[dec!(0.1), dec!(-0.1)], ReturnModel::Log).unwrap();
        assert_close(s[1], dec!(1.1051709181), dec!(0.0000001));
        assert_close(s[2], Decimal::ONE, dec!(0.0000001));
    }

    #[test]
    fn test_max_drawdown_basic() {
        let dd = max_drawdown(&[dec!(1), dec!(1.2), dec!(0.9), dec!(1.3), dec!(1.0)]).unwrap();
        // peak 1.2 -> 0.9 is -25%
        assert_eq!(dd, dec!(-0.25));
    }

    #[test]
    fn test_max_drawdown_monotone_is_zero() {
        assert_eq!(max_drawdown(&[dec!(1), dec!(1.1), dec!(1.2)]).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_max_drawdown_bounded_below() {
        // Additive compounding can fall below zero; the fraction stays >= -1.
        let s = cumulative_series(&[dec!(-0.7), dec!(-0.6)], ReturnModel::Simple).unwrap();
        let dd = max_drawdown(&s).unwrap();
        assert_eq!(dd, Decimal::NEGATIVE_ONE);
    }

    #[test]
    fn test_max_drawdown_empty() {
        let err = max_drawdown(&[]).unwrap_err();
        assert!(matches!(err, FolioError::Data(_)));
    }

    #[test]
    fn test_max_drawdown_non_positive_peak() {
        assert!(max_drawdown(&[dec!(0), dec!(-1)]).is_err());
    }

    // -----------------------------------------------------------------------
    // 4. Portfolio helpers
    // -----------------------------------------------------------------------

    #[test]
    fn test_risk_contributions_sum_to_volatility() {
        let cov = vec![
            vec![dec!(0.04), dec!(0.006)],
            vec![dec!(0.006), dec!(0.09)],
        ];
        let w = vec![dec!(0.6), dec!(0.4)];
        let rc = risk_contributions(&w, &cov).unwrap();
        let total: Decimal = rc.iter().sum();
        assert_close(total, portfolio_volatility(&w, &cov), dec!(0.0000000001));
    }

    #[test]
    fn test_risk_contributions_zero_volatility() {
        let cov = vec![vec![Decimal::ZERO; 2]; 2];
        let err = risk_contributions(&[dec!(0.5), dec!(0.5)], &cov).unwrap_err();
        assert!(matches!(err, FolioError::Numerical { .. }));
    }

    #[test]
    fn test_portfolio_return_and_variance() {
        let w = vec![dec!(0.5), dec!(0.5)];
        let mu = vec![dec!(0.001), dec!(0.003)];
        let cov = vec![
            vec![dec!(0.0004), dec!(0)],
            vec![dec!(0), dec!(0.0009)],
        ];
        assert_eq!(portfolio_return(&w, &mu), dec!(0.002));
        assert_eq!(portfolio_variance(&w, &cov), dec!(0.000325));
    }
}
