//! Expected-return estimators that sit beside the optimizers: CAPM, the
//! Fama-French three-factor regression, the equal-weighted benchmark and
//! plain historical return series.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

use crate::error::FolioError;
use crate::linalg::{mat_multiply, mat_vec_multiply, solve_linear, transpose};
use crate::risk;
use crate::statistics::{DateWindow, PriceTable, ReturnTable};
use crate::types::*;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapmEstimate {
    /// cov(asset, benchmark) / var(benchmark), 4 decimals.
    pub beta: Decimal,
    pub risk_free_pct: Decimal,
    pub market_return_pct: Decimal,
    /// rf + β(market − rf), 2 decimals.
    pub expected_return_pct: Decimal,
    pub observations: usize,
}

/// Intercept plus three factor loadings; (const, Mkt-RF, SMB, HML).
const FACTOR_PARAMETERS: usize = 4;
const FACTOR_MIN_OBSERVATIONS: usize = FACTOR_PARAMETERS + 1;

/// OLS fit of excess return on Mkt-RF, SMB and HML. Everything 4 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorModelEstimate {
    pub alpha: Decimal,
    pub beta_mkt_rf: Decimal,
    pub beta_smb: Decimal,
    pub beta_hml: Decimal,
    pub r_squared: Decimal,
    pub observations: usize,
}

/// Factor returns aligned with an asset return series, percent per period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSeries {
    pub mkt_rf: Vec<Decimal>,
    pub smb: Vec<Decimal>,
    pub hml: Vec<Decimal>,
    pub rf: Vec<Decimal>,
}

/// One dated row of Fama-French factor data. Accepts the library's column
/// names (`Mkt-RF`, `SMB`, `HML`, `RF`) as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorObservation {
    pub date: NaiveDate,
    #[serde(alias = "Mkt-RF")]
    pub mkt_rf: Decimal,
    #[serde(alias = "SMB")]
    pub smb: Decimal,
    #[serde(alias = "HML")]
    pub hml: Decimal,
    #[serde(alias = "RF")]
    pub rf: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedReturn {
    pub date: NaiveDate,
    #[serde(rename = "return")]
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualWeightedReturn {
    pub tickers: Tickers,
    /// (Π(1 + r_t) − 1) × 100, 2 decimals.
    pub cumulative_return_pct: Decimal,
    pub daily_returns: Vec<DatedReturn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapmInput {
    pub prices: PriceTable,
    pub asset: String,
    pub benchmark: String,
    #[serde(default = "default_risk_free_pct")]
    pub risk_free_pct: Decimal,
    #[serde(default = "default_market_return_pct")]
    pub market_return_pct: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorModelInput {
    pub prices: PriceTable,
    /// May be left out of the document when supplied on the command line.
    #[serde(default)]
    pub ticker: String,
    /// Same periodicity as the prices; joined on date.
    pub factors: Vec<FactorObservation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqualWeightedInput {
    pub prices: PriceTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalReturnsInput {
    pub prices: PriceTable,
    pub ticker: String,
    #[serde(default = "default_historical_model")]
    pub return_model: ReturnModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
}

pub fn default_risk_free_pct() -> Decimal {
    dec!(2.0)
}

pub fn default_market_return_pct() -> Decimal {
    dec!(8.0)
}

fn default_historical_model() -> ReturnModel {
    ReturnModel::Log
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// CAPM expected return from aligned asset and benchmark return series.
/// Percent inputs and outputs.
pub fn capm_expected_return(
    asset_returns: &[Decimal],
    benchmark_returns: &[Decimal],
    risk_free_pct: Decimal,
    market_return_pct: Decimal,
) -> FolioResult<CapmEstimate> {
    if asset_returns.len() != benchmark_returns.len() {
        return Err(FolioError::Data(format!(
            "Asset has {} returns but benchmark has {}",
            asset_returns.len(),
            benchmark_returns.len()
        )));
    }
    if asset_returns.len() < 2 {
        return Err(FolioError::Data(format!(
            "At least 2 overlapping returns required, got {}",
            asset_returns.len()
        )));
    }

    let rows: Vec<Vec<Decimal>> = asset_returns
        .iter()
        .zip(benchmark_returns.iter())
        .map(|(a, b)| vec![*a, *b])
        .collect();
    let cov = risk::covariance(&rows)?;
    let benchmark_var = cov[1][1];
    if benchmark_var.is_zero() {
        return Err(FolioError::numerical(
            "CAPM beta",
            "Benchmark returns have zero variance",
        ));
    }
    let beta = cov[0][1] / benchmark_var;
    let expected = risk_free_pct + beta * (market_return_pct - risk_free_pct);

    Ok(CapmEstimate {
        beta: beta.round_dp(4),
        risk_free_pct: risk_free_pct.round_dp(2),
        market_return_pct: market_return_pct.round_dp(2),
        expected_return_pct: expected.round_dp(2),
        observations: asset_returns.len(),
    })
}

/// Fama-French three-factor regression of `asset_returns - rf` on
/// Mkt-RF, SMB and HML with an intercept. Percent inputs.
pub fn factor_model_return(asset_returns: &[Decimal], factors: &FactorSeries) -> FolioResult<FactorModelEstimate> {
    let n = asset_returns.len();
    for (name, series) in [
        ("mkt_rf", &factors.mkt_rf),
        ("smb", &factors.smb),
        ("hml", &factors.hml),
        ("rf", &factors.rf),
    ] {
        if series.len() != n {
            return Err(FolioError::Data(format!(
                "Asset has {} returns but factor '{}' has {}",
                n,
                name,
                series.len()
            )));
        }
    }
    if n < FACTOR_MIN_OBSERVATIONS {
        return Err(FolioError::Data(format!(
            "At least {} observations required for the factor regression, got {}",
            FACTOR_MIN_OBSERVATIONS, n
        )));
    }

    // --- Step 1: design matrix [1, Mkt-RF, SMB, HML] and excess returns ---
    let x: Vec<Vec<Decimal>> = (0..n)
        .map(|t| vec![Decimal::ONE, factors.mkt_rf[t], factors.smb[t], factors.hml[t]])
        .collect();
    let y: Vec<Decimal> = asset_returns
        .iter()
        .zip(&factors.rf)
        .map(|(r, rf)| *r - *rf)
        .collect();

    // --- Step 2: normal equations X'X b = X'y ---
    let xt = transpose(&x);
    let xtx = mat_multiply(&xt, &x);
    let xty = mat_vec_multiply(&xt, &y);
    let b = solve_linear(&xtx, &xty, "factor model normal equations")?;

    // --- Step 3: goodness of fit ---
    let y_mean = y.iter().copied().sum::<Decimal>() / Decimal::from(n as i64);
    let (ss_res, ss_tot) = x.iter().zip(&y).fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(res, tot), (row, yi)| {
            let fitted: Decimal = row.iter().zip(&b).map(|(xi, bi)| *xi * *bi).sum();
            let e = *yi - fitted;
            let d = *yi - y_mean;
            (res + e * e, tot + d * d)
        },
    );
    let r_squared = if ss_tot.is_zero() {
        Decimal::ONE
    } else {
        Decimal::ONE - ss_res / ss_tot
    };

    Ok(FactorModelEstimate {
        alpha: b[0].round_dp(4),
        beta_mkt_rf: b[1].round_dp(4),
        beta_smb: b[2].round_dp(4),
        beta_hml: b[3].round_dp(4),
        r_squared: r_squared.round_dp(4),
        observations: n,
    })
}

/// Equal-weight portfolio of every ticker in `returns`.
pub fn equal_weighted_return(returns: &ReturnTable) -> FolioResult<EqualWeightedReturn> {
    if returns.tickers().len() < 2 {
        return Err(FolioError::validation(
            "tickers",
            "Provide at least two tickers",
        ));
    }
    if returns.is_empty() {
        return Err(FolioError::Data("No return observations".into()));
    }

    let series = returns.row_means();
    let growth = series
        .iter()
        .fold(Decimal::ONE, |acc, r| acc * (Decimal::ONE + *r));
    let daily_returns = returns
        .dates()
        .iter()
        .zip(series.iter())
        .map(|(date, r)| DatedReturn {
            date: *date,
            value: r.round_dp(6),
        })
        .collect();

    Ok(EqualWeightedReturn {
        tickers: returns.tickers().clone(),
        cumulative_return_pct: ((growth - Decimal::ONE) * dec!(100)).round_dp(2),
        daily_returns,
    })
}

/// Return series of one ticker, skipping dates where its price is missing.
pub fn historical_returns(
    prices: &PriceTable,
    ticker: &str,
    model: ReturnModel,
) -> FolioResult<Vec<DatedReturn>> {
    let table = prices.select(&[ticker])?.complete_rows().returns(model)?;
    let column = table.column(ticker).unwrap_or_default();
    Ok(table
        .dates()
        .iter()
        .zip(column)
        .map(|(date, r)| DatedReturn {
            date: *date,
            value: r.round_dp(6),
        })
        .collect())
}

pub fn run_capm(input: &CapmInput) -> FolioResult<ComputationOutput<CapmEstimate>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let prices = windowed(&input.prices, input.window)?;
    // Inner join on dates where both series have a price.
    let joined = prices
        .select(&[input.asset.as_str(), input.benchmark.as_str()])?
        .complete_rows();
    let returns = joined.returns(ReturnModel::Simple)?;
    let asset = returns.column(&input.asset).unwrap_or_default();
    let benchmark = returns.column(&input.benchmark).unwrap_or_default();

    let dropped = prices.len() - joined.len();
    if dropped > 0 {
        warnings.push(format!(
            "{} dates without both prices were excluded",
            dropped
        ));
    }

    let result = capm_expected_return(
        &asset,
        &benchmark,
        input.risk_free_pct,
        input.market_return_pct,
    )?;
    info!(asset = %input.asset, beta = %result.beta, "CAPM estimate computed");

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "CAPM expected return (beta from simple daily returns)",
        &serde_json::json!({
            "asset": input.asset,
            "benchmark": input.benchmark,
            "risk_free_pct": input.risk_free_pct.to_string(),
            "market_return_pct": input.market_return_pct.to_string(),
            "window": input.window,
        }),
        warnings,
        elapsed,
        result,
    ))
}

pub fn run_equal_weighted(input: &EqualWeightedInput) -> FolioResult<ComputationOutput<EqualWeightedReturn>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if input.prices.tickers.len() < 2 {
        return Err(FolioError::validation(
            "tickers",
            "Provide at least two tickers",
        ));
    }
    let prices = windowed(&input.prices, input.window)?;
    let complete = prices.complete_rows();
    if complete.len() < prices.len() {
        warnings.push(format!(
            "{} dates with missing prices were excluded",
            prices.len() - complete.len()
        ));
    }
    let returns = complete.returns(ReturnModel::Simple)?;
    let result = equal_weighted_return(&returns)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Equal-weighted portfolio return (daily rebalanced)",
        &serde_json::json!({
            "tickers": input.prices.tickers.len(),
            "window": input.window,
        }),
        warnings,
        elapsed,
        result,
    ))
}

pub fn run_historical_returns(input: &HistoricalReturnsInput) -> FolioResult<ComputationOutput<Vec<DatedReturn>>> {
    let start = Instant::now();
    let prices = windowed(&input.prices, input.window)?;
    let result = historical_returns(&prices, &input.ticker, input.return_model)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Historical period returns",
        &serde_json::json!({
            "ticker": input.ticker,
            "return_model": input.return_model.to_string(),
            "window": input.window,
        }),
        Vec::new(),
        elapsed,
        result,
    ))
}

pub fn run_factor_model(input: &FactorModelInput) -> FolioResult<ComputationOutput<FactorModelEstimate>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let mut by_date: HashMap<NaiveDate, &FactorObservation> = HashMap::with_capacity(input.factors.len());
    for obs in &input.factors {
        if by_date.insert(obs.date, obs).is_some() {
            return Err(FolioError::validation(
                "factors",
                format!("Duplicate factor row for {}", obs.date),
            ));
        }
    }

    // Simple percent returns inner-joined with the factor rows.
    let prices = windowed(&input.prices, input.window)?;
    let returns = prices
        .select(&[input.ticker.as_str()])?
        .complete_rows()
        .returns(ReturnModel::Simple)?;
    let column = returns.column(&input.ticker).unwrap_or_default();
    let mut asset = Vec::with_capacity(column.len());
    let mut factors = FactorSeries {
        mkt_rf: Vec::new(),
        smb: Vec::new(),
        hml: Vec::new(),
        rf: Vec::new(),
    };
    for (date, r) in returns.dates().iter().zip(column) {
        if let Some(obs) = by_date.get(date) {
            asset.push(r * dec!(100));
            factors.mkt_rf.push(obs.mkt_rf);
            factors.smb.push(obs.smb);
            factors.hml.push(obs.hml);
            factors.rf.push(obs.rf);
        }
    }
    let unmatched = returns.len() - asset.len();
    if unmatched > 0 {
        warnings.push(format!(
            "{} return dates without factor data were excluded",
            unmatched
        ));
    }

    let result = factor_model_return(&asset, &factors)?;
    info!(
        ticker = %input.ticker,
        beta_mkt_rf = %result.beta_mkt_rf,
        r_squared = %result.r_squared,
        "factor model fitted"
    );

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Fama-French three-factor OLS regression on percent excess returns",
        &serde_json::json!({
            "ticker": input.ticker,
            "factor_rows": input.factors.len(),
            "window": input.window,
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn windowed(prices: &PriceTable, window: Option<DateWindow>) -> FolioResult<PriceTable> {
    match window {
        Some(w) => prices.window(w.start, w.end),
        None => Ok(prices.clone()),
    }
}
