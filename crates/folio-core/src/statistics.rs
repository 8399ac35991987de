use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use crate::error::FolioError;
use crate::linalg::sqrt_decimal;
use crate::risk;
use crate::types::*;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One trading date with a closing price per ticker. `None` is accepted on
/// input and rejected when returns are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub prices: Vec<Option<Decimal>>,
}

/// Aligned price history for a ticker universe, oldest row first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub tickers: Tickers,
    pub rows: Vec<PriceRow>,
}

/// Inclusive date range applied to a price table before anything is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Period returns derived from a price table. Row `t` is dated by the later
/// of the two prices it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnTable {
    tickers: Tickers,
    model: ReturnModel,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<Decimal>>,
}

/// Sample statistics consumed by the optimizers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnStatistics {
    pub returns: ReturnTable,
    pub mean: LabeledVector,
    pub covariance: CovarianceMatrix,
}

/// Compact description of a statistics build, without the raw series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub tickers: Tickers,
    pub return_model: ReturnModel,
    pub observations: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub mean_returns: LabeledVector,
    /// Per-period standard deviation of each asset.
    pub volatilities: LabeledVector,
    pub covariance: CovarianceMatrix,
}

/// Input for [`run_statistics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsInput {
    pub prices: PriceTable,
    #[serde(default)]
    pub return_model: ReturnModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
}

// ---------------------------------------------------------------------------
// Price table
// ---------------------------------------------------------------------------

impl PriceTable {
    pub fn new(tickers: Tickers, rows: Vec<PriceRow>) -> FolioResult<Self> {
        let table = PriceTable { tickers, rows };
        table.validate()?;
        Ok(table)
    }

    /// Structural checks: row widths match the tickers and dates strictly
    /// increase.
    pub fn validate(&self) -> FolioResult<()> {
        let n = self.tickers.len();
        for (i, row) in self.rows.iter().enumerate() {
            if row.prices.len() != n {
                return Err(FolioError::validation(
                    format!("rows[{}].prices", i),
                    format!("Expected {} prices (one per ticker), got {}", n, row.prices.len()),
                ));
            }
        }
        for pair in self.rows.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(FolioError::Data(format!(
                    "Dates must be strictly increasing: {} follows {}",
                    pair[1].date, pair[0].date
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows dated within `[start, end]`.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> FolioResult<PriceTable> {
        if start >= end {
            return Err(FolioError::validation(
                "window",
                format!("Start date {} must be earlier than end date {}", start, end),
            ));
        }
        let rows: Vec<PriceRow> = self
            .rows
            .iter()
            .filter(|r| r.date >= start && r.date <= end)
            .cloned()
            .collect();
        if rows.is_empty() {
            return Err(FolioError::Data(format!(
                "No prices between {} and {}",
                start, end
            )));
        }
        Ok(PriceTable {
            tickers: self.tickers.clone(),
            rows,
        })
    }

    /// Sub-table holding only `names`, in the order given.
    pub fn select(&self, names: &[&str]) -> FolioResult<PriceTable> {
        self.validate()?;
        let columns: Vec<usize> = names
            .iter()
            .map(|name| {
                self.tickers.position(name).ok_or_else(|| {
                    FolioError::validation("tickers", format!("Unknown ticker '{}'", name))
                })
            })
            .collect::<FolioResult<_>>()?;
        let tickers = Tickers::new(names.iter().map(|s| s.to_string()).collect())?;
        let rows = self
            .rows
            .iter()
            .map(|r| PriceRow {
                date: r.date,
                prices: columns.iter().map(|&j| r.prices[j]).collect(),
            })
            .collect();
        Ok(PriceTable { tickers, rows })
    }

    /// Drops every row with at least one missing price.
    pub fn complete_rows(&self) -> PriceTable {
        PriceTable {
            tickers: self.tickers.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| r.prices.iter().all(Option::is_some))
                .cloned()
                .collect(),
        }
    }

    /// Period returns under `model`. Nulls and non-positive prices are data
    /// errors; the first row only serves as the base of the second.
    pub fn returns(&self, model: ReturnModel) -> FolioResult<ReturnTable> {
        self.validate()?;
        if self.rows.is_empty() {
            return Err(FolioError::Data("Price table is empty".into()));
        }
        let prices = self.checked_prices()?;

        let mut dates = Vec::with_capacity(prices.len().saturating_sub(1));
        let mut rows = Vec::with_capacity(prices.len().saturating_sub(1));
        for t in 1..prices.len() {
            let row: FolioResult<Vec<Decimal>> = prices[t]
                .iter()
                .zip(prices[t - 1].iter())
                .map(|(p, prev)| period_return(*p, *prev, model))
                .collect();
            rows.push(row?);
            dates.push(self.rows[t].date);
        }

        Ok(ReturnTable {
            tickers: self.tickers.clone(),
            model,
            dates,
            rows,
        })
    }

    fn checked_prices(&self) -> FolioResult<Vec<Vec<Decimal>>> {
        self.rows
            .iter()
            .map(|row| {
                row.prices
                    .iter()
                    .zip(self.tickers.iter())
                    .map(|(p, ticker)| match p {
                        None => Err(FolioError::Data(format!(
                            "Missing price for {} on {}",
                            ticker, row.date
                        ))),
                        Some(v) if *v <= Decimal::ZERO => Err(FolioError::Data(format!(
                            "Non-positive price {} for {} on {}",
                            v, ticker, row.date
                        ))),
                        Some(v) => Ok(*v),
                    })
                    .collect()
            })
            .collect()
    }
}

fn period_return(price: Decimal, previous: Decimal, model: ReturnModel) -> FolioResult<Decimal> {
    let ratio = price / previous;
    match model {
        ReturnModel::Simple => Ok(ratio - Decimal::ONE),
        ReturnModel::Log => ratio.checked_ln().ok_or_else(|| {
            FolioError::numerical("log return", format!("ln({}) is undefined", ratio))
        }),
    }
}

// ---------------------------------------------------------------------------
// Return table
// ---------------------------------------------------------------------------

impl ReturnTable {
    /// Build directly from return observations (rows = periods).
    pub fn new(
        tickers: Tickers,
        model: ReturnModel,
        dates: Vec<NaiveDate>,
        rows: Vec<Vec<Decimal>>,
    ) -> FolioResult<Self> {
        if dates.len() != rows.len() {
            return Err(FolioError::validation(
                "dates",
                format!("{} dates for {} return rows", dates.len(), rows.len()),
            ));
        }
        if let Some(i) = rows.iter().position(|r| r.len() != tickers.len()) {
            return Err(FolioError::validation(
                format!("rows[{}]", i),
                format!("Expected {} returns (one per ticker)", tickers.len()),
            ));
        }
        Ok(ReturnTable {
            tickers,
            model,
            dates,
            rows,
        })
    }

    pub fn tickers(&self) -> &Tickers {
        &self.tickers
    }

    pub fn model(&self) -> ReturnModel {
        self.model
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<Decimal>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The return series of one ticker.
    pub fn column(&self, ticker: &str) -> Option<Vec<Decimal>> {
        let j = self.tickers.position(ticker)?;
        Some(self.rows.iter().map(|r| r[j]).collect())
    }

    /// Row-wise w·r_t.
    pub fn portfolio_returns(&self, weights: &LabeledVector) -> FolioResult<Vec<Decimal>> {
        weights.ensure_aligned(&self.tickers, "weights")?;
        Ok(self
            .rows
            .iter()
            .map(|r| risk::portfolio_return(weights.values(), r))
            .collect())
    }

    /// Equal-weight portfolio series (cross-sectional mean of each row).
    pub fn row_means(&self) -> Vec<Decimal> {
        let n = Decimal::from(self.tickers.len() as i64);
        self.rows
            .iter()
            .map(|r| r.iter().copied().sum::<Decimal>() / n)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Derive returns, the mean vector and the sample covariance matrix.
pub fn build(prices: &PriceTable, model: ReturnModel) -> FolioResult<ReturnStatistics> {
    if prices.tickers.len() < 2 {
        return Err(FolioError::Data(format!(
            "At least 2 tickers required for a covariance matrix, got {}",
            prices.tickers.len()
        )));
    }
    let returns = prices.returns(model)?;
    from_returns(returns)
}

/// Statistics of an existing return table.
pub fn from_returns(returns: ReturnTable) -> FolioResult<ReturnStatistics> {
    if returns.len() < 2 {
        return Err(FolioError::Data(format!(
            "At least 2 return observations required, got {}",
            returns.len()
        )));
    }
    let tickers = returns.tickers.clone();
    let mean = LabeledVector::new(tickers.clone(), risk::column_means(&returns.rows)?)?;
    let covariance = CovarianceMatrix::new(tickers, risk::covariance(&returns.rows)?)?;

    info!(
        tickers = returns.tickers.len(),
        observations = returns.len(),
        model = %returns.model,
        "return statistics built"
    );

    Ok(ReturnStatistics {
        returns,
        mean,
        covariance,
    })
}

impl ReturnStatistics {
    pub fn tickers(&self) -> &Tickers {
        self.mean.tickers()
    }

    pub fn summary(&self) -> FolioResult<StatisticsSummary> {
        let dates = self.returns.dates();
        let (first_date, last_date) = match (dates.first(), dates.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Err(FolioError::Data("Return table has no dated rows".into())),
        };
        let vols = self
            .covariance
            .variances()
            .into_iter()
            .map(sqrt_decimal)
            .collect();
        Ok(StatisticsSummary {
            tickers: self.tickers().clone(),
            return_model: self.returns.model(),
            observations: self.returns.len(),
            first_date,
            last_date,
            mean_returns: self.mean.clone(),
            volatilities: LabeledVector::new(self.tickers().clone(), vols)?,
            covariance: self.covariance.clone(),
        })
    }
}

/// Windowed statistics build wrapped in the standard output envelope.
pub fn run_statistics(input: &StatisticsInput) -> FolioResult<ComputationOutput<StatisticsSummary>> {
    let start = Instant::now();

    let prices = match input.window {
        Some(w) => input.prices.window(w.start, w.end)?,
        None => input.prices.clone(),
    };
    let stats = build(&prices, input.return_model)?;
    let summary = stats.summary()?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Sample return statistics (column means, unbiased covariance)",
        &serde_json::json!({
            "return_model": input.return_model.to_string(),
            "observations": summary.observations,
            "window": input.window,
        }),
        Vec::new(),
        elapsed,
        summary,
    ))
}
