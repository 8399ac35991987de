//! End-to-end pipeline: prices -> statistics -> optimizer -> report.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use crate::config::{check_model_names, EngineConfig};
use crate::optimizers::black_litterman::{self, implied_equilibrium_returns};
use crate::optimizers::mean_variance::{self, MeanVarianceSettings};
use crate::optimizers::min_variance::{self, MinimumVarianceSettings};
use crate::optimizers::{max_sharpe, risk_parity, OptimizationResult, OptimizerSettings, RiskModel};
use crate::report::{self, PerformanceReport, ReportSettings};
use crate::statistics::{self, PriceTable, ReturnStatistics, StatisticsSummary};
use crate::types::*;
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInput {
    pub prices: PriceTable,
    #[serde(default)]
    pub config: EngineConfig,
}

impl EngineInput {
    /// Deserialize `{"prices": .., "config": ..}`, reporting unknown model
    /// names in the config as validation errors.
    pub fn from_value(value: serde_json::Value) -> FolioResult<Self> {
        if let Some(config) = value.get("config") {
            check_model_names(config)?;
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Posterior view of the universe when Black-Litterman ran.
#[derive(Debug, Clone, Serialize)]
pub struct PosteriorReturns {
    pub prior: LabeledVector,
    pub posterior: LabeledVector,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineOutcome {
    pub statistics: StatisticsSummary,
    pub optimization: OptimizationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black_litterman: Option<PosteriorReturns>,
    pub report: PerformanceReport,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run the configured optimizer over `prices` and report on the result.
pub fn run(prices: &PriceTable, config: &EngineConfig) -> FolioResult<EngineOutcome> {
    config.validate()?;

    // --- Step 1: window and statistics ---
    let prices = match config.window {
        Some(w) => prices.window(w.start, w.end)?,
        None => prices.clone(),
    };
    let stats = statistics::build(&prices, config.return_model)?;

    // --- Step 2: optimizer ---
    info!(risk_model = %config.risk_model, assets = stats.tickers().len(), "optimizer chosen");
    let mut warnings = Vec::new();
    let (optimization, black_litterman) = optimize(&stats, config, &mut warnings)?;

    // --- Step 3: realized portfolio series and report ---
    let portfolio_returns = stats.returns.portfolio_returns(&optimization.weights)?;
    let report_settings = ReportSettings {
        annualization_factor: config.annualization_factor,
        risk_free_rate: config.risk_free_rate,
        return_model: config.return_model,
    };
    let report = report::report(
        &optimization.weights,
        &stats.mean,
        &stats.covariance,
        &portfolio_returns,
        &report_settings,
    )?;

    Ok(EngineOutcome {
        statistics: stats.summary()?,
        optimization,
        black_litterman,
        report,
        warnings,
    })
}

pub fn run_engine(input: &EngineInput) -> FolioResult<ComputationOutput<EngineOutcome>> {
    let start = Instant::now();
    let mut outcome = run(&input.prices, &input.config)?;
    let warnings = std::mem::take(&mut outcome.warnings);

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        &format!("Portfolio optimization ({}) with performance report", input.config.risk_model),
        &input.config,
        warnings,
        elapsed,
        outcome,
    ))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn optimize(
    stats: &ReturnStatistics,
    config: &EngineConfig,
    warnings: &mut Vec<String>,
) -> FolioResult<(OptimizationResult, Option<PosteriorReturns>)> {
    let mean = &stats.mean;
    let cov = &stats.covariance;
    let shared = OptimizerSettings {
        bounds: config.bounds(),
        solver: config.solver,
    };

    let result = match config.risk_model {
        RiskModel::MeanVariance => {
            let settings = MeanVarianceSettings {
                method: config.mean_variance.method,
                sweep: config.mean_variance.sweep,
                bounds: shared.bounds,
                solver: shared.solver,
            };
            mean_variance::optimize(mean, cov, config.tau, &settings)?
        }
        RiskModel::MinimumVariance => {
            let settings = MinimumVarianceSettings {
                allow_short: config.allow_short,
                bounds: Some(config.minimum_variance_bounds()),
                solver: config.solver,
            };
            min_variance::optimize(cov, &settings)?
        }
        RiskModel::MaximumSharpe => {
            max_sharpe::optimize(mean, cov, config.periodic_risk_free_rate(), &shared)?
        }
        RiskModel::RiskParity => risk_parity::optimize(cov, &shared)?,
        RiskModel::BlackLitterman => {
            let Some(view_config) = &config.view_spec else {
                return Err(crate::FolioError::validation(
                    "view_spec",
                    "Required for the black-litterman risk model",
                ));
            };
            let views = view_config.resolve(stats.tickers())?;
            let prior = match &view_config.equilibrium {
                Some(eq) => {
                    let market = eq.market_weights(stats.tickers())?;
                    implied_equilibrium_returns(cov, &market, eq.risk_aversion)?
                }
                None => mean.clone(),
            };
            let (output, bl_warnings) = black_litterman::optimize(&prior, cov, &views, view_config.tau)?;
            warnings.extend(bl_warnings);
            return Ok((
                output.portfolio,
                Some(PosteriorReturns {
                    prior: output.prior_returns,
                    posterior: output.posterior_returns,
                }),
            ));
        }
    };
    Ok((result, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewConfig;
    use crate::error::FolioError;
    use crate::statistics::PriceRow;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn prices() -> PriceTable {
        let closes = [
            [dec!(100), dec!(50), dec!(20)],
            [dec!(101), dec!(50.5), dec!(20.1)],
            [dec!(100.5), dec!(51.5), dec!(20.05)],
            [dec!(102), dec!(51), dec!(20.2)],
            [dec!(103), dec!(52), dec!(20.1)],
            [dec!(102.5), dec!(53), dec!(20.3)],
        ];
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceRow {
                date: start + chrono::Days::new(i as u64),
                prices: c.iter().map(|p| Some(*p)).collect(),
            })
            .collect();
        let tickers = Tickers::new(vec!["AAA".into(), "BBB".into(), "CCC".into()]).unwrap();
        PriceTable::new(tickers, rows).unwrap()
    }

    fn assert_fully_invested(outcome: &EngineOutcome) {
        let sum = outcome.optimization.weight_sum();
        assert!((sum - Decimal::ONE).abs() < dec!(0.000001), "weights sum to {}", sum);
    }

    #[test]
    fn test_default_pipeline_is_mean_variance() {
        let outcome = run(&prices(), &EngineConfig::default()).unwrap();
        assert_eq!(outcome.optimization.risk_model, RiskModel::MeanVariance);
        assert_eq!(outcome.statistics.observations, 5);
        assert_fully_invested(&outcome);
        assert!(outcome.report.metrics.max_drawdown >= Decimal::ZERO);
    }

    #[test]
    fn test_every_model_dispatches() {
        for model in [
            RiskModel::MinimumVariance,
            RiskModel::MaximumSharpe,
            RiskModel::RiskParity,
        ] {
            let config = EngineConfig {
                risk_model: model,
                ..Default::default()
            };
            let outcome = run(&prices(), &config).unwrap();
            assert_eq!(outcome.optimization.risk_model, model);
            assert_fully_invested(&outcome);
        }
    }

    #[test]
    fn test_black_litterman_without_views() {
        let config = EngineConfig {
            risk_model: RiskModel::BlackLitterman,
            ..Default::default()
        };
        let err = run(&prices(), &config).unwrap_err();
        assert!(matches!(err, FolioError::Validation { .. }));
    }

    #[test]
    fn test_black_litterman_reports_posterior() {
        let config = EngineConfig {
            risk_model: RiskModel::BlackLitterman,
            view_spec: Some(ViewConfig {
                p: Some(vec![vec![dec!(1), dec!(0), dec!(0)]]),
                q: Some(vec![dec!(0.002)]),
                views: vec![],
                omega: None,
                tau: dec!(0.05),
                equilibrium: None,
            }),
            ..Default::default()
        };
        let outcome = run(&prices(), &config).unwrap();
        let bl = outcome.black_litterman.as_ref().unwrap();
        assert_eq!(bl.prior, outcome.statistics.mean_returns);
        assert_ne!(bl.posterior, bl.prior);
        assert_fully_invested(&outcome);
    }

    #[test]
    fn test_window_too_narrow_for_statistics() {
        let config = EngineConfig {
            window: Some(crate::statistics::DateWindow {
                start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            }),
            ..Default::default()
        };
        let err = run(&prices(), &config).unwrap_err();
        assert!(matches!(err, FolioError::Data(_)));
    }

    #[test]
    fn test_input_with_unknown_risk_model() {
        let doc = serde_json::json!({
            "prices": serde_json::to_value(prices()).unwrap(),
            "config": {"risk_model": "momentum"}
        });
        let err = EngineInput::from_value(doc).unwrap_err();
        assert!(matches!(err, FolioError::Validation { .. }));
    }

    #[test]
    fn test_input_without_config_uses_defaults() {
        let doc = serde_json::json!({"prices": serde_json::to_value(prices()).unwrap()});
        let input = EngineInput::from_value(doc).unwrap();
        assert_eq!(input.config, EngineConfig::default());
    }

    #[test]
    fn test_run_engine_envelope() {
        let out = run_engine(&EngineInput {
            prices: prices(),
            config: EngineConfig::default(),
        })
        .unwrap();
        assert!(out.methodology.contains("mean-variance"));
        assert_eq!(out.assumptions["tau"], "0.5");
        let json = serde_json::to_value(&out.result).unwrap();
        assert!(json["report"]["metrics"]["sharpeRatio"].is_number());
        assert!(json.get("warnings").is_none());
    }
}
