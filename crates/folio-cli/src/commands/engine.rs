use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use folio_core::config::EngineConfig;
use folio_core::engine::{self, EngineInput};
use folio_core::optimizers::RiskModel;
use folio_core::statistics::{self, DateWindow, StatisticsInput};
use folio_core::ReturnModel;

use crate::commands::load_input;
use crate::input;

#[derive(Args)]
pub struct OptimizeArgs {
    /// Prices and optional config: {"prices": {...}, "config": {...}}
    #[arg(long)]
    pub input: Option<String>,

    /// Engine configuration (JSON or YAML); replaces any `config` in the input
    #[arg(long)]
    pub config: Option<String>,

    /// mean-variance, minimum-variance, maximum-sharpe, risk-parity or black-litterman
    #[arg(long)]
    pub risk_model: Option<RiskModel>,

    /// Mean-variance risk tolerance
    #[arg(long)]
    pub tau: Option<Decimal>,

    /// simple or log
    #[arg(long)]
    pub return_model: Option<ReturnModel>,

    /// Annual risk-free rate (e.g. 0.02)
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_rate: Option<Decimal>,

    /// Periods per year
    #[arg(long)]
    pub annualization_factor: Option<Decimal>,

    /// Allow short selling for minimum variance
    #[arg(long)]
    pub allow_short: bool,

    /// First price date to use (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last price date to use (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Solver iteration cap
    #[arg(long)]
    pub max_iterations: Option<u32>,
}

#[derive(Args)]
pub struct StatsArgs {
    /// {"prices": {...}, "return_model": "simple", "window": {...}}
    #[arg(long)]
    pub input: Option<String>,

    /// simple or log
    #[arg(long)]
    pub return_model: Option<ReturnModel>,

    #[arg(long)]
    pub start: Option<NaiveDate>,

    #[arg(long)]
    pub end: Option<NaiveDate>,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let document: Value = load_input(args.input.as_deref(), "optimize")?;
    let mut engine_input = EngineInput::from_value(document)?;
    if let Some(ref path) = args.config {
        engine_input.config = EngineConfig::from_value(input::file::read_document(path)?)?;
    }
    apply_overrides(&mut engine_input.config, &args)?;

    let result = engine::run_engine(&engine_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_stats(args: StatsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut stats_input: StatisticsInput = load_input(args.input.as_deref(), "stats")?;
    if let Some(model) = args.return_model {
        stats_input.return_model = model;
    }
    if let Some(window) = window_from(args.start, args.end)? {
        stats_input.window = Some(window);
    }
    let result = statistics::run_statistics(&stats_input)?;
    Ok(serde_json::to_value(result)?)
}

/// Flags win over file values.
fn apply_overrides(config: &mut EngineConfig, args: &OptimizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(model) = args.risk_model {
        config.risk_model = model;
    }
    if let Some(tau) = args.tau {
        config.tau = tau;
    }
    if let Some(model) = args.return_model {
        config.return_model = model;
    }
    if let Some(rf) = args.risk_free_rate {
        config.risk_free_rate = rf;
    }
    if let Some(factor) = args.annualization_factor {
        config.annualization_factor = factor;
    }
    if args.allow_short {
        config.allow_short = true;
    }
    if let Some(window) = window_from(args.start, args.end)? {
        config.window = Some(window);
    }
    if let Some(n) = args.max_iterations {
        config.solver.max_iterations = n;
    }
    Ok(())
}

fn window_from(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Option<DateWindow>, Box<dyn std::error::Error>> {
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(DateWindow { start, end })),
        (None, None) => Ok(None),
        _ => Err("--start and --end must be given together".into()),
    }
}
