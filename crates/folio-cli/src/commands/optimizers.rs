use clap::Args;
use serde_json::Value;

use folio_core::optimizers::black_litterman::{self, BlackLittermanInput};
use folio_core::optimizers::max_sharpe::{self, MaximumSharpeInput};
use folio_core::optimizers::mean_variance::{self, MeanVarianceInput};
use folio_core::optimizers::min_variance::{self, MinimumVarianceInput};
use folio_core::optimizers::risk_parity::{self, RiskParityInput};

use crate::commands::load_input;

#[derive(Args)]
pub struct MinVarianceArgs {
    /// {"covariance": {...}, "settings": {...}}
    #[arg(long)]
    pub input: Option<String>,

    /// Widen the default bounds to [-1, 1]
    #[arg(long)]
    pub allow_short: bool,
}

#[derive(Args)]
pub struct MaxSharpeArgs {
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Args)]
pub struct MeanVarianceArgs {
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Args)]
pub struct BlackLittermanArgs {
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Args)]
pub struct RiskParityArgs {
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_min_variance(args: MinVarianceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut mv_input: MinimumVarianceInput = load_input(args.input.as_deref(), "minimum variance")?;
    if args.allow_short {
        mv_input.settings.allow_short = true;
    }
    let result = min_variance::run_minimum_variance(&mv_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_max_sharpe(args: MaxSharpeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let ms_input: MaximumSharpeInput = load_input(args.input.as_deref(), "maximum Sharpe")?;
    let result = max_sharpe::run_maximum_sharpe(&ms_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_mean_variance(args: MeanVarianceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mv_input: MeanVarianceInput = load_input(args.input.as_deref(), "mean-variance")?;
    let result = mean_variance::run_mean_variance(&mv_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_black_litterman(args: BlackLittermanArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let bl_input: BlackLittermanInput = load_input(args.input.as_deref(), "Black-Litterman")?;
    let result = black_litterman::run_black_litterman(&bl_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_risk_parity(args: RiskParityArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let rp_input: RiskParityInput = load_input(args.input.as_deref(), "risk parity")?;
    let result = risk_parity::run_risk_parity(&rp_input)?;
    Ok(serde_json::to_value(result)?)
}
