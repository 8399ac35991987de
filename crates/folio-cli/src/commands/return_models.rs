use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use folio_core::return_models::{self, CapmInput, EqualWeightedInput, FactorModelInput, HistoricalReturnsInput};

use crate::commands::load_input;

#[derive(Args)]
pub struct CapmArgs {
    /// {"prices": {...}, "asset": "AAPL", "benchmark": "SPY"}
    #[arg(long)]
    pub input: Option<String>,

    /// Annual risk-free rate in percent
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_pct: Option<Decimal>,

    /// Expected annual market return in percent
    #[arg(long, allow_hyphen_values = true)]
    pub market_return_pct: Option<Decimal>,
}

#[derive(Args)]
pub struct FactorModelArgs {
    /// {"prices": {...}, "ticker": "AAPL", "factors": [{"date": .., "Mkt-RF": .., "SMB": .., "HML": .., "RF": ..}]}
    #[arg(long)]
    pub input: Option<String>,

    /// Regress this ticker instead of the input's
    #[arg(long)]
    pub ticker: Option<String>,
}

#[derive(Args)]
pub struct EqualWeightedArgs {
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Args)]
pub struct HistoricalReturnsArgs {
    /// {"prices": {...}, "ticker": "AAPL", "return_model": "log"}
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_capm(args: CapmArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut capm_input: CapmInput = load_input(args.input.as_deref(), "CAPM")?;
    if let Some(rf) = args.risk_free_pct {
        capm_input.risk_free_pct = rf;
    }
    if let Some(market) = args.market_return_pct {
        capm_input.market_return_pct = market;
    }
    let result = return_models::run_capm(&capm_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_factor_model(args: FactorModelArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut fm_input: FactorModelInput = load_input(args.input.as_deref(), "factor model")?;
    if let Some(ticker) = args.ticker {
        fm_input.ticker = ticker;
    }
    let result = return_models::run_factor_model(&fm_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_equal_weighted(args: EqualWeightedArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let ew_input: EqualWeightedInput = load_input(args.input.as_deref(), "equal-weighted return")?;
    let result = return_models::run_equal_weighted(&ew_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_historical_returns(args: HistoricalReturnsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let hr_input: HistoricalReturnsInput = load_input(args.input.as_deref(), "historical returns")?;
    let result = return_models::run_historical_returns(&hr_input)?;
    Ok(serde_json::to_value(result)?)
}
