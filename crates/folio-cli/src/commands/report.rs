use clap::Args;
use serde_json::Value;

use folio_core::report::{self, ReportInput};

use crate::commands::load_input;

#[derive(Args)]
pub struct ReportArgs {
    /// {"weights", "mean_returns", "covariance", "portfolio_returns", "settings"}
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_report(args: ReportArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let report_input: ReportInput = load_input(args.input.as_deref(), "report")?;
    let result = report::run_report(&report_input)?;
    Ok(serde_json::to_value(result)?)
}
