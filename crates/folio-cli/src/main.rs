mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use folio_core::FolioError;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::engine::{OptimizeArgs, StatsArgs};
use commands::optimizers::{
    BlackLittermanArgs, MaxSharpeArgs, MeanVarianceArgs, MinVarianceArgs, RiskParityArgs,
};
use commands::report::ReportArgs;
use commands::return_models::{CapmArgs, EqualWeightedArgs, FactorModelArgs, HistoricalReturnsArgs};

/// Portfolio optimization with decimal precision
#[derive(Parser)]
#[command(
    name = "folio",
    version,
    about = "Portfolio optimization with decimal precision",
    long_about = "A CLI for allocating across a set of assets from their price history. \
                  Supports mean-variance, minimum variance, maximum Sharpe, risk parity \
                  and Black-Litterman, with an annualized performance report."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: statistics, the configured optimizer and the report
    Optimize(OptimizeArgs),
    /// Return statistics (mean vector and covariance) from prices
    Stats(StatsArgs),
    /// Minimum-variance portfolio from a covariance matrix
    MinVariance(MinVarianceArgs),
    /// Maximum Sharpe ratio portfolio
    MaxSharpe(MaxSharpeArgs),
    /// Mean-variance utility portfolio for a risk tolerance tau
    MeanVariance(MeanVarianceArgs),
    /// Black-Litterman posterior returns and portfolio
    BlackLitterman(BlackLittermanArgs),
    /// Equal risk contribution portfolio
    RiskParity(RiskParityArgs),
    /// Annualized performance report for a weight vector
    Report(ReportArgs),
    /// CAPM expected return of one ticker against a benchmark
    Capm(CapmArgs),
    /// Fama-French three-factor regression of one ticker
    FactorModel(FactorModelArgs),
    /// Equal-weighted portfolio return
    EqualWeighted(EqualWeightedArgs),
    /// Historical period returns of one ticker
    Returns(HistoricalReturnsArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// 2 for bad input (files, JSON, validation, data), 1 for numerical or
/// convergence failures.
fn exit_code(err: &(dyn std::error::Error + 'static)) -> i32 {
    match err.downcast_ref::<FolioError>() {
        Some(e) if !e.is_input_error() => 1,
        _ => 2,
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Optimize(args) => commands::engine::run_optimize(args),
        Commands::Stats(args) => commands::engine::run_stats(args),
        Commands::MinVariance(args) => commands::optimizers::run_min_variance(args),
        Commands::MaxSharpe(args) => commands::optimizers::run_max_sharpe(args),
        Commands::MeanVariance(args) => commands::optimizers::run_mean_variance(args),
        Commands::BlackLitterman(args) => commands::optimizers::run_black_litterman(args),
        Commands::RiskParity(args) => commands::optimizers::run_risk_parity(args),
        Commands::Report(args) => commands::report::run_report(args),
        Commands::Capm(args) => commands::return_models::run_capm(args),
        Commands::FactorModel(args) => commands::return_models::run_factor_model(args),
        Commands::EqualWeighted(args) => commands::return_models::run_equal_weighted(args),
        Commands::Returns(args) => commands::return_models::run_historical_returns(args),
        Commands::Version => {
            println!("folio {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(exit_code(e.as_ref()));
        }
    }
}
