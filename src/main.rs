use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use tradesim::commands::{backtest, export_market_data, optimize, optimize_batch};
use tradesim::config::EngineSettings;

const DEFAULT_OUTPUT_DIR: &str = "data/results";
const SETTING_KEYS: [&str; 10] = [
    "SPREAD_PERCENTAGE",
    "SLIPPAGE_PERCENTAGE",
    "INITIAL_CAPITAL",
    "OPTIMIZER_TRIALS",
    "OPTIMIZER_TIMEOUT_SECS",
    "OPTIMIZER_SEED",
    "OPTIMIZER_BATCH_SIZE",
    "OPTIMIZER_STARTUP_TRIALS",
    "OPTIMIZER_PRUNING",
    "OPTIMIZER_WORKERS",
];

#[derive(Parser)]
#[command(name = "tradesim")]
#[command(about = "Backtest and optimize rule-based trading strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest and print its results
    Backtest {
        /// Market data file (.csv or .bin snapshot)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Strategy preset name
        #[arg(long)]
        strategy: String,
        /// Parameter override as key=value (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Search strategy parameters for one instrument
    Optimize {
        /// Market data file (.csv or .bin snapshot)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Strategy preset name
        #[arg(long)]
        strategy: String,
        /// Number of trials
        #[arg(long)]
        trials: Option<usize>,
        /// Wall-clock budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Sampler seed
        #[arg(long)]
        seed: Option<u64>,
        /// Enable median pruning
        #[arg(long)]
        prune: bool,
        /// Directory for best_params_*.json
        #[arg(long = "output-dir", value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Optimize every instrument in a directory, one study each
    OptimizeBatch {
        /// Directory of market data files
        #[arg(long = "data-dir", value_name = "DIR")]
        data_dir: PathBuf,
        /// Strategy preset name
        #[arg(long)]
        strategy: String,
        /// Number of trials per instrument
        #[arg(long)]
        trials: Option<usize>,
        /// Worker threads
        #[arg(long)]
        workers: Option<usize>,
        /// Directory for best_params_*.json
        #[arg(long = "output-dir", value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Convert a CSV file into a binary market data snapshot
    ExportMarketData {
        /// Source CSV file
        #[arg(long = "input", value_name = "PATH")]
        input: PathBuf,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting tradesim. Not financial advice. Use at your own risk.");

    let mut settings_map = settings_from_env();
    apply_cli_overrides(&command, &mut settings_map);
    let settings = EngineSettings::from_settings_map(&settings_map)?;

    match command {
        Commands::Backtest {
            data_file,
            strategy,
            params,
        } => {
            backtest::run(&settings, &data_file, &strategy, &params)?;
        }
        Commands::Optimize {
            data_file,
            strategy,
            output_dir,
            ..
        } => {
            optimize::run(
                &settings,
                &data_file,
                &strategy,
                &resolve_output_dir(output_dir),
            )?;
        }
        Commands::OptimizeBatch {
            data_dir,
            strategy,
            output_dir,
            ..
        } => {
            optimize_batch::run(
                &settings,
                &data_dir,
                &strategy,
                &resolve_output_dir(output_dir),
            )?;
        }
        Commands::ExportMarketData { input, output } => {
            export_market_data::run(&input, &output)?;
        }
    }

    Ok(())
}

fn settings_from_env() -> HashMap<String, String> {
    SETTING_KEYS
        .iter()
        .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

fn apply_cli_overrides(command: &Commands, settings: &mut HashMap<String, String>) {
    match command {
        Commands::Optimize {
            trials,
            timeout,
            seed,
            prune,
            ..
        } => {
            if let Some(trials) = trials {
                settings.insert("OPTIMIZER_TRIALS".to_string(), trials.to_string());
            }
            if let Some(timeout) = timeout {
                settings.insert("OPTIMIZER_TIMEOUT_SECS".to_string(), timeout.to_string());
            }
            if let Some(seed) = seed {
                settings.insert("OPTIMIZER_SEED".to_string(), seed.to_string());
            }
            if *prune {
                settings.insert("OPTIMIZER_PRUNING".to_string(), "true".to_string());
            }
        }
        Commands::OptimizeBatch {
            trials, workers, ..
        } => {
            if let Some(trials) = trials {
                settings.insert("OPTIMIZER_TRIALS".to_string(), trials.to_string());
            }
            if let Some(workers) = workers {
                settings.insert("OPTIMIZER_WORKERS".to_string(), workers.to_string());
            }
        }
        Commands::Backtest { .. } | Commands::ExportMarketData { .. } => {}
    }
}

fn resolve_output_dir(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}
