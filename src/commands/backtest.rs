use crate::config::EngineSettings;
use crate::data_context::MarketData;
use crate::models::{format_parameter_value, parse_parameter_assignment, Parameters, RunResult};
use crate::optimizer::{penalized_profit, BacktestObjective};
use crate::signals::create_signal_provider;
use anyhow::{anyhow, Context, Result};
use log::info;
use serde_json::json;
use std::path::Path;

pub fn parse_assignments(raw: &[String]) -> Result<Parameters> {
    raw.iter()
        .map(|assignment| {
            parse_parameter_assignment(assignment)
                .ok_or_else(|| anyhow!("Invalid parameter assignment {} (expected key=value)", assignment))
        })
        .collect()
}

pub fn run(
    settings: &EngineSettings,
    data_file: &Path,
    strategy: &str,
    assignments: &[String],
) -> Result<RunResult> {
    let parameters = parse_assignments(assignments)?;
    let data = MarketData::load_from_file(data_file)?;
    let provider = create_signal_provider(strategy)?;
    let objective = BacktestObjective::new(data.bars().to_vec(), provider, settings);
    let result = objective
        .run(&parameters)
        .with_context(|| format!("Backtest of {} on {} failed", strategy, data.symbol()))?;

    let params_str = parameters
        .iter()
        .map(|(k, v)| format!("{}: {}", k, format_parameter_value(*v)))
        .collect::<Vec<String>>()
        .join(", ");
    info!(
        "Backtest {} on {}: P&L {:.4}, final capital {:.4}, {} trades ({} long / {} short), win rate {:.2}%, {} sizing, Params: [{}]",
        strategy,
        data.symbol(),
        result.total_profit_loss,
        result.final_capital,
        result.total_trades,
        result.num_long_trades,
        result.num_short_trades,
        result.win_rate * 100.0,
        result.sizing_mode.as_str(),
        params_str
    );

    println!("OPTIMIZER_RESULTS:{}", results_line(&result, &parameters, strategy, data_file));
    Ok(result)
}

/// Machine-readable summary consumed by external optimizers.
pub fn results_line(
    result: &RunResult,
    parameters: &Parameters,
    strategy: &str,
    data_file: &Path,
) -> serde_json::Value {
    json!({
        "total_profit_loss": result.total_profit_loss,
        "final_capital": result.final_capital,
        "total_trades": result.total_trades,
        "winning_trades": result.winning_trades,
        "losing_trades": result.losing_trades,
        "win_rate": result.win_rate,
        "long_profit": result.long_profit,
        "short_profit": result.short_profit,
        "num_long_trades": result.num_long_trades,
        "num_short_trades": result.num_short_trades,
        "sizing_mode": result.sizing_mode.as_str(),
        "objective": penalized_profit(result),
        "strategy": strategy,
        "parameters": parameters,
        "source": data_file.display().to_string(),
    })
}
