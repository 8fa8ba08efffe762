use crate::backtester::{BatchOptimizer, BatchSummary};
use crate::config::EngineSettings;
use crate::data_context::MarketData;
use crate::result_sink::JsonFileSink;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `.csv` and `.bin` files of a directory, sorted by name.
pub fn discover_data_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = fs::read_dir(data_dir)
        .with_context(|| format!("Failed to read data directory {}", data_dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(false, |ext| {
                        ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("bin")
                    })
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

pub fn run(
    settings: &EngineSettings,
    data_dir: &Path,
    strategy: &str,
    output_dir: &Path,
) -> Result<BatchSummary> {
    let files = discover_data_files(data_dir)?;
    if files.is_empty() {
        return Err(anyhow!(
            "No .csv or .bin market data files found in {}",
            data_dir.display()
        ));
    }

    let mut instruments = Vec::with_capacity(files.len());
    for path in &files {
        match MarketData::load_from_file(path) {
            Ok(data) => instruments.push(data),
            Err(error) => warn!("Skipping {}: {:#}", path.display(), error),
        }
    }

    let sink = Arc::new(JsonFileSink::new(output_dir));
    let summary = BatchOptimizer::new(settings.clone(), strategy, sink).run(instruments)?;

    for outcome in &summary.outcomes {
        match (&outcome.error, outcome.best_value) {
            (Some(error), _) => info!("{}: failed ({})", outcome.symbol, error),
            (None, Some(best)) => info!("{}: best value {:.4}", outcome.symbol, best),
            (None, None) => info!("{}: no successful trial", outcome.symbol),
        }
    }
    Ok(summary)
}
