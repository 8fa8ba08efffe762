use crate::backtester::optimize_instrument;
use crate::cache::ResultCache;
use crate::config::EngineSettings;
use crate::data_context::MarketData;
use crate::optimizer::{Study, TrialState};
use crate::result_sink::{JsonFileSink, ResultSink};
use anyhow::Result;
use log::{info, warn};
use std::path::Path;

pub fn run(
    settings: &EngineSettings,
    data_file: &Path,
    strategy: &str,
    output_dir: &Path,
) -> Result<Study> {
    info!(
        "Received optimize command for {} using {}",
        strategy,
        data_file.display()
    );
    let data = MarketData::load_from_file(data_file)?;
    let study = optimize_instrument(&data, strategy, settings, &ResultCache::new())?;

    info!(
        "Finished {} trials ({} complete, {} pruned, {} failed)",
        study.trials.len(),
        study.count(TrialState::Complete),
        study.count(TrialState::Pruned),
        study.count(TrialState::Failed)
    );
    match study.best_trial() {
        Some(best) => {
            info!("Best value (total profit/loss): {:.4}", best.objective_value);
            for (key, value) in &best.parameters {
                info!("  {}: {}", key, value);
            }
        }
        None => warn!("No trial completed successfully"),
    }

    let sink = JsonFileSink::new(output_dir);
    sink.store_study(data.symbol(), strategy, &study)?;
    info!(
        "Best parameters saved to {}",
        sink.path_for(data.symbol(), strategy).display()
    );
    Ok(study)
}
