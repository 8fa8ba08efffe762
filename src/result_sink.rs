use crate::models::Parameters;
use crate::optimizer::{Study, Trial, TrialState};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Destination for finished studies. Shared by every worker of a batch.
pub trait ResultSink: Send + Sync {
    fn store_study(&self, symbol: &str, strategy: &str, study: &Study) -> Result<()>;
}

/// Persisted form of a study's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyReport {
    pub symbol: String,
    pub strategy: String,
    pub best_profit_loss: Option<f64>,
    pub best_params: Option<Parameters>,
    pub n_trials: usize,
    pub completed_trials: usize,
    pub pruned_trials: usize,
    pub failed_trials: usize,
    #[serde(default)]
    pub trials: Vec<Trial>,
}

impl StudyReport {
    pub fn from_study(symbol: &str, strategy: &str, study: &Study) -> Self {
        Self {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            best_profit_loss: study.best_value(),
            best_params: study.best_parameters().cloned(),
            n_trials: study.trials.len(),
            completed_trials: study.count(TrialState::Complete),
            pruned_trials: study.count(TrialState::Pruned),
            failed_trials: study.count(TrialState::Failed),
            trials: study.trials.clone(),
        }
    }
}

/// Writes `best_params_{symbol}_{strategy}.json` into a directory.
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, symbol: &str, strategy: &str) -> PathBuf {
        self.output_dir
            .join(format!("best_params_{}_{}.json", symbol, strategy))
    }

    pub fn load_report<P: AsRef<Path>>(path: P) -> Result<StudyReport> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read study report {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid study report {}", path.display()))
    }
}

impl ResultSink for JsonFileSink {
    fn store_study(&self, symbol: &str, strategy: &str, study: &Study) -> Result<()> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create results directory {}",
                self.output_dir.display()
            )
        })?;
        let path = self.path_for(symbol, strategy);
        let file = File::create(&path)
            .with_context(|| format!("Unable to create study report at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &StudyReport::from_study(symbol, strategy, study))
            .context("Failed to serialize study report")?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush study report {}", path.display()))?;
        Ok(())
    }
}

/// Keeps reports in memory.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<StudyReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<StudyReport> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn report_for(&self, symbol: &str) -> Option<StudyReport> {
        self.reports()
            .into_iter()
            .find(|report| report.symbol == symbol)
    }
}

impl ResultSink for MemorySink {
    fn store_study(&self, symbol: &str, strategy: &str, study: &Study) -> Result<()> {
        let report = StudyReport::from_study(symbol, strategy, study);
        match self.reports.lock() {
            Ok(mut reports) => reports.push(report),
            Err(poisoned) => poisoned.into_inner().push(report),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn study() -> Study {
        let mut study = Study::new("BTC/EMA_Only");
        for (index, value) in [3.0, 7.5, -1_000_000.0].into_iter().enumerate() {
            let mut parameters = Parameters::new();
            parameters.insert("short_ema_period".to_string(), 5.0 + index as f64);
            study.record(Trial {
                index,
                parameters,
                objective_value: value,
                state: if value > -1.0e6 {
                    TrialState::Complete
                } else {
                    TrialState::Failed
                },
                summary: None,
                intermediate_values: Vec::new(),
                error: None,
                duration: Duration::from_millis(3),
            });
        }
        study
    }

    #[test]
    fn json_sink_writes_best_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("results"));
        sink.store_study("BTC", "EMA_Only", &study()).unwrap();

        let path = dir.path().join("results").join("best_params_BTC_EMA_Only.json");
        assert_eq!(sink.path_for("BTC", "EMA_Only"), path);
        let report = JsonFileSink::load_report(&path).unwrap();
        assert_eq!(report.best_profit_loss, Some(7.5));
        assert_eq!(report.best_params.unwrap()["short_ema_period"], 6.0);
        assert_eq!(report.n_trials, 3);
        assert_eq!(report.failed_trials, 1);
        assert_eq!(report.trials.len(), 3);
    }

    #[test]
    fn memory_sink_collects_reports() {
        let sink = MemorySink::new();
        sink.store_study("ETH", "Strict", &study()).unwrap();
        sink.store_study("SOL", "Strict", &Study::new("empty")).unwrap();

        assert_eq!(sink.reports().len(), 2);
        assert_eq!(sink.report_for("ETH").unwrap().completed_trials, 2);
        let empty = sink.report_for("SOL").unwrap();
        assert!(empty.best_params.is_none());
        assert_eq!(empty.n_trials, 0);
    }
}
