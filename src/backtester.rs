use crate::cache::ResultCache;
use crate::config::EngineSettings;
use crate::data_context::MarketData;
use crate::models::Parameters;
use crate::optimizer::{BacktestObjective, OptimizerConfig, ParameterOptimizer, Study, TrialState};
use crate::optimizer_status::OptimizerStatus;
use crate::param_utils::ParameterSpace;
use crate::result_sink::ResultSink;
use crate::signals::create_signal_provider;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct InstrumentTask {
    position: usize,
    data: MarketData,
}

struct InstrumentResultMsg {
    position: usize,
    outcome: InstrumentOutcome,
}

/// What one instrument's study produced.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentOutcome {
    pub symbol: String,
    pub best_value: Option<f64>,
    pub best_parameters: Option<Parameters>,
    pub trials: usize,
    pub failed_trials: usize,
    pub duration: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// In the order the instruments were submitted.
    pub outcomes: Vec<InstrumentOutcome>,
}

impl BatchSummary {
    /// Highest best value across instruments; the earlier instrument wins ties.
    pub fn best_instrument(&self) -> Option<&InstrumentOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.error.is_none())
            .filter_map(|outcome| outcome.best_value.map(|value| (outcome, value)))
            .fold(None, |best: Option<(&InstrumentOutcome, f64)>, (outcome, value)| {
                match best {
                    Some((_, best_value)) if best_value >= value => best,
                    _ => Some((outcome, value)),
                }
            })
            .map(|(outcome, _)| outcome)
    }

    pub fn failures(&self) -> Vec<&InstrumentOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .collect()
    }
}

/// Runs one independent study per instrument on a fixed pool of worker threads.
pub struct BatchOptimizer {
    settings: EngineSettings,
    strategy: String,
    sink: Arc<dyn ResultSink>,
    cache: ResultCache,
    status: OptimizerStatus,
    show_progress: bool,
}

impl BatchOptimizer {
    pub fn new<S: Into<String>>(
        settings: EngineSettings,
        strategy: S,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            settings,
            strategy: strategy.into(),
            sink,
            cache: ResultCache::new(),
            status: OptimizerStatus::new(),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn status(&self) -> OptimizerStatus {
        self.status.clone()
    }

    pub fn run(&self, instruments: Vec<MarketData>) -> Result<BatchSummary> {
        create_signal_provider(&self.strategy)?;
        let total = instruments.len();
        if total == 0 {
            warn!("No instruments to optimize.");
            return Ok(BatchSummary::default());
        }

        let num_workers = std::cmp::min(total, std::cmp::max(1, self.settings.optimizer_workers));
        info!(
            "Optimizing {} on {} instruments with {} worker threads",
            self.strategy, total, num_workers
        );
        self.status.set_phase(format!(
            "Optimizing {} instruments in parallel",
            total
        ));
        self.status.set_total(total);

        let (task_tx, task_rx): (Sender<InstrumentTask>, Receiver<InstrumentTask>) =
            bounded(num_workers);
        let (result_tx, result_rx): (Sender<InstrumentResultMsg>, Receiver<InstrumentResultMsg>) =
            bounded(total);

        let mut handles = Vec::new();
        for _ in 0..num_workers {
            let rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let settings = self.settings.clone();
            let strategy = self.strategy.clone();
            let sink = Arc::clone(&self.sink);
            let cache = self.cache.clone();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let symbol = task.data.symbol().to_string();
                    let start = Instant::now();
                    let outcome =
                        match optimize_instrument(&task.data, &strategy, &settings, &cache) {
                            Ok(study) => {
                                let stored = sink.store_study(&symbol, &strategy, &study);
                                InstrumentOutcome {
                                    symbol,
                                    best_value: study.best_value(),
                                    best_parameters: study.best_parameters().cloned(),
                                    trials: study.trials.len(),
                                    failed_trials: study.count(TrialState::Failed),
                                    duration: start.elapsed(),
                                    error: stored.err().map(|e| format!("{:#}", e)),
                                }
                            }
                            Err(error) => InstrumentOutcome {
                                symbol,
                                best_value: None,
                                best_parameters: None,
                                trials: 0,
                                failed_trials: 0,
                                duration: start.elapsed(),
                                error: Some(format!("{:#}", error)),
                            },
                        };
                    let message = InstrumentResultMsg {
                        position: task.position,
                        outcome,
                    };
                    if result_tx.send(message).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(task_rx);
        drop(result_tx);

        let feeder = {
            let task_tx = task_tx;
            thread::spawn(move || {
                for (position, data) in instruments.into_iter().enumerate() {
                    if task_tx.send(InstrumentTask { position, data }).is_err() {
                        break;
                    }
                }
            })
        };

        let pb = if self.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut slots: Vec<Option<InstrumentOutcome>> = vec![None; total];
        let mut completed = 0usize;
        let mut failures = 0usize;
        let mut batch_best: Option<f64> = None;
        while completed < total {
            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(message) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    let outcome = message.outcome;
                    match (&outcome.error, outcome.best_value) {
                        (Some(error), _) => {
                            failures += 1;
                            warn!("Optimization failed for {}: {}", outcome.symbol, error);
                        }
                        (None, Some(best)) => {
                            if batch_best.map_or(true, |current| best > current) {
                                batch_best = Some(best);
                            }
                            info!(
                                "Completed {} in {:.1}s: best value {:.4} over {} trials",
                                outcome.symbol,
                                outcome.duration.as_secs_f64(),
                                best,
                                outcome.trials
                            )
                        }
                        (None, None) => warn!(
                            "Completed {} without a successful trial ({} trials)",
                            outcome.symbol, outcome.trials
                        ),
                    }
                    self.status.set_phase(format!(
                        "Completed {}/{} instruments (last: {})",
                        completed, total, outcome.symbol
                    ));
                    self.status.set_progress(completed - failures, 0, failures, batch_best);
                    if let Some(slot) = slots.get_mut(message.position) {
                        *slot = Some(outcome);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if failures > 0 {
            warn!(
                "Batch optimization completed with {} failure{}",
                failures,
                if failures == 1 { "" } else { "s" }
            );
            pb.finish_with_message("Optimization completed with errors");
        } else {
            pb.finish_with_message("Optimization completed");
        }

        if feeder.join().is_err() {
            warn!("Task feeder thread panicked");
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("Optimization worker panicked");
            }
        }

        let summary = BatchSummary {
            outcomes: slots.into_iter().flatten().collect(),
        };
        if summary.outcomes.len() < total {
            return Err(anyhow!(
                "Only {} of {} instruments reported a result",
                summary.outcomes.len(),
                total
            ));
        }
        match summary.best_instrument() {
            Some(best) => info!(
                "Best instrument for {}: {} with {:.4}",
                self.strategy,
                best.symbol,
                best.best_value.unwrap_or_default()
            ),
            None => warn!("No instrument produced a successful study for {}", self.strategy),
        }
        self.status.set_phase("Batch optimization completed");
        Ok(summary)
    }
}

/// Single-instrument study shared by the batch workers and the `optimize` command.
pub fn optimize_instrument(
    data: &MarketData,
    strategy: &str,
    settings: &EngineSettings,
    cache: &ResultCache,
) -> Result<Study> {
    let provider = create_signal_provider(strategy)?;
    let objective = BacktestObjective::new(data.bars().to_vec(), provider, settings);
    let space = ParameterSpace::default_for(data.len());
    ParameterOptimizer::new(OptimizerConfig::from_settings(settings))
        .with_cache(cache.clone())
        .optimize(&format!("{}/{}", data.symbol(), strategy), &objective, &space)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use crate::result_sink::MemorySink;

    fn trending(symbol: &str, len: usize, drift: f64) -> MarketData {
        let bars = (0..len)
            .map(|i| {
                let x = i as f64;
                Bar::from_close(100.0 + drift * x + 6.0 * (x / 7.0).sin())
            })
            .collect();
        MarketData::new(symbol, bars)
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            optimizer_trials: 6,
            optimizer_workers: 2,
            ..EngineSettings::default()
        }
    }

    #[test]
    fn every_instrument_gets_its_own_study() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sink = Arc::new(MemorySink::new());
        let batch = BatchOptimizer::new(settings(), "EMA_Only", sink.clone()).with_progress(false);

        let summary = batch
            .run(vec![
                trending("UP", 300, 0.2),
                trending("DOWN", 300, -0.2),
                trending("FLAT", 300, 0.0),
            ])
            .unwrap();

        let symbols: Vec<&str> = summary.outcomes.iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["UP", "DOWN", "FLAT"]);
        assert!(summary.outcomes.iter().all(|o| o.trials == 6));
        assert_eq!(sink.reports().len(), 3);
        let best = summary.best_instrument().unwrap();
        let max = summary
            .outcomes
            .iter()
            .filter_map(|o| o.best_value)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(best.best_value, Some(max));
        let status = batch.status().snapshot();
        assert_eq!(status.phase, "Batch optimization completed");
        assert_eq!(status.best_value, Some(max));
    }

    #[test]
    fn status_keeps_the_best_value_across_instruments() {
        let settings = EngineSettings {
            optimizer_workers: 1,
            ..settings()
        };
        let batch = BatchOptimizer::new(settings, "EMA_Only", Arc::new(MemorySink::new()))
            .with_progress(false);

        let summary = batch
            .run(vec![
                trending("STRONG", 300, 0.6),
                trending("WEAK", 300, -0.3),
                trending("SHORT", 3, 0.1),
            ])
            .unwrap();

        let best = summary.best_instrument().unwrap();
        let status = batch.status().snapshot();
        assert_eq!(status.best_value, best.best_value);
        assert_eq!(status.failed_trials + status.completed_trials, 3);
    }

    #[test]
    fn one_bad_instrument_does_not_stop_the_rest() {
        let sink = Arc::new(MemorySink::new());
        let batch = BatchOptimizer::new(settings(), "EMA_Only", sink.clone()).with_progress(false);

        let summary = batch
            .run(vec![trending("TINY", 3, 0.1), trending("OK", 300, 0.1)])
            .unwrap();

        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.outcomes[1].symbol, "OK");
        assert_eq!(summary.outcomes[1].trials, 6);
        let tiny = &summary.outcomes[0];
        assert!(tiny.best_value.is_none());
        assert_eq!(summary.best_instrument().map(|o| o.symbol.as_str()), Some("OK"));
    }

    #[test]
    fn unknown_strategy_is_rejected_up_front() {
        let batch = BatchOptimizer::new(settings(), "Nope", Arc::new(MemorySink::new()))
            .with_progress(false);
        assert!(batch.run(vec![trending("X", 50, 0.1)]).is_err());
    }

    #[test]
    fn best_instrument_prefers_earlier_on_ties() {
        let outcome = |symbol: &str, best_value: Option<f64>, error: Option<&str>| InstrumentOutcome {
            symbol: symbol.to_string(),
            best_value,
            best_parameters: None,
            trials: 1,
            failed_trials: 0,
            duration: Duration::ZERO,
            error: error.map(|e| e.to_string()),
        };
        let summary = BatchSummary {
            outcomes: vec![
                outcome("A", Some(2.0), None),
                outcome("B", Some(5.0), Some("sink failed")),
                outcome("C", Some(2.0), None),
                outcome("D", None, None),
            ],
        };
        assert_eq!(summary.best_instrument().unwrap().symbol, "A");
        assert_eq!(summary.failures().len(), 1);
    }
}
