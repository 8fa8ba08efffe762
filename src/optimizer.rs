use crate::cache::{CachedEvaluation, ResultCache};
use crate::config::{CostConfig, EngineSettings, PositionConfig, RiskConfig};
use crate::engine::{Backtester, RunObserver};
use crate::error::{BacktestError, BacktestResult};
use crate::models::{Bar, Parameters, PriceSeries, RunResult, RunSummary};
use crate::optimizer_status::OptimizerStatus;
use crate::param_utils::ParameterSpace;
use crate::signals::SignalProvider;
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

/// Objective recorded for trials that could not be evaluated.
pub const FAILED_OBJECTIVE: f64 = -1_000_000.0;
pub const FEW_TRADES_PENALTY: f64 = 50.0;
pub const LOW_TRADES_PENALTY: f64 = 10.0;
pub const MAX_RESAMPLES: usize = 8;

/// Realized profit minus the low-activity penalty.
pub fn penalized_profit(result: &RunResult) -> f64 {
    let penalty = if result.total_trades < 2 {
        FEW_TRADES_PENALTY
    } else if result.total_trades < 5 {
        LOW_TRADES_PENALTY
    } else {
        0.0
    };
    result.total_profit_loss - penalty
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: f64,
    pub summary: Option<RunSummary>,
}

impl Evaluation {
    pub fn value(value: f64) -> Self {
        Self {
            value,
            summary: None,
        }
    }
}

/// Black-box function maximized by the optimizer.
pub trait Objective: Sync {
    fn evaluate(&self, params: &Parameters, reporter: &mut TrialReporter)
        -> BacktestResult<Evaluation>;

    /// Series length the parameter lookbacks must fit into, if any.
    fn data_len(&self) -> Option<usize> {
        None
    }
}

impl<F> Objective for F
where
    F: Fn(&Parameters) -> BacktestResult<f64> + Sync,
{
    fn evaluate(
        &self,
        params: &Parameters,
        _reporter: &mut TrialReporter,
    ) -> BacktestResult<Evaluation> {
        self(params).map(Evaluation::value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrunerConfig {
    /// Completed trials required before anything is pruned.
    pub startup_trials: usize,
    /// Checkpoints reported before a trial may be pruned.
    pub warmup_steps: usize,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            startup_trials: 5,
            warmup_steps: 2,
        }
    }
}

/// Per-checkpoint medians of completed trials, fixed for one batch.
#[derive(Debug, Clone)]
pub struct PruneSnapshot {
    medians: Vec<f64>,
    warmup_steps: usize,
}

impl PruneSnapshot {
    fn from_study(study: &Study, config: &PrunerConfig) -> Option<Self> {
        let completed: Vec<&Trial> = study
            .trials
            .iter()
            .filter(|trial| trial.state == TrialState::Complete)
            .collect();
        if completed.len() < config.startup_trials.max(1) {
            return None;
        }
        let steps = completed
            .iter()
            .map(|trial| trial.intermediate_values.len())
            .max()
            .unwrap_or(0);
        let medians = (0..steps)
            .map(|step| {
                let values: Vec<f64> = completed
                    .iter()
                    .filter_map(|trial| trial.intermediate_values.get(step).copied())
                    .filter(|value| value.is_finite())
                    .collect();
                if values.is_empty() {
                    f64::NEG_INFINITY
                } else {
                    Data::new(values).median()
                }
            })
            .collect();
        Some(Self {
            medians,
            warmup_steps: config.warmup_steps,
        })
    }

    fn should_prune(&self, step: usize, value: f64) -> bool {
        step >= self.warmup_steps
            && self
                .medians
                .get(step)
                .map_or(false, |median| value < *median)
    }
}

/// Collects intermediate objective values for one trial and decides pruning.
pub struct TrialReporter<'a> {
    snapshot: Option<&'a PruneSnapshot>,
    intermediate_values: Vec<f64>,
    pruned: bool,
}

impl<'a> TrialReporter<'a> {
    pub fn new(snapshot: Option<&'a PruneSnapshot>) -> Self {
        Self {
            snapshot,
            intermediate_values: Vec::new(),
            pruned: false,
        }
    }

    /// Records the value for the next checkpoint; `Break` means the trial is pruned.
    pub fn report(&mut self, value: f64) -> ControlFlow<()> {
        let step = self.intermediate_values.len();
        self.intermediate_values.push(value);
        match self.snapshot {
            Some(snapshot) if snapshot.should_prune(step, value) => {
                self.pruned = true;
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        }
    }

    pub fn is_pruned(&self) -> bool {
        self.pruned
    }

    pub fn intermediate_values(&self) -> &[f64] {
        &self.intermediate_values
    }
}

/// Reports realized profit to a `TrialReporter` at evenly spaced bars.
struct CheckpointObserver<'r, 'a> {
    checkpoints: Vec<usize>,
    next: usize,
    reporter: &'r mut TrialReporter<'a>,
}

impl RunObserver for CheckpointObserver<'_, '_> {
    fn on_bar(&mut self, bar: usize, realized_profit_loss: f64) -> ControlFlow<()> {
        if self.checkpoints.get(self.next) != Some(&bar) {
            return ControlFlow::Continue(());
        }
        self.next += 1;
        self.reporter.report(realized_profit_loss)
    }
}

fn checkpoint_bars(len: usize, steps: usize) -> Vec<usize> {
    let mut bars: Vec<usize> = (1..=steps)
        .map(|k| (len * k / steps).saturating_sub(1))
        .collect();
    bars.dedup();
    bars
}

/// Backtest of one instrument under one signal provider, scored by penalized profit.
pub struct BacktestObjective {
    bars: Vec<Bar>,
    prices: PriceSeries,
    provider: Box<dyn SignalProvider>,
    costs: CostConfig,
    position: PositionConfig,
    initial_capital: f64,
    report_steps: usize,
}

impl BacktestObjective {
    pub fn new(bars: Vec<Bar>, provider: Box<dyn SignalProvider>, settings: &EngineSettings) -> Self {
        let prices = PriceSeries::from_bars(&bars);
        Self {
            bars,
            prices,
            provider,
            costs: settings.costs,
            position: PositionConfig::default(),
            initial_capital: settings.initial_capital,
            report_steps: 10,
        }
    }

    pub fn with_position_config(mut self, position: PositionConfig) -> Self {
        self.position = position;
        self
    }

    pub fn run(&self, params: &Parameters) -> BacktestResult<RunResult> {
        let mut reporter = TrialReporter::new(None);
        self.run_reported(params, &mut reporter)
    }

    fn backtester(&self, params: &Parameters) -> Backtester {
        Backtester::new(RiskConfig::from_parameters(params), self.costs)
            .with_position_config(self.position)
            .with_initial_capital(self.initial_capital)
            .with_required_history(self.provider.required_history(params))
    }

    fn run_reported(
        &self,
        params: &Parameters,
        reporter: &mut TrialReporter,
    ) -> BacktestResult<RunResult> {
        let signals = self.provider.signals(&self.bars, params)?;
        let backtester = self.backtester(params);
        let mut observer = CheckpointObserver {
            checkpoints: checkpoint_bars(self.prices.len(), self.report_steps),
            next: 0,
            reporter,
        };
        backtester.run_observed(&self.prices, &signals, &mut observer)
    }
}

impl Objective for BacktestObjective {
    fn evaluate(
        &self,
        params: &Parameters,
        reporter: &mut TrialReporter,
    ) -> BacktestResult<Evaluation> {
        let result = self.run_reported(params, reporter)?;
        Ok(Evaluation {
            value: penalized_profit(&result),
            summary: Some(RunSummary::from(&result)),
        })
    }

    fn data_len(&self) -> Option<usize> {
        Some(self.prices.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    Complete,
    Pruned,
    Failed,
}

impl TrialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialState::Complete => "complete",
            TrialState::Pruned => "pruned",
            TrialState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub parameters: Parameters,
    pub objective_value: f64,
    pub state: TrialState,
    #[serde(default)]
    pub summary: Option<RunSummary>,
    #[serde(default)]
    pub intermediate_values: Vec<f64>,
    #[serde(default)]
    pub error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub name: String,
    pub trials: Vec<Trial>,
    pub best_index: Option<usize>,
}

impl Study {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            trials: Vec::new(),
            best_index: None,
        }
    }

    /// Appends a trial; only completed trials can become best, ties keep the earlier one.
    pub fn record(&mut self, trial: Trial) -> bool {
        let improves = trial.state == TrialState::Complete
            && self
                .best_value()
                .map_or(true, |best| trial.objective_value > best);
        if improves {
            self.best_index = Some(self.trials.len());
        }
        self.trials.push(trial);
        improves
    }

    pub fn best_trial(&self) -> Option<&Trial> {
        self.best_index.and_then(|index| self.trials.get(index))
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_trial().map(|trial| trial.objective_value)
    }

    pub fn best_parameters(&self) -> Option<&Parameters> {
        self.best_trial().map(|trial| &trial.parameters)
    }

    pub fn count(&self, state: TrialState) -> usize {
        self.trials.iter().filter(|trial| trial.state == state).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub n_trials: usize,
    pub timeout: Option<Duration>,
    pub seed: u64,
    /// Trials sampled per model update and evaluated in parallel.
    pub batch_size: usize,
    /// Uniformly random trials before the density model is used.
    pub startup_trials: usize,
    pub pruner: Option<PrunerConfig>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            n_trials: 50,
            timeout: None,
            seed: 42,
            batch_size: 1,
            startup_trials: 10,
            pruner: None,
        }
    }
}

impl OptimizerConfig {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            n_trials: settings.optimizer_trials,
            timeout: settings.optimizer_timeout,
            seed: settings.optimizer_seed,
            batch_size: settings.optimizer_batch_size,
            startup_trials: settings.optimizer_startup_trials,
            pruner: settings.optimizer_pruning.then(PrunerConfig::default),
        }
    }
}

struct Proposal {
    units: Vec<f64>,
    parameters: BacktestResult<Parameters>,
}

struct TrialOutcome {
    parameters: Parameters,
    value: f64,
    state: TrialState,
    summary: Option<RunSummary>,
    intermediate_values: Vec<f64>,
    error: Option<String>,
    duration: Duration,
}

impl TrialOutcome {
    fn failed(parameters: Parameters, error: String, duration: Duration) -> Self {
        Self {
            parameters,
            value: FAILED_OBJECTIVE,
            state: TrialState::Failed,
            summary: None,
            intermediate_values: Vec::new(),
            error: Some(error),
            duration,
        }
    }
}

/// Tree-structured Parzen search over a constrained parameter space.
pub struct ParameterOptimizer {
    config: OptimizerConfig,
    cache: Option<ResultCache>,
    status: Option<OptimizerStatus>,
}

impl ParameterOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            cache: None,
            status: None,
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_status(mut self, status: OptimizerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn optimize<O: Objective>(
        &self,
        study_name: &str,
        objective: &O,
        space: &ParameterSpace,
    ) -> Result<Study> {
        if space.is_empty() {
            return Err(anyhow!("Parameter space for {} is empty", study_name));
        }
        let started = Instant::now();
        let data_len = objective.data_len().unwrap_or(usize::MAX);
        let batch_size = self.config.batch_size.max(1);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut axes = space
            .specs()
            .iter()
            .map(|_| {
                tpe::range(0.0, 1.0)
                    .map(|range| tpe::TpeOptimizer::new(tpe::parzen_estimator(), range))
                    .map_err(|e| anyhow!("Failed to build sampler range: {:?}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Starting study {}: {} trials over {} parameters ({} bars, batch {})",
            study_name,
            self.config.n_trials,
            space.len(),
            objective.data_len().map_or("unbounded".to_string(), |n| n.to_string()),
            batch_size
        );
        if let Some(status) = &self.status {
            status.set_phase(format!("Optimizing {}", study_name));
            status.set_total(self.config.n_trials);
        }

        let mut study = Study::new(study_name);
        while study.trials.len() < self.config.n_trials {
            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    info!(
                        "Study {} reached its {:?} timeout after {} trials",
                        study_name,
                        timeout,
                        study.trials.len()
                    );
                    break;
                }
            }

            let batch_len = batch_size.min(self.config.n_trials - study.trials.len());
            let proposals: Vec<Proposal> = (0..batch_len)
                .map(|offset| {
                    let trial_index = study.trials.len() + offset;
                    self.propose(&mut axes, &mut rng, space, data_len, trial_index)
                })
                .collect();
            let snapshot = self
                .config
                .pruner
                .as_ref()
                .and_then(|pruner| PruneSnapshot::from_study(&study, pruner));

            let outcomes: Vec<TrialOutcome> = proposals
                .par_iter()
                .map(|proposal| self.evaluate(study_name, objective, proposal, snapshot.as_ref()))
                .collect();

            for (proposal, outcome) in proposals.into_iter().zip(outcomes) {
                for (axis, &unit) in axes.iter_mut().zip(&proposal.units) {
                    if axis.tell(unit, -outcome.value).is_err() {
                        debug!("Sampler rejected observation {}", unit);
                    }
                }
                self.record(&mut study, outcome);
            }

            if let Some(status) = &self.status {
                status.set_progress(
                    study.count(TrialState::Complete),
                    study.count(TrialState::Pruned),
                    study.count(TrialState::Failed),
                    study.best_value(),
                );
            }
        }

        match study.best_trial() {
            Some(best) => info!(
                "Study {} finished in {:.1}s: best value {:.4} at trial {} ({} complete, {} pruned, {} failed)",
                study_name,
                started.elapsed().as_secs_f64(),
                best.objective_value,
                best.index,
                study.count(TrialState::Complete),
                study.count(TrialState::Pruned),
                study.count(TrialState::Failed)
            ),
            None => warn!(
                "Study {} finished without a completed trial ({} trials)",
                study_name,
                study.trials.len()
            ),
        }
        if let Some(status) = &self.status {
            status.set_phase("Completed");
        }

        Ok(study)
    }

    fn propose(
        &self,
        axes: &mut [tpe::TpeOptimizer],
        rng: &mut StdRng,
        space: &ParameterSpace,
        data_len: usize,
        trial_index: usize,
    ) -> Proposal {
        let random = trial_index < self.config.startup_trials;
        let mut last = None;
        for _ in 0..=MAX_RESAMPLES {
            let units: Vec<f64> = axes
                .iter_mut()
                .map(|axis| {
                    if random {
                        return rng.gen::<f64>();
                    }
                    match axis.ask(&mut *rng) {
                        Ok(unit) => unit,
                        Err(_) => rng.gen::<f64>(),
                    }
                })
                .collect();
            match space.materialize(&units, data_len) {
                Ok(parameters) => {
                    return Proposal {
                        units,
                        parameters: Ok(parameters),
                    }
                }
                Err(error) => {
                    debug!("Trial {} resampling: {}", trial_index, error);
                    last = Some((units, error));
                }
            }
        }
        let (units, error) = last.unwrap_or_else(|| {
            (
                Vec::new(),
                BacktestError::constraint("", "no sample drawn"),
            )
        });
        Proposal {
            units,
            parameters: Err(error),
        }
    }

    fn evaluate<O: Objective>(
        &self,
        scope: &str,
        objective: &O,
        proposal: &Proposal,
        snapshot: Option<&PruneSnapshot>,
    ) -> TrialOutcome {
        let started = Instant::now();
        let parameters = match &proposal.parameters {
            Ok(parameters) => parameters.clone(),
            Err(error) => {
                return TrialOutcome::failed(Parameters::new(), error.to_string(), started.elapsed())
            }
        };

        if let Some(cached) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.check_cache(scope, &parameters))
        {
            return TrialOutcome {
                parameters,
                value: cached.objective_value,
                state: TrialState::Complete,
                summary: cached.summary,
                intermediate_values: cached.intermediate_values,
                error: None,
                duration: started.elapsed(),
            };
        }

        let mut reporter = TrialReporter::new(snapshot);
        match objective.evaluate(&parameters, &mut reporter) {
            Ok(evaluation) if evaluation.value.is_finite() => {
                let intermediate_values = reporter.intermediate_values().to_vec();
                if let Some(cache) = &self.cache {
                    cache.store_cache(
                        scope,
                        &parameters,
                        CachedEvaluation {
                            objective_value: evaluation.value,
                            summary: evaluation.summary.clone(),
                            intermediate_values: intermediate_values.clone(),
                        },
                    );
                }
                TrialOutcome {
                    parameters,
                    value: evaluation.value,
                    state: TrialState::Complete,
                    summary: evaluation.summary,
                    intermediate_values,
                    error: None,
                    duration: started.elapsed(),
                }
            }
            Ok(evaluation) => TrialOutcome::failed(
                parameters,
                BacktestError::NumericAnomaly(format!("objective value {}", evaluation.value))
                    .to_string(),
                started.elapsed(),
            ),
            Err(BacktestError::Halted { .. }) if reporter.is_pruned() => {
                let intermediate_values = reporter.intermediate_values().to_vec();
                TrialOutcome {
                    parameters,
                    value: intermediate_values
                        .last()
                        .copied()
                        .unwrap_or(FAILED_OBJECTIVE),
                    state: TrialState::Pruned,
                    summary: None,
                    intermediate_values,
                    error: None,
                    duration: started.elapsed(),
                }
            }
            Err(error) => TrialOutcome::failed(parameters, error.to_string(), started.elapsed()),
        }
    }

    fn record(&self, study: &mut Study, outcome: TrialOutcome) {
        let index = study.trials.len();
        match outcome.state {
            TrialState::Failed => warn!(
                "Study {} trial {} failed: {}",
                study.name,
                index,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            TrialState::Pruned => debug!(
                "Study {} trial {} pruned at step {} with {:.4}",
                study.name,
                index,
                outcome.intermediate_values.len(),
                outcome.value
            ),
            TrialState::Complete => debug!(
                "Study {} trial {} finished with {:.4} in {:?}",
                study.name, index, outcome.value, outcome.duration
            ),
        }

        let improved = study.record(Trial {
            index,
            parameters: outcome.parameters,
            objective_value: outcome.value,
            state: outcome.state,
            summary: outcome.summary,
            intermediate_values: outcome.intermediate_values,
            error: outcome.error,
            duration: outcome.duration,
        });
        if improved {
            info!(
                "Study {} trial {} is the new best: {:.4}",
                study.name, index, outcome.value
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_utils::ParameterSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn summary_with_trades(total_trades: usize, total_profit_loss: f64) -> RunResult {
        RunResult {
            initial_capital: 100.0,
            final_capital: 100.0 + total_profit_loss,
            total_profit_loss,
            total_trades,
            winning_trades: total_trades,
            losing_trades: 0,
            win_rate: 1.0,
            long_profit: total_profit_loss,
            short_profit: 0.0,
            num_long_trades: total_trades,
            num_short_trades: 0,
            run_volatility: 0.0,
            sizing_mode: crate::models::SizingMode::Dynamic,
            trades: Vec::new(),
        }
    }

    fn unit_square() -> ParameterSpace {
        ParameterSpace::new(vec![
            ParameterSpec::float("x", 0.0, 1.0),
            ParameterSpec::int("n", 1, 20),
        ])
        .unwrap()
    }

    #[test]
    fn penalty_depends_on_trade_count() {
        assert_eq!(penalized_profit(&summary_with_trades(0, 10.0)), -40.0);
        assert_eq!(penalized_profit(&summary_with_trades(1, 10.0)), -40.0);
        assert_eq!(penalized_profit(&summary_with_trades(2, 10.0)), 0.0);
        assert_eq!(penalized_profit(&summary_with_trades(4, 10.0)), 0.0);
        assert_eq!(penalized_profit(&summary_with_trades(5, 10.0)), 10.0);
    }

    #[test]
    fn single_feasible_combination_is_found() {
        init_logging();
        let space = ParameterSpace::new(vec![
            ParameterSpec::int("fast", 2, 2),
            ParameterSpec::int("slow", 3, 4).greater_than("fast", 1.0),
        ])
        .unwrap();
        let objective = |p: &Parameters| -> BacktestResult<f64> { Ok(p["fast"] * 10.0 + p["slow"]) };

        let study = ParameterOptimizer::new(OptimizerConfig {
            n_trials: 1,
            ..OptimizerConfig::default()
        })
        .optimize("single", &objective, &space)
        .unwrap();

        assert_eq!(study.trials.len(), 1);
        assert_eq!(study.best_value(), Some(24.0));
        let best = study.best_parameters().unwrap();
        assert_eq!(best["fast"], 2.0);
        assert_eq!(best["slow"], 4.0);
    }

    #[test]
    fn search_improves_on_smooth_objective() {
        init_logging();
        let objective = |p: &Parameters| -> BacktestResult<f64> { Ok(-(p["x"] - 0.7).powi(2) - (p["n"] - 12.0).abs()) };
        let study = ParameterOptimizer::new(OptimizerConfig {
            n_trials: 60,
            startup_trials: 10,
            ..OptimizerConfig::default()
        })
        .optimize("smooth", &objective, &unit_square())
        .unwrap();

        assert_eq!(study.trials.len(), 60);
        let best = study.best_value().unwrap();
        let random_phase_best = study.trials[..10]
            .iter()
            .map(|t| t.objective_value)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(best >= random_phase_best);
        assert!(best > -3.0);
        for trial in &study.trials {
            assert!(best >= trial.objective_value);
        }
    }

    #[test]
    fn same_seed_gives_same_study_with_parallel_batches() {
        let objective = |p: &Parameters| -> BacktestResult<f64> { Ok(p["x"] * p["n"]) };
        let config = OptimizerConfig {
            n_trials: 24,
            batch_size: 4,
            startup_trials: 8,
            ..OptimizerConfig::default()
        };
        let first = ParameterOptimizer::new(config.clone())
            .optimize("det", &objective, &unit_square())
            .unwrap();
        let second = ParameterOptimizer::new(config)
            .optimize("det", &objective, &unit_square())
            .unwrap();

        let params = |study: &Study| -> Vec<Parameters> {
            study.trials.iter().map(|t| t.parameters.clone()).collect()
        };
        assert_eq!(params(&first), params(&second));
        assert_eq!(first.best_index, second.best_index);
    }

    #[test]
    fn failing_trials_are_isolated() {
        init_logging();
        let objective = |p: &Parameters| -> BacktestResult<f64> {
            if p["n"] > 10.0 {
                Err(BacktestError::invalid_input("n too large"))
            } else {
                Ok(p["n"])
            }
        };
        let study = ParameterOptimizer::new(OptimizerConfig {
            n_trials: 30,
            ..OptimizerConfig::default()
        })
        .optimize("isolated", &objective, &unit_square())
        .unwrap();

        assert_eq!(study.trials.len(), 30);
        assert!(study.count(TrialState::Failed) > 0);
        for trial in study.trials.iter().filter(|t| t.state == TrialState::Failed) {
            assert_eq!(trial.objective_value, FAILED_OBJECTIVE);
            assert!(trial.error.is_some());
        }
        let best = study.best_trial().unwrap();
        assert_eq!(best.state, TrialState::Complete);
        assert!(best.parameters["n"] <= 10.0);
    }

    #[test]
    fn infeasible_space_never_invokes_objective() {
        struct Counting(AtomicUsize);
        impl Objective for Counting {
            fn evaluate(
                &self,
                _params: &Parameters,
                _reporter: &mut TrialReporter,
            ) -> BacktestResult<Evaluation> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Evaluation::value(1.0))
            }

            fn data_len(&self) -> Option<usize> {
                Some(20)
            }
        }

        let space = ParameterSpace::new(vec![
            ParameterSpec::int("period", 10, 50).capped_by_history(4),
        ])
        .unwrap();
        let objective = Counting(AtomicUsize::new(0));
        let study = ParameterOptimizer::new(OptimizerConfig {
            n_trials: 5,
            ..OptimizerConfig::default()
        })
        .optimize("infeasible", &objective, &space)
        .unwrap();

        assert_eq!(objective.0.load(Ordering::SeqCst), 0);
        assert_eq!(study.count(TrialState::Failed), 5);
        assert!(study.best_trial().is_none());
    }

    #[test]
    fn zero_timeout_stops_before_first_batch() {
        let objective = |p: &Parameters| -> BacktestResult<f64> { Ok(p["x"]) };
        let study = ParameterOptimizer::new(OptimizerConfig {
            n_trials: 10,
            timeout: Some(Duration::ZERO),
            ..OptimizerConfig::default()
        })
        .optimize("timeout", &objective, &unit_square())
        .unwrap();
        assert!(study.trials.is_empty());
    }

    #[test]
    fn pruned_trials_never_become_best() {
        init_logging();
        struct Stepwise;
        impl Objective for Stepwise {
            fn evaluate(
                &self,
                params: &Parameters,
                reporter: &mut TrialReporter,
            ) -> BacktestResult<Evaluation> {
                let x = params["x"];
                for step in 0..4 {
                    if reporter.report(x * (step + 1) as f64).is_break() {
                        return Err(BacktestError::Halted { bar: step });
                    }
                }
                Ok(Evaluation::value(x * 4.0))
            }
        }

        let space = ParameterSpace::new(vec![ParameterSpec::float("x", 0.0, 1.0)]).unwrap();
        let study = ParameterOptimizer::new(OptimizerConfig {
            n_trials: 40,
            startup_trials: 40,
            pruner: Some(PrunerConfig {
                startup_trials: 3,
                warmup_steps: 1,
            }),
            ..OptimizerConfig::default()
        })
        .optimize("pruned", &Stepwise, &space)
        .unwrap();

        let pruned: Vec<&Trial> = study
            .trials
            .iter()
            .filter(|t| t.state == TrialState::Pruned)
            .collect();
        assert!(!pruned.is_empty());
        for trial in &pruned {
            assert_eq!(trial.intermediate_values.len(), 2);
            assert_eq!(trial.objective_value, trial.intermediate_values[1]);
        }
        assert_eq!(study.best_trial().unwrap().state, TrialState::Complete);
    }

    #[test]
    fn cache_serves_repeated_samples() {
        let calls = AtomicUsize::new(0);
        let objective = |p: &Parameters| -> BacktestResult<f64> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(p["n"])
        };
        let space = ParameterSpace::new(vec![ParameterSpec::int("n", 1, 3)]).unwrap();
        let cache = ResultCache::new();
        let study = ParameterOptimizer::new(OptimizerConfig {
            n_trials: 20,
            ..OptimizerConfig::default()
        })
        .with_cache(cache.clone())
        .optimize("cached", &objective, &space)
        .unwrap();

        assert_eq!(study.trials.len(), 20);
        assert!(calls.load(Ordering::SeqCst) <= 3);
        assert!(cache.hits() >= 17);
        assert_eq!(study.best_value(), Some(3.0));
    }

    #[test]
    fn status_tracks_progress() {
        let status = OptimizerStatus::new();
        let objective = |p: &Parameters| -> BacktestResult<f64> { Ok(p["x"]) };
        ParameterOptimizer::new(OptimizerConfig {
            n_trials: 6,
            ..OptimizerConfig::default()
        })
        .with_status(status.clone())
        .optimize("status", &objective, &unit_square())
        .unwrap();

        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, "Completed");
        assert_eq!(snapshot.total_trials, 6);
        assert_eq!(snapshot.completed_trials, 6);
        assert!(snapshot.best_value.is_some());
    }

    #[test]
    fn checkpoints_are_evenly_spaced() {
        assert_eq!(checkpoint_bars(100, 4), vec![24, 49, 74, 99]);
        assert_eq!(checkpoint_bars(3, 10), vec![0, 1, 2]);
        assert!(checkpoint_bars(50, 0).is_empty());
    }
}
