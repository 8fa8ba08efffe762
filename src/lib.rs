pub mod backtester;
pub mod cache;
pub mod commands;
pub mod config;
pub mod data_context;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod result_sink;
pub mod signals;
pub mod trading_rules;

pub use config::{CostConfig, EngineSettings, PositionConfig, RiskConfig};
pub use engine::{run_backtest, Backtester, RunContext, RunObserver};
pub use error::{BacktestError, BacktestResult};
pub use models::{
    Bar, Direction, ExitReason, Parameters, PriceSeries, RunResult, RunSummary, SignalSet,
    SizingMode, TradeRecord,
};
pub use optimizer::{
    BacktestObjective, Objective, OptimizerConfig, ParameterOptimizer, Study, Trial, TrialState,
};
pub use param_utils::{ParameterSpace, ParameterSpec};
pub use signals::{create_signal_provider, SignalProvider};
pub use trading_rules::{PositionSizer, RecentPerformanceWindow};
