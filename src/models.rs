use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strategy parameters keyed by name. Ordered so signatures and persisted
/// output are stable across runs.
pub type Parameters = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn from_close(close: f64) -> Self {
        Self {
            open: close,
            high: close,
            low: close,
            close,
        }
    }
}

/// Ordered closing prices, one per bar.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    closes: Vec<f64>,
}

impl PriceSeries {
    pub fn new(closes: Vec<f64>) -> Self {
        Self { closes }
    }

    pub fn from_bars(bars: &[Bar]) -> Self {
        Self {
            closes: bars.iter().map(|bar| bar.close).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.closes
    }

    /// `|last - first| / first`, or 0 for fewer than two bars.
    pub fn run_volatility(&self) -> f64 {
        match (self.closes.first(), self.closes.last()) {
            (Some(&first), Some(&last)) if self.closes.len() > 1 && first != 0.0 => {
                ((last - first) / first).abs()
            }
            _ => 0.0,
        }
    }
}

impl From<Vec<f64>> for PriceSeries {
    fn from(closes: Vec<f64>) -> Self {
        Self::new(closes)
    }
}

/// Entry/exit flags and ATR, index-aligned with a `PriceSeries`.
/// An `atr` value of 0 means the trailing stop is inactive for that bar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSet {
    pub long_entry: Vec<bool>,
    pub short_entry: Vec<bool>,
    pub long_exit: Vec<bool>,
    pub short_exit: Vec<bool>,
    pub atr: Vec<f64>,
}

impl SignalSet {
    /// All-false signals with zero ATR.
    pub fn empty(len: usize) -> Self {
        Self {
            long_entry: vec![false; len],
            short_entry: vec![false; len],
            long_exit: vec![false; len],
            short_exit: vec![false; len],
            atr: vec![0.0; len],
        }
    }

    /// Lengths of the five arrays in declaration order.
    pub fn lengths(&self) -> [usize; 5] {
        [
            self.long_entry.len(),
            self.short_entry.len(),
            self.long_exit.len(),
            self.short_exit.len(),
            self.atr.len(),
        ]
    }

    pub fn exit_flagged(&self, direction: Direction, index: usize) -> bool {
        match direction {
            Direction::Long => self.long_exit[index],
            Direction::Short => self.short_exit[index],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TrailingStop,
    StopLoss,
    TakeProfit,
    Signal,
    EndOfSeries,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Signal => "signal",
            ExitReason::EndOfSeries => "end_of_series",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingMode {
    /// Aggressive fixed fraction, chosen when the run moved more than the volatility threshold.
    Fixed,
    /// Fraction adapts to the recent trade window.
    Dynamic,
}

impl SizingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMode::Fixed => "fixed",
            SizingMode::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit_loss: f64,
    pub size: f64,
    pub entry_index: usize,
    pub exit_index: usize,
    pub capital_at_entry: f64,
    pub exit_reason: ExitReason,
    pub sizing_mode: SizingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_profit_loss: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub long_profit: f64,
    pub short_profit: f64,
    pub num_long_trades: usize,
    pub num_short_trades: usize,
    pub run_volatility: f64,
    pub sizing_mode: SizingMode,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
}

/// Compact view of a run kept alongside optimizer trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub final_capital: f64,
    pub total_profit_loss: f64,
    pub total_trades: usize,
    pub win_rate: f64,
}

impl From<&RunResult> for RunSummary {
    fn from(result: &RunResult) -> Self {
        Self {
            final_capital: result.final_capital,
            total_profit_loss: result.total_profit_loss,
            total_trades: result.total_trades,
            win_rate: result.win_rate,
        }
    }
}

pub fn parameter_signature(parameters: &Parameters) -> String {
    parameters
        .iter()
        .map(|(key, value)| format!("{}={}", key, format_parameter_value(*value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Fixed-precision rendering with trailing zeros removed.
pub fn format_parameter_value(value: f64) -> String {
    let formatted = format!("{:.6}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn parse_parameter_assignment(raw: &str) -> Option<(String, f64)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim().trim_start_matches("--").replace('-', "_");
    if key.is_empty() {
        return None;
    }
    let value = value.trim().parse::<f64>().ok()?;
    value.is_finite().then_some((key, value))
}
