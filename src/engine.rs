use crate::config::{CostConfig, PositionConfig, RiskConfig, DEFAULT_INITIAL_CAPITAL};
use crate::error::{BacktestError, BacktestResult};
use crate::models::{
    Direction, ExitReason, PriceSeries, RunResult, SignalSet, SizingMode, TradeRecord,
};
use crate::trading_rules::{
    entry_fill_price, exit_fill_price, fixed_stop_price, profit_loss, protective_exit,
    sizing_mode_for, take_profit_price, trailing_stop_price, PositionSizer, ProtectiveLevels,
    RecentPerformanceWindow,
};
use std::ops::ControlFlow;

/// Receives realized profit after every simulated bar and may stop the run.
pub trait RunObserver {
    fn on_bar(&mut self, bar: usize, realized_profit_loss: f64) -> ControlFlow<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    #[inline(always)]
    fn on_bar(&mut self, _bar: usize, _realized_profit_loss: f64) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

impl<F> RunObserver for F
where
    F: FnMut(usize, f64) -> ControlFlow<()>,
{
    fn on_bar(&mut self, bar: usize, realized_profit_loss: f64) -> ControlFlow<()> {
        self(bar, realized_profit_loss)
    }
}

/// Values fixed for the whole run, computed once before the bar loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunContext {
    pub run_volatility: f64,
    pub sizing_mode: SizingMode,
    pub last_index: usize,
}

impl RunContext {
    pub fn new(prices: &PriceSeries, position: &PositionConfig) -> Self {
        let run_volatility = prices.run_volatility();
        Self {
            run_volatility,
            sizing_mode: sizing_mode_for(run_volatility, position),
            last_index: prices.len().saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone)]
struct OpenPosition {
    direction: Direction,
    entry_price: f64,
    size: f64,
    extreme_price: f64,
    fixed_stop: f64,
    take_profit: f64,
    entry_index: usize,
    capital_at_entry: f64,
}

impl OpenPosition {
    fn track_extreme(&mut self, close: f64) {
        self.extreme_price = match self.direction {
            Direction::Long => self.extreme_price.max(close),
            Direction::Short => self.extreme_price.min(close),
        };
    }
}

struct RunLedger {
    capital: f64,
    total_profit_loss: f64,
    winning_trades: usize,
    losing_trades: usize,
    long_profit: f64,
    short_profit: f64,
    num_long_trades: usize,
    num_short_trades: usize,
    trades: Vec<TradeRecord>,
    window: RecentPerformanceWindow,
}

impl RunLedger {
    fn new(initial_capital: f64) -> Self {
        Self {
            capital: initial_capital,
            total_profit_loss: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            long_profit: 0.0,
            short_profit: 0.0,
            num_long_trades: 0,
            num_short_trades: 0,
            trades: Vec::new(),
            window: RecentPerformanceWindow::new(),
        }
    }

    fn record(&mut self, trade: TradeRecord, context: &RunContext) {
        let pnl = trade.profit_loss;
        self.capital += pnl;
        self.total_profit_loss += pnl;
        match trade.direction {
            Direction::Long => {
                self.long_profit += pnl;
                self.num_long_trades += 1;
            }
            Direction::Short => {
                self.short_profit += pnl;
                self.num_short_trades += 1;
            }
        }
        if pnl > 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
        if context.sizing_mode == SizingMode::Dynamic {
            self.window.push(pnl);
        }
        self.trades.push(trade);
    }

    fn into_result(self, initial_capital: f64, context: &RunContext) -> RunResult {
        let total_trades = self.trades.len();
        let win_rate = if total_trades > 0 {
            self.winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };
        RunResult {
            initial_capital,
            final_capital: self.capital,
            total_profit_loss: self.total_profit_loss,
            total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            win_rate,
            long_profit: self.long_profit,
            short_profit: self.short_profit,
            num_long_trades: self.num_long_trades,
            num_short_trades: self.num_short_trades,
            run_volatility: context.run_volatility,
            sizing_mode: context.sizing_mode,
            trades: self.trades,
        }
    }
}

/// Single-position bar replay with hybrid sizing and protective exits.
#[derive(Debug, Clone)]
pub struct Backtester {
    pub risk: RiskConfig,
    pub costs: CostConfig,
    pub position: PositionConfig,
    pub initial_capital: f64,
    pub required_history: usize,
}

impl Backtester {
    pub fn new(risk: RiskConfig, costs: CostConfig) -> Self {
        Self {
            risk,
            costs,
            position: PositionConfig::default(),
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            required_history: 0,
        }
    }

    pub fn with_position_config(mut self, position: PositionConfig) -> Self {
        self.position = position;
        self
    }

    pub fn with_initial_capital(mut self, initial_capital: f64) -> Self {
        self.initial_capital = initial_capital;
        self
    }

    /// Bars of history the signal lookbacks need; runs on shorter series fail.
    pub fn with_required_history(mut self, required_history: usize) -> Self {
        self.required_history = required_history;
        self
    }

    pub fn run(&self, prices: &PriceSeries, signals: &SignalSet) -> BacktestResult<RunResult> {
        self.run_observed(prices, signals, &mut NoopObserver)
    }

    pub fn run_observed<O: RunObserver>(
        &self,
        prices: &PriceSeries,
        signals: &SignalSet,
        observer: &mut O,
    ) -> BacktestResult<RunResult> {
        self.validate(prices, signals)?;

        let context = RunContext::new(prices, &self.position);
        let sizer = PositionSizer::new(self.position);
        let closes = prices.as_slice();
        let mut ledger = RunLedger::new(self.initial_capital);
        let mut open: Option<OpenPosition> = None;

        for (i, &close) in closes.iter().enumerate() {
            let forced_exit = match open.as_mut() {
                Some(position) => {
                    position.track_extreme(close);
                    let trailing = trailing_stop_price(
                        position.extreme_price,
                        signals.atr[i],
                        self.risk.atr_multiple,
                        position.direction,
                    );
                    protective_exit(
                        position.direction,
                        close,
                        &ProtectiveLevels {
                            trailing_stop: trailing,
                            fixed_stop: position.fixed_stop,
                            take_profit: position.take_profit,
                        },
                    )
                }
                None => None,
            };

            if open.is_none() && ledger.capital > 0.0 {
                let direction = if signals.long_entry[i] {
                    Some(Direction::Long)
                } else if signals.short_entry[i] {
                    Some(Direction::Short)
                } else {
                    None
                };
                if let Some(direction) = direction {
                    open = Some(self.open_position(
                        direction,
                        close,
                        i,
                        ledger.capital,
                        sizer.fraction_for(context.sizing_mode, &ledger.window),
                    ));
                }
            }

            if let Some(position) = open.as_ref() {
                let exit_reason = forced_exit.or_else(|| {
                    if signals.exit_flagged(position.direction, i) {
                        Some(ExitReason::Signal)
                    } else if i == context.last_index {
                        Some(ExitReason::EndOfSeries)
                    } else {
                        None
                    }
                });
                if let Some(reason) = exit_reason {
                    if let Some(position) = open.take() {
                        let trade = self.close_position(position, close, i, reason, &context);
                        ledger.record(trade, &context);
                    }
                }
            }

            if observer.on_bar(i, ledger.total_profit_loss).is_break() {
                return Err(BacktestError::Halted { bar: i });
            }
        }

        if !ledger.capital.is_finite() {
            return Err(BacktestError::NumericAnomaly(format!(
                "final capital is not finite ({})",
                ledger.capital
            )));
        }

        Ok(ledger.into_result(self.initial_capital, &context))
    }

    fn open_position(
        &self,
        direction: Direction,
        close: f64,
        index: usize,
        capital: f64,
        fraction: f64,
    ) -> OpenPosition {
        let entry_price = entry_fill_price(close, direction, &self.costs);
        let size = (capital * fraction).clamp(
            capital * self.position.min_percentage,
            capital * self.position.max_percentage,
        );
        let fixed_stop =
            fixed_stop_price(entry_price, direction, self.risk.fixed_stop_loss_percentage);
        let take_profit = take_profit_price(
            entry_price,
            fixed_stop,
            direction,
            self.risk.take_profit_multiple,
        );
        OpenPosition {
            direction,
            entry_price,
            size,
            extreme_price: entry_price,
            fixed_stop,
            take_profit,
            entry_index: index,
            capital_at_entry: capital,
        }
    }

    fn close_position(
        &self,
        position: OpenPosition,
        close: f64,
        index: usize,
        reason: ExitReason,
        context: &RunContext,
    ) -> TradeRecord {
        let exit_price = exit_fill_price(close, position.direction, &self.costs);
        TradeRecord {
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            profit_loss: profit_loss(
                position.direction,
                position.entry_price,
                exit_price,
                position.size,
            ),
            size: position.size,
            entry_index: position.entry_index,
            exit_index: index,
            capital_at_entry: position.capital_at_entry,
            exit_reason: reason,
            sizing_mode: context.sizing_mode,
        }
    }

    fn validate(&self, prices: &PriceSeries, signals: &SignalSet) -> BacktestResult<()> {
        if prices.is_empty() {
            return Err(BacktestError::invalid_input("price series is empty"));
        }
        let lengths = signals.lengths();
        if lengths.iter().any(|&len| len != prices.len()) {
            return Err(BacktestError::invalid_input(format!(
                "signal lengths {:?} do not match {} prices",
                lengths,
                prices.len()
            )));
        }
        if let Some((index, price)) = prices
            .as_slice()
            .iter()
            .enumerate()
            .find(|(_, price)| !price.is_finite() || **price <= 0.0)
        {
            return Err(BacktestError::invalid_input(format!(
                "price at bar {} must be finite and positive (value: {})",
                index, price
            )));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::invalid_input(format!(
                "initial capital must be finite and positive (value: {})",
                self.initial_capital
            )));
        }
        self.costs.validate()?;
        self.risk.validate()?;
        self.position.validate()?;
        if self.required_history > prices.len() {
            return Err(BacktestError::InsufficientData {
                required: self.required_history,
                available: prices.len(),
            });
        }
        Ok(())
    }
}

/// Runs one backtest with default position sizing and capital.
pub fn run_backtest(
    prices: &PriceSeries,
    signals: &SignalSet,
    risk: RiskConfig,
    costs: CostConfig,
) -> BacktestResult<RunResult> {
    Backtester::new(risk, costs).run(prices, signals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising_series(bars: usize, step: f64) -> PriceSeries {
        PriceSeries::new((0..bars).map(|i| 100.0 * (1.0 + step).powi(i as i32)).collect())
    }

    fn no_cost() -> CostConfig {
        CostConfig {
            spread_percentage: 0.0,
            slippage_percentage: 0.0,
        }
    }

    fn wide_risk() -> RiskConfig {
        RiskConfig {
            atr_multiple: 0.0,
            fixed_stop_loss_percentage: 0.5,
            take_profit_multiple: 100.0,
        }
    }

    /// Flat-ish series with alternating entries and exits for many trades.
    fn choppy_fixture() -> (PriceSeries, SignalSet) {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i as f64) * 0.7).sin() * 3.0)
            .collect();
        let mut signals = SignalSet::empty(closes.len());
        for i in 0..closes.len() {
            match i % 6 {
                0 => signals.long_entry[i] = true,
                2 => signals.long_exit[i] = true,
                3 => signals.short_entry[i] = true,
                5 => signals.short_exit[i] = true,
                _ => {}
            }
            signals.atr[i] = if i % 4 == 0 { 0.0 } else { 1.2 };
        }
        (PriceSeries::new(closes), signals)
    }

    #[test]
    fn rising_series_closes_single_long_at_take_profit() {
        let prices = rising_series(50, 0.01);
        let mut signals = SignalSet::empty(50);
        signals.long_entry[0] = true;
        signals.long_exit[49] = true;
        let backtester = Backtester::new(
            RiskConfig {
                atr_multiple: 0.0,
                fixed_stop_loss_percentage: 0.05,
                take_profit_multiple: 3.0,
            },
            CostConfig {
                spread_percentage: 0.01,
                slippage_percentage: 0.0,
            },
        );

        let result = backtester.run(&prices, &signals).unwrap();

        assert_eq!(result.total_trades, 1);
        let trade = &result.trades[0];
        assert_eq!(trade.direction, Direction::Long);
        assert!(trade.profit_loss > 0.0);
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(trade.exit_index, 16);
        assert!((trade.entry_price - 101.0).abs() < 1e-9);
        assert_eq!(result.num_long_trades, 1);
        assert_eq!(result.num_short_trades, 0);
    }

    #[test]
    fn no_entries_once_capital_is_gone() {
        let prices = PriceSeries::new(vec![10.0, 30.0, 30.0, 30.0]);
        let mut signals = SignalSet::empty(4);
        signals.short_entry[0] = true;
        signals.long_entry[2] = true;
        let risk = RiskConfig {
            atr_multiple: 0.0,
            fixed_stop_loss_percentage: 0.999,
            take_profit_multiple: 1.0,
        };

        let result = Backtester::new(risk, no_cost()).run(&prices, &signals).unwrap();

        assert_eq!(result.sizing_mode, SizingMode::Fixed);
        assert_eq!(result.total_trades, 1);
        assert_eq!(result.trades[0].direction, Direction::Short);
        assert_eq!(result.trades[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(result.trades[0].exit_index, 1);
        assert!(result.final_capital <= 0.0);
        assert_eq!(result.num_long_trades, 0);
    }

    #[test]
    fn open_position_is_liquidated_on_last_bar() {
        let prices = rising_series(10, 0.001);
        let mut signals = SignalSet::empty(10);
        signals.short_entry[3] = true;

        let result = Backtester::new(wide_risk(), no_cost())
            .run(&prices, &signals)
            .unwrap();

        assert_eq!(result.total_trades, 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfSeries);
        assert_eq!(result.trades[0].exit_index, 9);
        assert!(result.trades[0].profit_loss < 0.0);
    }

    #[test]
    fn entry_on_last_bar_closes_immediately() {
        let prices = rising_series(5, 0.01);
        let mut signals = SignalSet::empty(5);
        signals.long_entry[4] = true;

        let result = Backtester::new(wide_risk(), CostConfig::default())
            .run(&prices, &signals)
            .unwrap();

        assert_eq!(result.total_trades, 1);
        let trade = &result.trades[0];
        assert_eq!(trade.entry_index, 4);
        assert_eq!(trade.exit_index, 4);
        assert!(trade.profit_loss < 0.0);
    }

    #[test]
    fn profit_loss_sums_to_total() {
        let (prices, signals) = choppy_fixture();
        let result = Backtester::new(RiskConfig::default(), CostConfig::default())
            .run(&prices, &signals)
            .unwrap();

        assert!(result.total_trades > 3);
        let sum: f64 = result.trades.iter().map(|t| t.profit_loss).sum();
        assert_eq!(sum, result.total_profit_loss);
        assert_eq!(
            result.total_trades,
            result.winning_trades + result.losing_trades
        );
        assert!(
            (result.final_capital - result.initial_capital - result.total_profit_loss).abs()
                < 1e-9
        );
    }

    #[test]
    fn never_holds_overlapping_positions() {
        let (prices, signals) = choppy_fixture();
        let result = Backtester::new(RiskConfig::default(), CostConfig::default())
            .run(&prices, &signals)
            .unwrap();

        for pair in result.trades.windows(2) {
            assert!(pair[0].entry_index <= pair[0].exit_index);
            assert!(pair[0].exit_index < pair[1].entry_index);
        }
    }

    #[test]
    fn position_size_stays_within_capital_bounds() {
        let (prices, signals) = choppy_fixture();
        let position = PositionConfig::default();
        let result = Backtester::new(RiskConfig::default(), CostConfig::default())
            .run(&prices, &signals)
            .unwrap();

        for trade in &result.trades {
            let min = position.min_percentage * trade.capital_at_entry;
            let max = position.max_percentage * trade.capital_at_entry;
            assert!(trade.size >= min - 1e-9 && trade.size <= max + 1e-9);
        }
    }

    #[test]
    fn volatile_run_uses_fixed_fraction() {
        let prices = rising_series(40, 0.02);
        let mut signals = SignalSet::empty(40);
        for i in (0..40).step_by(4) {
            signals.long_entry[i] = true;
            signals.long_exit[i + 1] = true;
        }

        let result = Backtester::new(wide_risk(), CostConfig::default())
            .run(&prices, &signals)
            .unwrap();

        assert!(result.run_volatility > 0.20);
        assert_eq!(result.sizing_mode, SizingMode::Fixed);
        assert_eq!(result.total_trades, 10);
        for trade in &result.trades {
            assert_eq!(trade.sizing_mode, SizingMode::Fixed);
            assert!((trade.size - 0.95 * trade.capital_at_entry).abs() < 1e-9);
        }
    }

    #[test]
    fn calm_run_adapts_fraction_to_recent_losses() {
        // spread makes every round trip on a flat series lose
        let prices = PriceSeries::new(vec![100.0; 20]);
        let mut signals = SignalSet::empty(20);
        for i in (0..20).step_by(2) {
            signals.long_entry[i] = true;
            signals.long_exit[i + 1] = true;
        }

        let result = Backtester::new(wide_risk(), CostConfig::default())
            .run(&prices, &signals)
            .unwrap();

        assert_eq!(result.sizing_mode, SizingMode::Dynamic);
        let fractions: Vec<f64> = result
            .trades
            .iter()
            .map(|t| t.size / t.capital_at_entry)
            .collect();
        assert!((fractions[0] - 0.20).abs() < 1e-9);
        assert!((fractions[1] - 0.20).abs() < 1e-9);
        assert!((fractions[2] - 0.20).abs() < 1e-9);
        assert!((fractions[3] - 0.06).abs() < 1e-9);
        assert!((fractions[9] - 0.06).abs() < 1e-9);
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let (prices, signals) = choppy_fixture();
        let backtester = Backtester::new(RiskConfig::default(), CostConfig::default());
        let first = backtester.run(&prices, &signals).unwrap();
        let second = backtester.run(&prices, &signals).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.final_capital.to_bits(),
            second.final_capital.to_bits()
        );
    }

    #[test]
    fn trailing_stop_takes_priority_over_stop_loss() {
        let prices = PriceSeries::new(vec![100.0, 110.0, 90.0, 95.0]);
        let mut signals = SignalSet::empty(4);
        signals.long_entry[0] = true;
        signals.atr = vec![0.0, 0.0, 1.0, 0.0];
        let risk = RiskConfig {
            atr_multiple: 2.0,
            fixed_stop_loss_percentage: 0.05,
            take_profit_multiple: 10.0,
        };

        let result = Backtester::new(risk, no_cost()).run(&prices, &signals).unwrap();

        assert_eq!(result.total_trades, 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::TrailingStop);
        assert_eq!(result.trades[0].exit_index, 2);
    }

    #[test]
    fn trailing_stop_ignored_on_bars_without_atr() {
        let prices = PriceSeries::new(vec![100.0, 110.0, 105.0, 104.0]);
        let mut signals = SignalSet::empty(4);
        signals.long_entry[0] = true;
        signals.atr = vec![0.0, 1.0, 0.0, f64::NAN];
        let risk = RiskConfig {
            atr_multiple: 1.0,
            fixed_stop_loss_percentage: 0.5,
            take_profit_multiple: 10.0,
        };

        let result = Backtester::new(risk, no_cost()).run(&prices, &signals).unwrap();

        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfSeries);
    }

    #[test]
    fn short_stop_loss_fires_on_rally() {
        let prices = PriceSeries::new(vec![100.0, 101.0, 103.0, 99.0]);
        let mut signals = SignalSet::empty(4);
        signals.short_entry[0] = true;
        let risk = RiskConfig {
            atr_multiple: 0.0,
            fixed_stop_loss_percentage: 0.02,
            take_profit_multiple: 2.0,
        };

        let result = Backtester::new(risk, no_cost()).run(&prices, &signals).unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.direction, Direction::Short);
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_index, 2);
        assert!(trade.profit_loss < 0.0);
        assert!((result.short_profit - trade.profit_loss).abs() < 1e-12);
    }

    #[test]
    fn no_reentry_on_exit_bar() {
        let prices = PriceSeries::new(vec![100.0, 100.0, 100.0, 100.0]);
        let mut signals = SignalSet::empty(4);
        signals.long_entry = vec![true, true, true, false];
        signals.long_exit[1] = true;

        let result = Backtester::new(wide_risk(), no_cost())
            .run(&prices, &signals)
            .unwrap();

        assert_eq!(result.total_trades, 2);
        assert_eq!(result.trades[0].exit_index, 1);
        assert_eq!(result.trades[1].entry_index, 2);
    }

    #[test]
    fn rejects_malformed_inputs() {
        let backtester = Backtester::new(RiskConfig::default(), CostConfig::default());

        let empty = backtester.run(&PriceSeries::new(vec![]), &SignalSet::empty(0));
        assert!(matches!(empty, Err(BacktestError::InvalidInput(_))));

        let prices = rising_series(5, 0.01);
        let mismatched = backtester.run(&prices, &SignalSet::empty(4));
        assert!(matches!(mismatched, Err(BacktestError::InvalidInput(_))));

        let mut signals = SignalSet::empty(5);
        signals.atr.pop();
        assert!(matches!(
            backtester.run(&prices, &signals),
            Err(BacktestError::InvalidInput(_))
        ));

        let bad_price = PriceSeries::new(vec![100.0, 0.0, 101.0]);
        assert!(matches!(
            backtester.run(&bad_price, &SignalSet::empty(3)),
            Err(BacktestError::InvalidInput(_))
        ));

        let costly = Backtester::new(
            RiskConfig::default(),
            CostConfig {
                spread_percentage: 0.7,
                slippage_percentage: 0.3,
            },
        );
        assert!(matches!(
            costly.run(&prices, &SignalSet::empty(5)),
            Err(BacktestError::InvalidInput(_))
        ));
    }

    #[test]
    fn insufficient_history_is_reported() {
        let prices = rising_series(10, 0.01);
        let result = Backtester::new(RiskConfig::default(), CostConfig::default())
            .with_required_history(30)
            .run(&prices, &SignalSet::empty(10));
        assert_eq!(
            result,
            Err(BacktestError::InsufficientData {
                required: 30,
                available: 10
            })
        );
    }

    #[test]
    fn observer_can_halt_run() {
        let (prices, signals) = choppy_fixture();
        let backtester = Backtester::new(RiskConfig::default(), CostConfig::default());
        let mut seen = 0usize;
        let mut observer = |bar: usize, _pnl: f64| {
            seen += 1;
            if bar == 20 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        let result = backtester.run_observed(&prices, &signals, &mut observer);

        assert_eq!(result, Err(BacktestError::Halted { bar: 20 }));
        assert_eq!(seen, 21);
    }

    #[test]
    fn observer_sees_realized_profit() {
        let (prices, signals) = choppy_fixture();
        let backtester = Backtester::new(RiskConfig::default(), CostConfig::default());
        let mut last_seen = f64::NAN;
        let mut observer = |_bar: usize, pnl: f64| {
            last_seen = pnl;
            ControlFlow::Continue(())
        };

        let result = backtester
            .run_observed(&prices, &signals, &mut observer)
            .unwrap();

        assert_eq!(last_seen, result.total_profit_loss);
    }

    #[test]
    fn run_backtest_uses_default_capital() {
        let prices = rising_series(50, 0.01);
        let mut signals = SignalSet::empty(50);
        signals.long_entry[0] = true;
        let result = run_backtest(&prices, &signals, wide_risk(), no_cost()).unwrap();
        assert_eq!(result.initial_capital, DEFAULT_INITIAL_CAPITAL);
        assert_eq!(result.total_trades, 1);
    }
}
