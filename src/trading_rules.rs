use crate::config::{CostConfig, PositionConfig};
use crate::models::{Direction, ExitReason, SizingMode};
use std::collections::VecDeque;

pub const PERFORMANCE_WINDOW_CAPACITY: usize = 5;
pub const SIZING_LOOKBACK: usize = 3;
pub const STRONG_AVERAGE_PROFIT: f64 = 5.0;

/// Bounded FIFO of the most recent closed-trade results.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentPerformanceWindow {
    values: VecDeque<f64>,
}

impl Default for RecentPerformanceWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentPerformanceWindow {
    pub fn new() -> Self {
        Self {
            values: VecDeque::with_capacity(PERFORMANCE_WINDOW_CAPACITY),
        }
    }

    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut window = Self::new();
        for value in values {
            window.push(value);
        }
        window
    }

    /// Appends a result, returning the evicted oldest value when full.
    pub fn push(&mut self, profit_loss: f64) -> Option<f64> {
        let evicted = if self.values.len() == PERFORMANCE_WINDOW_CAPACITY {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(profit_loss);
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Up to `count` most recent values, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = f64> + '_ {
        let skip = self.values.len().saturating_sub(count);
        self.values.iter().skip(skip).copied()
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    config: PositionConfig,
}

impl PositionSizer {
    pub fn new(config: PositionConfig) -> Self {
        Self { config }
    }

    /// Multiplier applied to the base percentage, first matching rule wins.
    pub fn multiplier(&self, window: &RecentPerformanceWindow) -> f64 {
        if window.len() < 2 {
            return 1.0;
        }

        let recent: Vec<f64> = window.recent(SIZING_LOOKBACK).collect();
        let average = recent.iter().sum::<f64>() / recent.len() as f64;
        let profitable = recent.iter().filter(|&&pnl| pnl > 0.0).count();

        if average > STRONG_AVERAGE_PROFIT {
            2.0
        } else if profitable >= 2 {
            1.8
        } else if profitable == 1 {
            1.0
        } else if recent.len() >= SIZING_LOOKBACK {
            0.3
        } else {
            1.0
        }
    }

    pub fn raw_fraction(&self, window: &RecentPerformanceWindow) -> f64 {
        self.config.base_percentage * self.multiplier(window)
    }

    pub fn fraction(&self, window: &RecentPerformanceWindow) -> f64 {
        self.clamp(self.raw_fraction(window))
    }

    /// Capital fraction for the next entry under the run's sizing mode.
    pub fn fraction_for(&self, mode: SizingMode, window: &RecentPerformanceWindow) -> f64 {
        match mode {
            SizingMode::Fixed => self.clamp(self.config.fixed_percentage),
            SizingMode::Dynamic => self.fraction(window),
        }
    }

    fn clamp(&self, fraction: f64) -> f64 {
        fraction.clamp(self.config.min_percentage, self.config.max_percentage)
    }
}

pub fn sizing_mode_for(run_volatility: f64, config: &PositionConfig) -> SizingMode {
    if run_volatility > config.volatility_threshold {
        SizingMode::Fixed
    } else {
        SizingMode::Dynamic
    }
}

pub fn entry_fill_price(close: f64, direction: Direction, costs: &CostConfig) -> f64 {
    close * (1.0 + direction.sign() * costs.total())
}

pub fn exit_fill_price(close: f64, direction: Direction, costs: &CostConfig) -> f64 {
    close * (1.0 - direction.sign() * costs.total())
}

pub fn profit_loss(direction: Direction, entry_price: f64, exit_price: f64, size: f64) -> f64 {
    direction.sign() * (exit_price - entry_price) / entry_price * size
}

pub fn fixed_stop_price(entry_price: f64, direction: Direction, stop_loss_percentage: f64) -> f64 {
    entry_price - direction.sign() * entry_price * stop_loss_percentage
}

pub fn take_profit_price(
    entry_price: f64,
    stop_price: f64,
    direction: Direction,
    take_profit_multiple: f64,
) -> f64 {
    let risk_amount = (entry_price - stop_price).abs();
    entry_price + direction.sign() * risk_amount * take_profit_multiple
}

/// Trailing level for the bar, or `None` when ATR is unavailable.
pub fn trailing_stop_price(
    extreme_price: f64,
    atr: f64,
    atr_multiple: f64,
    direction: Direction,
) -> Option<f64> {
    if atr.is_finite() && atr > 0.0 {
        Some(extreme_price - direction.sign() * atr * atr_multiple)
    } else {
        None
    }
}

pub struct ProtectiveLevels {
    pub trailing_stop: Option<f64>,
    pub fixed_stop: f64,
    pub take_profit: f64,
}

/// Checked in order trailing stop, stop loss, take profit.
pub fn protective_exit(
    direction: Direction,
    close: f64,
    levels: &ProtectiveLevels,
) -> Option<ExitReason> {
    let trailing_hit = levels.trailing_stop.map_or(false, |stop| match direction {
        Direction::Long => close < stop,
        Direction::Short => close > stop,
    });
    if trailing_hit {
        return Some(ExitReason::TrailingStop);
    }

    let (stop_hit, target_hit) = match direction {
        Direction::Long => (close <= levels.fixed_stop, close >= levels.take_profit),
        Direction::Short => (close >= levels.fixed_stop, close <= levels.take_profit),
    };
    if stop_hit {
        Some(ExitReason::StopLoss)
    } else if target_hit {
        Some(ExitReason::TakeProfit)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(PositionConfig::default())
    }

    #[test]
    fn window_evicts_oldest_at_capacity() {
        let mut window = RecentPerformanceWindow::new();
        for value in 1..=5 {
            assert_eq!(window.push(value as f64), None);
        }
        assert_eq!(window.push(6.0), Some(1.0));
        assert_eq!(window.values(), vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(window.recent(3).collect::<Vec<_>>(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn strong_average_doubles_base() {
        let window = RecentPerformanceWindow::from_values([10.0, 10.0, 10.0]);
        assert!((sizer().raw_fraction(&window) - 0.40).abs() < 1e-12);
    }

    #[test]
    fn three_losses_shrink_base() {
        let window = RecentPerformanceWindow::from_values([-1.0, -1.0, -1.0]);
        assert!((sizer().raw_fraction(&window) - 0.06).abs() < 1e-12);
        assert!((sizer().fraction(&window) - 0.06).abs() < 1e-12);
    }

    #[test]
    fn rule_table_order() {
        let s = sizer();
        assert_eq!(s.multiplier(&RecentPerformanceWindow::new()), 1.0);
        assert_eq!(s.multiplier(&RecentPerformanceWindow::from_values([50.0])), 1.0);
        assert_eq!(
            s.multiplier(&RecentPerformanceWindow::from_values([1.0, 2.0, -0.5])),
            1.8
        );
        assert_eq!(
            s.multiplier(&RecentPerformanceWindow::from_values([1.0, -2.0, -0.5])),
            1.0
        );
        // two recorded losses fall through to the fallback
        assert_eq!(
            s.multiplier(&RecentPerformanceWindow::from_values([-1.0, -1.0])),
            1.0
        );
        // only the last three count
        assert_eq!(
            s.multiplier(&RecentPerformanceWindow::from_values([100.0, 100.0, -1.0, -1.0, -1.0])),
            0.3
        );
    }

    #[test]
    fn fraction_is_clamped() {
        let config = PositionConfig {
            base_percentage: 0.6,
            ..PositionConfig::default()
        };
        let window = RecentPerformanceWindow::from_values([10.0, 10.0, 10.0]);
        assert_eq!(PositionSizer::new(config).fraction(&window), 0.95);

        let config = PositionConfig {
            base_percentage: 0.1,
            ..PositionConfig::default()
        };
        let window = RecentPerformanceWindow::from_values([-1.0, -1.0, -1.0]);
        assert_eq!(PositionSizer::new(config).fraction(&window), 0.05);
    }

    #[test]
    fn fixed_mode_ignores_window() {
        let window = RecentPerformanceWindow::from_values([-1.0, -1.0, -1.0]);
        assert_eq!(sizer().fraction_for(SizingMode::Fixed, &window), 0.95);
        assert_eq!(sizing_mode_for(0.25, &PositionConfig::default()), SizingMode::Fixed);
        assert_eq!(sizing_mode_for(0.20, &PositionConfig::default()), SizingMode::Dynamic);
    }

    #[test]
    fn fills_apply_costs_once_in_opposite_directions() {
        let costs = CostConfig {
            spread_percentage: 0.01,
            slippage_percentage: 0.005,
        };
        assert!((entry_fill_price(100.0, Direction::Long, &costs) - 101.5).abs() < 1e-9);
        assert!((entry_fill_price(100.0, Direction::Short, &costs) - 98.5).abs() < 1e-9);
        assert!((exit_fill_price(100.0, Direction::Long, &costs) - 98.5).abs() < 1e-9);
        assert!((exit_fill_price(100.0, Direction::Short, &costs) - 101.5).abs() < 1e-9);
    }

    #[test]
    fn profit_loss_sign_follows_direction() {
        assert!((profit_loss(Direction::Long, 100.0, 110.0, 50.0) - 5.0).abs() < 1e-12);
        assert!((profit_loss(Direction::Short, 100.0, 110.0, 50.0) + 5.0).abs() < 1e-12);
    }

    #[test]
    fn stop_and_target_levels() {
        let stop = fixed_stop_price(100.0, Direction::Long, 0.05);
        assert!((stop - 95.0).abs() < 1e-12);
        assert!((take_profit_price(100.0, stop, Direction::Long, 3.0) - 115.0).abs() < 1e-12);

        let stop = fixed_stop_price(100.0, Direction::Short, 0.05);
        assert!((stop - 105.0).abs() < 1e-12);
        assert!((take_profit_price(100.0, stop, Direction::Short, 3.0) - 85.0).abs() < 1e-12);
    }

    #[test]
    fn trailing_stop_inactive_without_atr() {
        assert_eq!(trailing_stop_price(110.0, 0.0, 2.0, Direction::Long), None);
        assert_eq!(trailing_stop_price(110.0, f64::NAN, 2.0, Direction::Long), None);
        assert_eq!(trailing_stop_price(110.0, 1.5, 2.0, Direction::Long), Some(107.0));
        assert_eq!(trailing_stop_price(90.0, 1.5, 2.0, Direction::Short), Some(93.0));
    }

    #[test]
    fn trailing_stop_wins_when_several_levels_cross() {
        let levels = ProtectiveLevels {
            trailing_stop: Some(99.0),
            fixed_stop: 98.0,
            take_profit: 120.0,
        };
        assert_eq!(
            protective_exit(Direction::Long, 97.0, &levels),
            Some(ExitReason::TrailingStop)
        );
        let levels = ProtectiveLevels {
            trailing_stop: None,
            ..levels
        };
        assert_eq!(
            protective_exit(Direction::Long, 97.0, &levels),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(
            protective_exit(Direction::Long, 121.0, &levels),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(protective_exit(Direction::Long, 105.0, &levels), None);
    }

    #[test]
    fn short_protective_exits_mirror_long() {
        let levels = ProtectiveLevels {
            trailing_stop: Some(104.0),
            fixed_stop: 105.0,
            take_profit: 85.0,
        };
        assert_eq!(
            protective_exit(Direction::Short, 104.5, &levels),
            Some(ExitReason::TrailingStop)
        );
        assert_eq!(
            protective_exit(Direction::Short, 84.0, &levels),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(protective_exit(Direction::Short, 100.0, &levels), None);
    }
}
