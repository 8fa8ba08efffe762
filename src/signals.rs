use crate::error::{BacktestError, BacktestResult};
use crate::indicators::{
    calculate_adx, calculate_atr, calculate_bollinger_bands, calculate_ema, calculate_macd,
    calculate_rsi, calculate_sma, AdxOutput,
};
use crate::models::{Bar, Parameters, SignalSet};
use crate::param_utils::{get_param_f64_clamped, get_param_usize_rounded_clamped};
use anyhow::{anyhow, Result};

const MAX_PERIOD: usize = 10_000;

/// Turns bars and strategy parameters into index-aligned trade signals.
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &str;

    fn signals(&self, bars: &[Bar], params: &Parameters) -> BacktestResult<SignalSet>;

    /// Bars of history the signals need before they mean anything.
    fn required_history(&self, params: &Parameters) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalRule {
    SmaCrossover,
    SmaCrossunder,
    EmaCrossover,
    EmaCrossunder,
    RsiIsOverbought,
    RsiIsNotOverbought,
    RsiIsOversold,
    RsiIsNotOversold,
    MacdIsBullish,
    MacdIsBearish,
    PriceBreaksUpperBand,
    PriceBreaksLowerBand,
    PriceCrossesMiddleBandFromTop,
    PriceCrossesMiddleBandFromBottom,
    AdxUptrendConfirmed,
    AdxDowntrendConfirmed,
    AllTriggersLongOr,
    AllTriggersShortOr,
    AllVerificatorsLongOr,
    AllVerificatorsShortOr,
    AllExitsLongOr,
    AllExitsShortOr,
}

impl SignalRule {
    pub const ALL: [SignalRule; 22] = [
        SignalRule::SmaCrossover,
        SignalRule::SmaCrossunder,
        SignalRule::EmaCrossover,
        SignalRule::EmaCrossunder,
        SignalRule::RsiIsOverbought,
        SignalRule::RsiIsNotOverbought,
        SignalRule::RsiIsOversold,
        SignalRule::RsiIsNotOversold,
        SignalRule::MacdIsBullish,
        SignalRule::MacdIsBearish,
        SignalRule::PriceBreaksUpperBand,
        SignalRule::PriceBreaksLowerBand,
        SignalRule::PriceCrossesMiddleBandFromTop,
        SignalRule::PriceCrossesMiddleBandFromBottom,
        SignalRule::AdxUptrendConfirmed,
        SignalRule::AdxDowntrendConfirmed,
        SignalRule::AllTriggersLongOr,
        SignalRule::AllTriggersShortOr,
        SignalRule::AllVerificatorsLongOr,
        SignalRule::AllVerificatorsShortOr,
        SignalRule::AllExitsLongOr,
        SignalRule::AllExitsShortOr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalRule::SmaCrossover => "sma_crossover",
            SignalRule::SmaCrossunder => "sma_crossunder",
            SignalRule::EmaCrossover => "ema_crossover",
            SignalRule::EmaCrossunder => "ema_crossunder",
            SignalRule::RsiIsOverbought => "rsi_is_overbought",
            SignalRule::RsiIsNotOverbought => "rsi_is_not_overbought",
            SignalRule::RsiIsOversold => "rsi_is_oversold",
            SignalRule::RsiIsNotOversold => "rsi_is_not_oversold",
            SignalRule::MacdIsBullish => "macd_is_bullish",
            SignalRule::MacdIsBearish => "macd_is_bearish",
            SignalRule::PriceBreaksUpperBand => "price_breaks_upper_band",
            SignalRule::PriceBreaksLowerBand => "price_breaks_lower_band",
            SignalRule::PriceCrossesMiddleBandFromTop => "price_crosses_middle_band_from_top",
            SignalRule::PriceCrossesMiddleBandFromBottom => {
                "price_crosses_middle_band_from_bottom"
            }
            SignalRule::AdxUptrendConfirmed => "adx_uptrend_confirmed",
            SignalRule::AdxDowntrendConfirmed => "adx_downtrend_confirmed",
            SignalRule::AllTriggersLongOr => "all_triggers_long_or",
            SignalRule::AllTriggersShortOr => "all_triggers_short_or",
            SignalRule::AllVerificatorsLongOr => "all_verificators_long_or",
            SignalRule::AllVerificatorsShortOr => "all_verificators_short_or",
            SignalRule::AllExitsLongOr => "all_exits_long_or",
            SignalRule::AllExitsShortOr => "all_exits_short_or",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|rule| rule.as_str() == name)
    }
}

/// Rule lists per leg; each leg fires when all of its rules hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPreset {
    pub name: &'static str,
    pub long_entry: Vec<SignalRule>,
    pub short_entry: Vec<SignalRule>,
    pub long_exit: Vec<SignalRule>,
    pub short_exit: Vec<SignalRule>,
}

impl StrategyPreset {
    pub const NAMES: [&'static str; 7] = [
        "Debug_Single_Long_Entry",
        "Debug_EMA_Only",
        "EMA_Only",
        "Strict",
        "BB_Breakout",
        "BB_RSI",
        "Combined_Trigger_Verifier",
    ];

    pub fn by_name(name: &str) -> Option<Self> {
        use SignalRule::*;
        let (name, long_entry, short_entry, long_exit, short_exit) = match name {
            "Debug_Single_Long_Entry" => (
                "Debug_Single_Long_Entry",
                vec![EmaCrossover],
                vec![],
                vec![],
                vec![],
            ),
            "Debug_EMA_Only" => (
                "Debug_EMA_Only",
                vec![EmaCrossover],
                vec![EmaCrossunder],
                vec![],
                vec![],
            ),
            "EMA_Only" => (
                "EMA_Only",
                vec![EmaCrossover],
                vec![EmaCrossunder],
                vec![EmaCrossunder],
                vec![EmaCrossover],
            ),
            "Strict" => (
                "Strict",
                vec![
                    AdxUptrendConfirmed,
                    SmaCrossover,
                    MacdIsBullish,
                    RsiIsNotOverbought,
                ],
                vec![
                    AdxDowntrendConfirmed,
                    SmaCrossunder,
                    MacdIsBearish,
                    RsiIsNotOversold,
                ],
                vec![SmaCrossunder],
                vec![SmaCrossover],
            ),
            "BB_Breakout" => (
                "BB_Breakout",
                vec![PriceBreaksUpperBand],
                vec![PriceBreaksLowerBand],
                vec![PriceCrossesMiddleBandFromTop],
                vec![PriceCrossesMiddleBandFromBottom],
            ),
            "BB_RSI" => (
                "BB_RSI",
                vec![PriceBreaksUpperBand, RsiIsNotOverbought],
                vec![PriceBreaksLowerBand, RsiIsNotOversold],
                vec![PriceCrossesMiddleBandFromTop],
                vec![PriceCrossesMiddleBandFromBottom],
            ),
            "Combined_Trigger_Verifier" => (
                "Combined_Trigger_Verifier",
                vec![AllTriggersLongOr, AllVerificatorsLongOr],
                vec![AllTriggersShortOr, AllVerificatorsShortOr],
                vec![AllExitsLongOr],
                vec![AllExitsShortOr],
            ),
            _ => return None,
        };
        Some(Self {
            name,
            long_entry,
            short_entry,
            long_exit,
            short_exit,
        })
    }

    fn rules(&self) -> impl Iterator<Item = SignalRule> + '_ {
        self.long_entry
            .iter()
            .chain(&self.short_entry)
            .chain(&self.long_exit)
            .chain(&self.short_exit)
            .copied()
    }
}

/// Indicator settings resolved from a parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSettings {
    pub short_sma_period: usize,
    pub long_sma_period: usize,
    pub short_ema_period: usize,
    pub long_ema_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub macd_fast_period: usize,
    pub macd_slow_period: usize,
    pub macd_signal_period: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub atr_period: usize,
    pub adx_period: usize,
    pub adx_threshold: f64,
}

impl IndicatorSettings {
    pub fn from_parameters(params: &Parameters) -> Self {
        let period = |key: &str, default: usize| {
            get_param_usize_rounded_clamped(params, key, default, 1, MAX_PERIOD)
        };
        Self {
            short_sma_period: period("short_sma_period", 10),
            long_sma_period: period("long_sma_period", 51),
            short_ema_period: period("short_ema_period", 10),
            long_ema_period: period("long_ema_period", 30),
            rsi_period: period("rsi_period", 14),
            rsi_overbought: get_param_f64_clamped(params, "rsi_overbought", 70.0, 0.0, 100.0),
            rsi_oversold: get_param_f64_clamped(params, "rsi_oversold", 30.0, 0.0, 100.0),
            macd_fast_period: period("macd_fast_period", 12),
            macd_slow_period: period("macd_slow_period", 26),
            macd_signal_period: period("macd_signal_period", 9),
            bb_period: period("bb_period", 20),
            bb_std_dev: get_param_f64_clamped(params, "bb_std_dev", 2.0, 0.0, 10.0),
            atr_period: period("atr_period", 14),
            adx_period: period("adx_period", 14),
            adx_threshold: get_param_f64_clamped(params, "adx_threshold", 20.0, 0.0, 100.0),
        }
    }

    fn lookback(&self, rule: SignalRule) -> usize {
        use SignalRule::*;
        match rule {
            SmaCrossover | SmaCrossunder => self.short_sma_period.max(self.long_sma_period),
            EmaCrossover | EmaCrossunder => self.short_ema_period.max(self.long_ema_period),
            RsiIsOverbought | RsiIsNotOverbought | RsiIsOversold | RsiIsNotOversold
            | AllVerificatorsLongOr | AllVerificatorsShortOr => self.rsi_period + 1,
            MacdIsBullish | MacdIsBearish => self.macd_fast_period.max(self.macd_slow_period),
            PriceBreaksUpperBand
            | PriceBreaksLowerBand
            | PriceCrossesMiddleBandFromTop
            | PriceCrossesMiddleBandFromBottom => self.bb_period,
            AdxUptrendConfirmed | AdxDowntrendConfirmed => self.adx_period + 1,
            AllTriggersLongOr | AllTriggersShortOr => self
                .short_sma_period
                .max(self.long_sma_period)
                .max(self.short_ema_period)
                .max(self.long_ema_period)
                .max(self.bb_period),
            AllExitsLongOr | AllExitsShortOr => self
                .short_sma_period
                .max(self.long_sma_period)
                .max(self.short_ema_period)
                .max(self.long_ema_period)
                .max(self.bb_period)
                .max(self.rsi_period + 1),
        }
    }
}

struct IndicatorFrame<'a> {
    settings: &'a IndicatorSettings,
    highs: Vec<f64>,
    lows: Vec<f64>,
    closes: Vec<f64>,
    short_sma: Vec<f64>,
    long_sma: Vec<f64>,
    short_ema: Vec<f64>,
    long_ema: Vec<f64>,
    rsi: Vec<f64>,
    macd_line: Vec<f64>,
    macd_signal: Vec<f64>,
    bb_upper: Vec<f64>,
    bb_middle: Vec<f64>,
    bb_lower: Vec<f64>,
    adx: Vec<AdxOutput>,
}

impl<'a> IndicatorFrame<'a> {
    fn new(bars: &[Bar], settings: &'a IndicatorSettings) -> Self {
        let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
        let highs: Vec<f64> = bars.iter().map(|bar| bar.high).collect();
        let lows: Vec<f64> = bars.iter().map(|bar| bar.low).collect();
        let macd = calculate_macd(
            &closes,
            settings.macd_fast_period,
            settings.macd_slow_period,
            settings.macd_signal_period,
        );
        let bands = calculate_bollinger_bands(&closes, settings.bb_period, settings.bb_std_dev);
        Self {
            settings,
            short_sma: calculate_sma(&closes, settings.short_sma_period),
            long_sma: calculate_sma(&closes, settings.long_sma_period),
            short_ema: calculate_ema(&closes, settings.short_ema_period),
            long_ema: calculate_ema(&closes, settings.long_ema_period),
            rsi: calculate_rsi(&closes, settings.rsi_period),
            macd_line: macd.line,
            macd_signal: macd.signal,
            bb_upper: bands.upper,
            bb_middle: bands.middle,
            bb_lower: bands.lower,
            adx: calculate_adx(&highs, &lows, &closes, settings.adx_period),
            highs,
            lows,
            closes,
        }
    }

    fn crossed_above(fast: &[f64], slow: &[f64], i: usize) -> bool {
        i > 0 && fast[i - 1] < slow[i - 1] && fast[i] > slow[i]
    }

    fn crossed_below(fast: &[f64], slow: &[f64], i: usize) -> bool {
        i > 0 && fast[i - 1] > slow[i - 1] && fast[i] < slow[i]
    }

    fn holds(&self, rule: SignalRule, i: usize) -> bool {
        use SignalRule::*;
        let s = self.settings;
        match rule {
            SmaCrossover => Self::crossed_above(&self.short_sma, &self.long_sma, i),
            SmaCrossunder => Self::crossed_below(&self.short_sma, &self.long_sma, i),
            EmaCrossover => Self::crossed_above(&self.short_ema, &self.long_ema, i),
            EmaCrossunder => Self::crossed_below(&self.short_ema, &self.long_ema, i),
            RsiIsOverbought => self.rsi[i] > s.rsi_overbought,
            RsiIsNotOverbought => self.rsi[i] < s.rsi_overbought,
            RsiIsOversold => self.rsi[i] < s.rsi_oversold,
            RsiIsNotOversold => self.rsi[i] > s.rsi_oversold,
            MacdIsBullish => self.macd_line[i] > self.macd_signal[i],
            MacdIsBearish => self.macd_line[i] < self.macd_signal[i],
            PriceBreaksUpperBand => self.highs[i] > self.bb_upper[i],
            PriceBreaksLowerBand => self.lows[i] < self.bb_lower[i],
            PriceCrossesMiddleBandFromTop => {
                i > 0
                    && self.closes[i - 1] > self.bb_middle[i - 1]
                    && self.closes[i] <= self.bb_middle[i]
            }
            PriceCrossesMiddleBandFromBottom => {
                i > 0
                    && self.closes[i - 1] < self.bb_middle[i - 1]
                    && self.closes[i] >= self.bb_middle[i]
            }
            AdxUptrendConfirmed => {
                let adx = self.adx[i];
                adx.adx >= s.adx_threshold && adx.pdi > adx.mdi
            }
            AdxDowntrendConfirmed => {
                let adx = self.adx[i];
                adx.adx >= s.adx_threshold && adx.mdi > adx.pdi
            }
            AllTriggersLongOr => [
                SmaCrossover,
                EmaCrossover,
                PriceBreaksUpperBand,
                PriceCrossesMiddleBandFromBottom,
            ]
            .into_iter()
            .any(|r| self.holds(r, i)),
            AllTriggersShortOr => [
                SmaCrossunder,
                EmaCrossunder,
                PriceBreaksLowerBand,
                PriceCrossesMiddleBandFromTop,
            ]
            .into_iter()
            .any(|r| self.holds(r, i)),
            AllVerificatorsLongOr => self.holds(RsiIsNotOverbought, i),
            AllVerificatorsShortOr => self.holds(RsiIsNotOversold, i),
            AllExitsLongOr => [
                SmaCrossunder,
                EmaCrossunder,
                PriceCrossesMiddleBandFromTop,
                RsiIsOverbought,
            ]
            .into_iter()
            .any(|r| self.holds(r, i)),
            AllExitsShortOr => [
                SmaCrossover,
                EmaCrossover,
                PriceCrossesMiddleBandFromBottom,
                RsiIsOversold,
            ]
            .into_iter()
            .any(|r| self.holds(r, i)),
        }
    }

    fn leg(&self, rules: &[SignalRule]) -> Vec<bool> {
        (0..self.closes.len())
            .map(|i| !rules.is_empty() && rules.iter().all(|&rule| self.holds(rule, i)))
            .collect()
    }
}

/// Signals from a named preset of indicator rules.
#[derive(Debug, Clone)]
pub struct RuleSignalProvider {
    preset: StrategyPreset,
}

impl RuleSignalProvider {
    pub fn new(preset: StrategyPreset) -> Self {
        Self { preset }
    }
}

impl SignalProvider for RuleSignalProvider {
    fn name(&self) -> &str {
        self.preset.name
    }

    fn signals(&self, bars: &[Bar], params: &Parameters) -> BacktestResult<SignalSet> {
        if bars.is_empty() {
            return Err(BacktestError::invalid_input("no bars to generate signals from"));
        }
        let settings = IndicatorSettings::from_parameters(params);
        let frame = IndicatorFrame::new(bars, &settings);

        Ok(SignalSet {
            long_entry: frame.leg(&self.preset.long_entry),
            short_entry: frame.leg(&self.preset.short_entry),
            long_exit: frame.leg(&self.preset.long_exit),
            short_exit: frame.leg(&self.preset.short_exit),
            atr: calculate_atr(&frame.highs, &frame.lows, &frame.closes, settings.atr_period),
        })
    }

    fn required_history(&self, params: &Parameters) -> usize {
        let settings = IndicatorSettings::from_parameters(params);
        self.preset
            .rules()
            .map(|rule| settings.lookback(rule))
            .max()
            .unwrap_or(0)
    }
}

pub fn create_signal_provider(strategy: &str) -> Result<Box<dyn SignalProvider>> {
    StrategyPreset::by_name(strategy)
        .map(|preset| Box::new(RuleSignalProvider::new(preset)) as Box<dyn SignalProvider>)
        .ok_or_else(|| {
            anyhow!(
                "Unknown strategy: {} (available: {})",
                strategy,
                StrategyPreset::NAMES.join(", ")
            )
        })
}
