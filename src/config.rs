use crate::error::{BacktestError, BacktestResult};
use crate::models::Parameters;
use crate::param_utils::get_param_f64_clamped;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_SPREAD_PERCENTAGE: f64 = 0.01;
pub const DEFAULT_SLIPPAGE_PERCENTAGE: f64 = 0.0005;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 100.0;

/// Protective exit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub atr_multiple: f64,
    pub fixed_stop_loss_percentage: f64,
    pub take_profit_multiple: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            atr_multiple: 2.0,
            fixed_stop_loss_percentage: 0.01,
            take_profit_multiple: 1.5,
        }
    }
}

impl RiskConfig {
    pub fn from_parameters(parameters: &Parameters) -> Self {
        let defaults = Self::default();
        Self {
            atr_multiple: get_param_f64_clamped(
                parameters,
                "atr_multiple",
                defaults.atr_multiple,
                0.0,
                f64::MAX,
            ),
            fixed_stop_loss_percentage: get_param_f64_clamped(
                parameters,
                "fixed_stop_loss_percentage",
                defaults.fixed_stop_loss_percentage,
                0.0,
                1.0,
            ),
            take_profit_multiple: get_param_f64_clamped(
                parameters,
                "take_profit_multiple",
                defaults.take_profit_multiple,
                0.0,
                f64::MAX,
            ),
        }
    }

    pub fn validate(&self) -> BacktestResult<()> {
        if !self.atr_multiple.is_finite() || self.atr_multiple < 0.0 {
            return Err(BacktestError::invalid_input(format!(
                "atr_multiple must be finite and >= 0 (value: {})",
                self.atr_multiple
            )));
        }
        if !self.fixed_stop_loss_percentage.is_finite()
            || !(0.0..1.0).contains(&self.fixed_stop_loss_percentage)
        {
            return Err(BacktestError::invalid_input(format!(
                "fixed_stop_loss_percentage must be in [0, 1) (value: {})",
                self.fixed_stop_loss_percentage
            )));
        }
        if !self.take_profit_multiple.is_finite() || self.take_profit_multiple < 0.0 {
            return Err(BacktestError::invalid_input(format!(
                "take_profit_multiple must be finite and >= 0 (value: {})",
                self.take_profit_multiple
            )));
        }
        Ok(())
    }
}

/// Execution costs, each applied once per fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    pub spread_percentage: f64,
    pub slippage_percentage: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            spread_percentage: DEFAULT_SPREAD_PERCENTAGE,
            slippage_percentage: DEFAULT_SLIPPAGE_PERCENTAGE,
        }
    }
}

impl CostConfig {
    pub fn total(&self) -> f64 {
        self.spread_percentage + self.slippage_percentage
    }

    pub fn validate(&self) -> BacktestResult<()> {
        for (name, value) in [
            ("spread_percentage", self.spread_percentage),
            ("slippage_percentage", self.slippage_percentage),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(BacktestError::invalid_input(format!(
                    "{} must be finite and >= 0 (value: {})",
                    name, value
                )));
            }
        }
        if self.total() >= 1.0 {
            return Err(BacktestError::invalid_input(format!(
                "spread + slippage must be < 1 (value: {})",
                self.total()
            )));
        }
        Ok(())
    }
}

/// Hybrid position sizing fractions, all relative to current capital.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionConfig {
    pub base_percentage: f64,
    pub fixed_percentage: f64,
    pub volatility_threshold: f64,
    pub min_percentage: f64,
    pub max_percentage: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            base_percentage: 0.20,
            fixed_percentage: 0.95,
            volatility_threshold: 0.20,
            min_percentage: 0.05,
            max_percentage: 0.95,
        }
    }
}

impl PositionConfig {
    pub fn validate(&self) -> BacktestResult<()> {
        for (name, value) in [
            ("base_percentage", self.base_percentage),
            ("fixed_percentage", self.fixed_percentage),
            ("min_percentage", self.min_percentage),
            ("max_percentage", self.max_percentage),
        ] {
            if !value.is_finite() || value <= 0.0 || value > 1.0 {
                return Err(BacktestError::invalid_input(format!(
                    "{} must be in (0, 1] (value: {})",
                    name, value
                )));
            }
        }
        if self.min_percentage > self.max_percentage {
            return Err(BacktestError::invalid_input(format!(
                "min_percentage ({}) must be <= max_percentage ({})",
                self.min_percentage, self.max_percentage
            )));
        }
        if !self.volatility_threshold.is_finite() || self.volatility_threshold < 0.0 {
            return Err(BacktestError::invalid_input(format!(
                "volatility_threshold must be finite and >= 0 (value: {})",
                self.volatility_threshold
            )));
        }
        Ok(())
    }
}

/// Settings resolved from a key/value map (process environment in the CLI).
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub costs: CostConfig,
    pub initial_capital: f64,
    pub optimizer_trials: usize,
    pub optimizer_timeout: Option<Duration>,
    pub optimizer_seed: u64,
    pub optimizer_batch_size: usize,
    pub optimizer_startup_trials: usize,
    pub optimizer_pruning: bool,
    pub optimizer_workers: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            costs: CostConfig::default(),
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            optimizer_trials: 50,
            optimizer_timeout: None,
            optimizer_seed: 42,
            optimizer_batch_size: 1,
            optimizer_startup_trials: 10,
            optimizer_pruning: false,
            optimizer_workers: num_cpus::get().max(1),
        }
    }
}

impl EngineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let spread_percentage = optional_setting_f64(
            settings,
            "SPREAD_PERCENTAGE",
            defaults.costs.spread_percentage,
            Some(0.0),
            Some(1.0),
        )?;
        let slippage_percentage = optional_setting_f64(
            settings,
            "SLIPPAGE_PERCENTAGE",
            defaults.costs.slippage_percentage,
            Some(0.0),
            Some(1.0),
        )?;
        let initial_capital = optional_setting_f64(
            settings,
            "INITIAL_CAPITAL",
            defaults.initial_capital,
            Some(f64::MIN_POSITIVE),
            None,
        )?;
        let optimizer_trials =
            optional_setting_usize(settings, "OPTIMIZER_TRIALS", defaults.optimizer_trials, 1)?;
        let optimizer_timeout = match setting_value(settings, "OPTIMIZER_TIMEOUT_SECS") {
            Some(_) => Some(Duration::from_secs(optional_setting_usize(
                settings,
                "OPTIMIZER_TIMEOUT_SECS",
                0,
                1,
            )? as u64)),
            None => defaults.optimizer_timeout,
        };
        let optimizer_seed =
            optional_setting_usize(settings, "OPTIMIZER_SEED", defaults.optimizer_seed as usize, 0)?
                as u64;
        let optimizer_batch_size = optional_setting_usize(
            settings,
            "OPTIMIZER_BATCH_SIZE",
            defaults.optimizer_batch_size,
            1,
        )?;
        let optimizer_startup_trials = optional_setting_usize(
            settings,
            "OPTIMIZER_STARTUP_TRIALS",
            defaults.optimizer_startup_trials,
            0,
        )?;
        let optimizer_pruning =
            optional_setting_bool(settings, "OPTIMIZER_PRUNING", defaults.optimizer_pruning)?;
        let optimizer_workers =
            optional_setting_usize(settings, "OPTIMIZER_WORKERS", defaults.optimizer_workers, 1)?;

        let costs = CostConfig {
            spread_percentage,
            slippage_percentage,
        };
        costs.validate().map_err(|err| anyhow!("{}", err))?;

        Ok(Self {
            costs,
            initial_capital,
            optimizer_trials,
            optimizer_timeout,
            optimizer_seed,
            optimizer_batch_size,
            optimizer_startup_trials,
            optimizer_pruning,
            optimizer_workers,
        })
    }
}

fn setting_value<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = setting_value(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = setting_value(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn optional_setting_bool(
    settings: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    let Some(raw) = setting_value(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be a boolean (value: {})",
            key,
            raw
        )),
    }
}
