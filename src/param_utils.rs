use crate::error::{BacktestError, BacktestResult};
use crate::models::Parameters;
use serde::{Deserialize, Serialize};

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &Parameters, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &Parameters,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = get_param_f64(params, key, default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Extract a parameter as usize, rounded and clamped to a range with finite checks
pub fn get_param_usize_rounded_clamped(
    params: &Parameters,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> usize {
    let raw = params.get(key).copied().unwrap_or(default as f64);
    if !raw.is_finite() {
        return default;
    }
    raw.round().clamp(min as f64, max as f64) as usize
}

/// Get a finite parameter value, returns None if not found or not finite
pub fn finite_param(params: &Parameters, key: &str) -> Option<f64> {
    params.get(key).copied().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Int,
    Float,
}

/// `value > reference + offset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingConstraint {
    pub reference: String,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub low: f64,
    pub high: f64,
    /// Caps `high` at `data_len / divisor` so lookbacks fit the series.
    pub history_divisor: Option<usize>,
    pub after: Option<OrderingConstraint>,
}

impl ParameterSpec {
    pub fn int(name: &str, low: i64, high: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParameterKind::Int,
            low: low as f64,
            high: high as f64,
            history_divisor: None,
            after: None,
        }
    }

    pub fn float(name: &str, low: f64, high: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParameterKind::Float,
            low,
            high,
            history_divisor: None,
            after: None,
        }
    }

    pub fn capped_by_history(mut self, divisor: usize) -> Self {
        self.history_divisor = Some(divisor.max(1));
        self
    }

    pub fn greater_than(mut self, reference: &str, offset: f64) -> Self {
        self.after = Some(OrderingConstraint {
            reference: reference.to_string(),
            offset,
        });
        self
    }

    /// Inclusive range left after history caps and the ordering constraint,
    /// given the values already chosen for earlier specs.
    pub fn effective_bounds(
        &self,
        data_len: usize,
        chosen: &Parameters,
    ) -> BacktestResult<(f64, f64)> {
        let mut low = self.low;
        let mut high = self.high;

        if let Some(divisor) = self.history_divisor {
            high = high.min((data_len / divisor) as f64);
        }

        if let Some(constraint) = &self.after {
            let reference = finite_param(chosen, &constraint.reference).ok_or_else(|| {
                BacktestError::constraint(
                    &self.name,
                    format!("reference {} has no value", constraint.reference),
                )
            })?;
            let floor = reference + constraint.offset;
            low = match self.kind {
                ParameterKind::Int => low.max(floor.floor() + 1.0),
                ParameterKind::Float => low.max(floor + f64::EPSILON * floor.abs().max(1.0)),
            };
        }

        if self.kind == ParameterKind::Int {
            low = low.ceil();
            high = high.floor();
        }

        if !(low <= high) {
            return Err(BacktestError::constraint(
                &self.name,
                format!("empty range [{}, {}] for {} bars", low, high, data_len),
            ));
        }
        Ok((low, high))
    }

    /// Maps `unit` in [0, 1] onto the bounds, rounding integer axes.
    pub fn from_unit(&self, unit: f64, low: f64, high: f64) -> f64 {
        let unit = if unit.is_finite() {
            unit.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let value = low + unit * (high - low);
        match self.kind {
            ParameterKind::Int => value.round().clamp(low, high),
            ParameterKind::Float => value.clamp(low, high),
        }
    }
}

/// Ordered search space; a constraint may only reference an earlier spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    specs: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new(specs: Vec<ParameterSpec>) -> BacktestResult<Self> {
        for (index, spec) in specs.iter().enumerate() {
            if !spec.low.is_finite() || !spec.high.is_finite() || spec.low > spec.high {
                return Err(BacktestError::invalid_input(format!(
                    "parameter {} has invalid range [{}, {}]",
                    spec.name, spec.low, spec.high
                )));
            }
            if specs[..index].iter().any(|earlier| earlier.name == spec.name) {
                return Err(BacktestError::invalid_input(format!(
                    "parameter {} is declared twice",
                    spec.name
                )));
            }
            if let Some(constraint) = &spec.after {
                if !specs[..index]
                    .iter()
                    .any(|earlier| earlier.name == constraint.reference)
                {
                    return Err(BacktestError::invalid_input(format!(
                        "parameter {} is constrained by {} which is not declared before it",
                        spec.name, constraint.reference
                    )));
                }
            }
        }
        Ok(Self { specs })
    }

    /// Search space for the rule-based strategies on `data_len` bars.
    pub fn default_for(data_len: usize) -> Self {
        let mut specs = vec![
            ParameterSpec::int("short_sma_period", 5, 50),
            ParameterSpec::int("long_sma_period", 10, 200)
                .capped_by_history(2)
                .greater_than("short_sma_period", 4.0),
            ParameterSpec::int("short_ema_period", 5, 30),
            ParameterSpec::int("long_ema_period", 10, 100)
                .capped_by_history(3)
                .greater_than("short_ema_period", 1.0),
            ParameterSpec::int("rsi_oversold", 5, 35),
            ParameterSpec::int("rsi_overbought", 50, 95).greater_than("rsi_oversold", 20.0),
            ParameterSpec::int("macd_fast_period", 5, 25),
            ParameterSpec::int("macd_slow_period", 10, 50)
                .capped_by_history(6)
                .greater_than("macd_fast_period", 5.0),
            ParameterSpec::int("macd_signal_period", 5, 20),
            ParameterSpec::int("atr_period", 5, 30).capped_by_history(10),
            ParameterSpec::float("atr_multiple", 1.0, 5.0),
            ParameterSpec::float("fixed_stop_loss_percentage", 0.005, 0.05),
            ParameterSpec::float("take_profit_multiple", 1.0, 5.0),
        ];
        for spec in &mut specs {
            if let Some(divisor) = spec.history_divisor {
                spec.high = spec.high.min((data_len / divisor) as f64);
            }
        }
        Self { specs }
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Builds a parameter set from one unit-interval sample per spec.
    pub fn materialize(&self, units: &[f64], data_len: usize) -> BacktestResult<Parameters> {
        if units.len() != self.specs.len() {
            return Err(BacktestError::invalid_input(format!(
                "expected {} samples, got {}",
                self.specs.len(),
                units.len()
            )));
        }
        let mut params = Parameters::new();
        for (spec, &unit) in self.specs.iter().zip(units) {
            let (low, high) = spec.effective_bounds(data_len, &params)?;
            params.insert(spec.name.clone(), spec.from_unit(unit, low, high));
        }
        Ok(params)
    }

    pub fn validate(&self, params: &Parameters, data_len: usize) -> BacktestResult<()> {
        for spec in &self.specs {
            let value = finite_param(params, &spec.name).ok_or_else(|| {
                BacktestError::constraint(&spec.name, "missing or not finite")
            })?;
            let (low, high) = spec.effective_bounds(data_len, params)?;
            if value < low || value > high {
                return Err(BacktestError::constraint(
                    &spec.name,
                    format!("{} outside [{}, {}]", value, low, high),
                ));
            }
            if spec.kind == ParameterKind::Int && value.fract() != 0.0 {
                return Err(BacktestError::constraint(
                    &spec.name,
                    format!("{} is not an integer", value),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> Parameters {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn accessors_fall_back_on_missing_or_non_finite() {
        let p = params(&[("a", f64::INFINITY), ("b", 7.6)]);
        assert_eq!(get_param_f64_clamped(&p, "a", 1.0, 0.0, 10.0), 1.0);
        assert_eq!(get_param_f64_clamped(&p, "b", 1.0, 0.0, 5.0), 5.0);
        assert_eq!(get_param_usize_rounded_clamped(&p, "b", 3, 1, 100), 8);
        assert_eq!(get_param_usize_rounded_clamped(&p, "missing", 3, 1, 100), 3);
        assert_eq!(get_param_f64(&p, "missing", 2.5), 2.5);
        assert_eq!(finite_param(&p, "a"), None);
    }

    #[test]
    fn constraint_raises_lower_bound() {
        let spec = ParameterSpec::int("long", 10, 200).greater_than("short", 4.0);
        let (low, high) = spec
            .effective_bounds(1000, &params(&[("short", 30.0)]))
            .unwrap();
        assert_eq!((low, high), (35.0, 200.0));
    }

    #[test]
    fn history_caps_upper_bound() {
        let spec = ParameterSpec::int("long", 10, 200).capped_by_history(2);
        assert_eq!(
            spec.effective_bounds(100, &Parameters::new()).unwrap(),
            (10.0, 50.0)
        );
        assert!(matches!(
            spec.effective_bounds(15, &Parameters::new()),
            Err(BacktestError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn materialized_defaults_satisfy_constraints() {
        let space = ParameterSpace::default_for(600);
        for units in [vec![0.0; 13], vec![1.0; 13], vec![0.37; 13]] {
            let p = space.materialize(&units, 600).unwrap();
            space.validate(&p, 600).unwrap();
            assert!(p["long_sma_period"] > p["short_sma_period"] + 4.0);
            assert!(p["long_ema_period"] > p["short_ema_period"] + 1.0);
            assert!(p["rsi_overbought"] > p["rsi_oversold"] + 20.0);
            assert!(p["macd_slow_period"] > p["macd_fast_period"] + 5.0);
            assert!(p["long_ema_period"] <= 100.0);
            assert!(p["macd_slow_period"] <= 50.0);
            assert!(p["atr_period"] <= 30.0);
        }
    }

    #[test]
    fn short_series_caps_lookbacks() {
        let space = ParameterSpace::default_for(240);
        let p = space.materialize(&[1.0; 13], 240).unwrap();
        assert_eq!(p["long_sma_period"], 120.0);
        assert_eq!(p["long_ema_period"], 80.0);
        assert_eq!(p["macd_slow_period"], 40.0);
        assert_eq!(p["atr_period"], 24.0);
    }

    #[test]
    fn infeasible_sample_is_a_constraint_violation() {
        let space = ParameterSpace::default_for(60);
        let result = space.materialize(&[1.0; 13], 60);
        assert!(matches!(
            result,
            Err(BacktestError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn validate_rejects_ordering_violation() {
        let space = ParameterSpace::new(vec![
            ParameterSpec::int("fast", 1, 10),
            ParameterSpec::int("slow", 1, 30).greater_than("fast", 5.0),
        ])
        .unwrap();
        assert!(space
            .validate(&params(&[("fast", 5.0), ("slow", 11.0)]), 100)
            .is_ok());
        assert!(matches!(
            space.validate(&params(&[("fast", 5.0), ("slow", 10.0)]), 100),
            Err(BacktestError::ConstraintViolation { .. })
        ));
        assert!(matches!(
            space.validate(&params(&[("fast", 2.5), ("slow", 20.0)]), 100),
            Err(BacktestError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn constraints_must_reference_earlier_specs() {
        let result = ParameterSpace::new(vec![
            ParameterSpec::int("slow", 1, 30).greater_than("fast", 5.0),
            ParameterSpec::int("fast", 1, 10),
        ]);
        assert!(matches!(result, Err(BacktestError::InvalidInput(_))));
    }
}
