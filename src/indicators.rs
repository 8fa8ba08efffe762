//! Indicator series aligned index-for-index with their input. Bars without
//! enough history hold `NaN` (so every comparison on them is false), except
//! ATR which reports 0 during warm-up.

/// Rolling mean; the whole series is `NaN` when `period > prices.len()`.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut sma_values = vec![f64::NAN; prices.len()];
    if period == 0 || period > prices.len() {
        return sma_values;
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values[period - 1] = window_sum / period as f64;
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values[i] = window_sum / period as f64;
    }

    sma_values
}

/// Exponential moving average seeded with the first price.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = prices.first() else {
        return Vec::new();
    };

    let multiplier = 2.0 / (period.max(1) as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(first);
    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Macd {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal = calculate_ema(&line, signal_period);
    let histogram = line
        .iter()
        .zip(signal.iter())
        .map(|(macd, signal)| macd - signal)
        .collect();

    Macd {
        line,
        signal,
        histogram,
    }
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder RSI; the first `period` bars are `NaN`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut rsi_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return rsi_values;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bands at `std_dev` population standard deviations around the SMA.
pub fn calculate_bollinger_bands(prices: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = calculate_sma(prices, period);
    let mut upper = vec![f64::NAN; prices.len()];
    let mut lower = vec![f64::NAN; prices.len()];

    for i in 0..prices.len() {
        let mean = middle[i];
        if !mean.is_finite() {
            continue;
        }
        let slice = &prices[i + 1 - period..=i];
        let variance = slice.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / period as f64;
        let standard_deviation = variance.sqrt();
        upper[i] = mean + std_dev * standard_deviation;
        lower[i] = mean - std_dev * standard_deviation;
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

fn true_range(highs: &[f64], lows: &[f64], closes: &[f64], i: usize) -> f64 {
    if i == 0 {
        return highs[0] - lows[0];
    }
    (highs[i] - lows[i])
        .max((highs[i] - closes[i - 1]).abs())
        .max((lows[i] - closes[i - 1]).abs())
}

/// Wilder ATR. Bars before `period - 1` are 0; a period that does not fit
/// the series is shortened to `len - 1`.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len().min(highs.len()).min(lows.len());
    let mut atr = vec![0.0; n];
    let period = period.min(n.saturating_sub(1));
    if period == 0 {
        return atr;
    }

    let mut tr_sum = 0.0f64;
    for i in 0..n {
        let tr = true_range(highs, lows, closes, i);
        if i < period {
            tr_sum += tr;
            if i == period - 1 {
                atr[i] = tr_sum / period as f64;
            }
        } else {
            atr[i] = (atr[i - 1] * (period as f64 - 1.0) + tr) / period as f64;
        }
    }

    atr
}

#[derive(Clone, Copy, Debug)]
pub struct AdxOutput {
    pub adx: f64,
    pub pdi: f64,
    pub mdi: f64,
}

impl AdxOutput {
    const UNAVAILABLE: AdxOutput = AdxOutput {
        adx: f64::NAN,
        pdi: f64::NAN,
        mdi: f64::NAN,
    };
}

/// Directional movement over a rolling window; the first `period` bars are unavailable.
pub fn calculate_adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<AdxOutput> {
    let n = closes.len().min(highs.len()).min(lows.len());
    let mut outputs = vec![AdxOutput::UNAVAILABLE; n];
    if period == 0 || n < period + 1 {
        return outputs;
    }

    let mut tr_values = vec![0.0; n];
    let mut dm_plus_values = vec![0.0; n];
    let mut dm_minus_values = vec![0.0; n];
    for i in 1..n {
        tr_values[i] = true_range(highs, lows, closes, i);

        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        if up_move > down_move && up_move > 0.0 {
            dm_plus_values[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            dm_minus_values[i] = down_move;
        }
    }

    for i in period..n {
        let window = i + 1 - period..=i;
        let atr = tr_values[window.clone()].iter().sum::<f64>() / period as f64;
        let dm_plus_sum = dm_plus_values[window.clone()].iter().sum::<f64>();
        let dm_minus_sum = dm_minus_values[window].iter().sum::<f64>();

        let (pdi, mdi) = if atr > 0.0 {
            (
                dm_plus_sum / atr * 100.0 / period as f64,
                dm_minus_sum / atr * 100.0 / period as f64,
            )
        } else {
            (0.0, 0.0)
        };
        let di_sum = pdi + mdi;
        let adx = if di_sum > 0.0 {
            (pdi - mdi).abs() / di_sum * 100.0
        } else {
            0.0
        };
        outputs[i] = AdxOutput { adx, pdi, mdi };
    }

    outputs
}
