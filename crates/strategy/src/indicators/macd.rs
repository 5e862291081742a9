/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// Computes: MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal_period).
/// Reports a crossover when the MACD line crosses the signal line on the
/// latest price.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Cross of two lines on the latest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossover {
    Bullish, // first line crossed above the second
    Bearish, // first line crossed below the second
    Neutral, // no cross on the latest value
}

impl Crossover {
    /// Classify the move from `(prev_a, prev_b)` to `(curr_a, curr_b)`.
    pub fn detect(prev_a: f64, prev_b: f64, curr_a: f64, curr_b: f64) -> Self {
        if prev_a <= prev_b && curr_a > curr_b {
            Crossover::Bullish
        } else if prev_a >= prev_b && curr_a < curr_b {
            Crossover::Bearish
        } else {
            Crossover::Neutral
        }
    }
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be >= 1");
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self { fast, slow, signal }
    }

    /// Crossover of the MACD line over its signal line on the latest price.
    /// Returns `None` until `slow + signal` prices are available.
    pub fn compute(&self, closes: &[f64]) -> Option<Crossover> {
        if closes.len() < self.slow + self.signal {
            return None;
        }

        let fast = ema_series(closes, self.fast);
        let slow = ema_series(closes, self.slow);
        // Both series end at the last price; align on the slow one.
        let offset = fast.len() - slow.len();
        let macd_line: Vec<f64> = slow
            .iter()
            .enumerate()
            .map(|(i, s)| fast[i + offset] - s)
            .collect();

        let signal_line = ema_series(&macd_line, self.signal);
        if signal_line.len() < 2 {
            return None;
        }

        let m = macd_line.len();
        let s = signal_line.len();
        Some(Crossover::detect(
            macd_line[m - 2],
            signal_line[s - 2],
            macd_line[m - 1],
            signal_line[s - 1],
        ))
    }
}

/// EMA values from index `period - 1` on, seeded with the SMA of the first
/// `period` values.
fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut value = data[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(data.len() - period + 1);
    out.push(value);
    for &price in &data[period..] {
        value = price * k + value * (1.0 - k);
        out.push(value);
    }
    out
}
