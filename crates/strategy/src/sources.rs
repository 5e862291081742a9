//! Concrete signal sources. Each is a pure function of a `PriceHistory`.

use crate::indicators::{sma, Crossover, MacdIndicator, RsiIndicator};
use crate::{PriceHistory, Signal, SignalSource};

// ─── RSI threshold ────────────────────────────────────────────────────────────

/// Enters when RSI turns back from beyond a threshold while its recent
/// average is still on the other side.
///
/// Long: previous RSI < oversold, RSI rising, mean of the last `period` RSI
/// values > oversold. Short mirrors it around `overbought`.
#[derive(Debug, Clone)]
pub struct RsiThreshold {
    name: String,
    rsi: RsiIndicator,
    overbought: f64,
    oversold: f64,
}

impl RsiThreshold {
    pub fn new(name: impl Into<String>, period: usize, overbought: f64, oversold: f64) -> Self {
        Self {
            name: name.into(),
            rsi: RsiIndicator::new(period),
            overbought,
            oversold,
        }
    }
}

impl SignalSource for RsiThreshold {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_history(&self) -> usize {
        // `period + 1` prices per RSI value, `period` (at least 2) values.
        self.rsi.period + self.rsi.period.max(2)
    }

    fn evaluate(&self, history: &PriceHistory) -> Signal {
        let values = self.rsi.series(&history.series());
        let period = self.rsi.period;
        if values.len() < period.max(2) {
            return Signal::Neutral;
        }

        let last = values[values.len() - 1];
        let prev = values[values.len() - 2];
        let mean = values[values.len() - period..].iter().sum::<f64>() / period as f64;

        if prev < self.oversold && last > prev && mean > self.oversold {
            Signal::Long
        } else if prev > self.overbought && last < prev && mean < self.overbought {
            Signal::Short
        } else {
            Signal::Neutral
        }
    }
}

// ─── RSI extremes ─────────────────────────────────────────────────────────────

/// Enters on a turn while RSI is still at an extreme.
///
/// Long: min of the last `period` RSI values <= oversold, latest RSI <=
/// oversold and rising. Short mirrors it around `overbought`.
#[derive(Debug, Clone)]
pub struct RsiExtremes {
    name: String,
    rsi: RsiIndicator,
    overbought: f64,
    oversold: f64,
}

impl RsiExtremes {
    pub fn new(name: impl Into<String>, period: usize, overbought: f64, oversold: f64) -> Self {
        Self {
            name: name.into(),
            rsi: RsiIndicator::new(period),
            overbought,
            oversold,
        }
    }
}

impl SignalSource for RsiExtremes {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_history(&self) -> usize {
        // `period + 1` prices per RSI value, `period` (at least 2) values.
        self.rsi.period + self.rsi.period.max(2)
    }

    fn evaluate(&self, history: &PriceHistory) -> Signal {
        let values = self.rsi.series(&history.series());
        let period = self.rsi.period;
        if values.len() < period.max(2) {
            return Signal::Neutral;
        }

        let last = values[values.len() - 1];
        let prev = values[values.len() - 2];
        let window = &values[values.len() - period..];
        let min = window.iter().copied().fold(f64::INFINITY, f64::min);
        let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        if min <= self.oversold && last <= self.oversold && last > prev {
            Signal::Long
        } else if max >= self.overbought && last >= self.overbought && last < prev {
            Signal::Short
        } else {
            Signal::Neutral
        }
    }
}

// ─── Moving-average crossover ────────────────────────────────────────────────

/// Long when the fast SMA crosses above the slow SMA on the latest price,
/// short on the cross below.
#[derive(Debug, Clone)]
pub struct MaCrossover {
    name: String,
    fast: usize,
    slow: usize,
}

impl MaCrossover {
    pub fn new(name: impl Into<String>, fast: usize, slow: usize) -> Self {
        Self {
            name: name.into(),
            fast,
            slow,
        }
    }
}

impl SignalSource for MaCrossover {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_history(&self) -> usize {
        self.slow + 1
    }

    fn evaluate(&self, history: &PriceHistory) -> Signal {
        let series = history.series();
        if series.len() < self.slow + 1 {
            return Signal::Neutral;
        }
        let previous = &series[..series.len() - 1];

        let cross = match (
            sma(previous, self.fast),
            sma(previous, self.slow),
            sma(&series, self.fast),
            sma(&series, self.slow),
        ) {
            (Some(pf), Some(ps), Some(cf), Some(cs)) => Crossover::detect(pf, ps, cf, cs),
            _ => Crossover::Neutral,
        };
        crossover_signal(cross)
    }
}

// ─── MACD crossover ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MacdCrossover {
    name: String,
    macd: MacdIndicator,
}

impl MacdCrossover {
    pub fn new(name: impl Into<String>, fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            name: name.into(),
            macd: MacdIndicator::new(fast, slow, signal),
        }
    }
}

impl SignalSource for MacdCrossover {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_history(&self) -> usize {
        self.macd.slow + self.macd.signal
    }

    fn evaluate(&self, history: &PriceHistory) -> Signal {
        self.macd
            .compute(&history.series())
            .map(crossover_signal)
            .unwrap_or(Signal::Neutral)
    }
}

// ─── Breakout ─────────────────────────────────────────────────────────────────

/// Long when the latest price exceeds every one of the previous `lookback`
/// prices, short when it undercuts all of them.
#[derive(Debug, Clone)]
pub struct Breakout {
    name: String,
    lookback: usize,
}

impl Breakout {
    pub fn new(name: impl Into<String>, lookback: usize) -> Self {
        Self {
            name: name.into(),
            lookback,
        }
    }
}

impl SignalSource for Breakout {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_history(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, history: &PriceHistory) -> Signal {
        let series = history.series();
        if self.lookback == 0 || series.len() < self.lookback + 1 {
            return Signal::Neutral;
        }
        let last = series[series.len() - 1];
        let window = &series[series.len() - 1 - self.lookback..series.len() - 1];
        let high = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().copied().fold(f64::INFINITY, f64::min);

        if last > high {
            Signal::Long
        } else if last < low {
            Signal::Short
        } else {
            Signal::Neutral
        }
    }
}

fn crossover_signal(cross: Crossover) -> Signal {
    match cross {
        Crossover::Bullish => Signal::Long,
        Crossover::Bearish => Signal::Short,
        Crossover::Neutral => Signal::Neutral,
    }
}
