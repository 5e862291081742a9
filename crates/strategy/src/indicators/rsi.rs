/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// The first value is available once `period + 1` prices are known.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "RSI period must be >= 1");
        Self { period }
    }

    /// RSI value for every price from index `period` on (oldest first).
    /// Empty if there are fewer than `period + 1` prices.
    pub fn series(&self, closes: &[f64]) -> Vec<f64> {
        if closes.len() < self.period + 1 {
            return Vec::new();
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let initial = &changes[..self.period];
        let n = self.period as f64;

        let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / n;
        let mut avg_loss = initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>() / n;

        let mut out = Vec::with_capacity(changes.len() - self.period + 1);
        out.push(rsi_value(avg_gain, avg_loss));

        // Wilder smoothing over remaining changes
        for &change in &changes[self.period..] {
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            avg_gain = (avg_gain * (n - 1.0) + gain) / n;
            avg_loss = (avg_loss * (n - 1.0) + loss) / n;
            out.push(rsi_value(avg_gain, avg_loss));
        }
        out
    }

    /// Latest RSI value, or `None` if there are fewer than `period + 1` prices.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        self.series(closes).last().copied()
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
