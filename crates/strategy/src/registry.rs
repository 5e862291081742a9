use std::collections::HashMap;

use tracing::info;

use common::{Error, Result};

use crate::config::SignalConfig;
use crate::sources::{Breakout, MaCrossover, MacdCrossover, RsiExtremes, RsiThreshold};
use crate::SignalSource;

/// Build the signal source described by `cfg`.
///
/// Unknown types and out-of-range parameters are rejected with
/// `Error::Config` so that no engine starts with an invalid source.
pub fn build_signal_source(name: &str, cfg: &SignalConfig) -> Result<Box<dyn SignalSource>> {
    let source: Box<dyn SignalSource> = match cfg.signal_type.as_str() {
        "rsi_threshold" | "rsi_extremes" => {
            let period = param_usize(&cfg.params, "period", 14)?;
            let overbought = param_f64(&cfg.params, "overbought", 80.0)?;
            let oversold = param_f64(&cfg.params, "oversold", 20.0)?;
            require(period >= 1, "RSI period must be >= 1")?;
            require(
                (0.0..=100.0).contains(&oversold) && (0.0..=100.0).contains(&overbought),
                "RSI thresholds must lie within 0..=100",
            )?;
            require(oversold < overbought, "RSI oversold must be below overbought")?;
            if cfg.signal_type == "rsi_threshold" {
                Box::new(RsiThreshold::new(name, period, overbought, oversold))
            } else {
                Box::new(RsiExtremes::new(name, period, overbought, oversold))
            }
        }
        "ma_crossover" => {
            let fast = param_usize(&cfg.params, "fast", 10)?;
            let slow = param_usize(&cfg.params, "slow", 30)?;
            require(fast >= 1, "MA fast period must be >= 1")?;
            require(fast < slow, "MA fast period must be less than slow period")?;
            Box::new(MaCrossover::new(name, fast, slow))
        }
        "macd_crossover" => {
            let fast = param_usize(&cfg.params, "fast", 12)?;
            let slow = param_usize(&cfg.params, "slow", 26)?;
            let signal = param_usize(&cfg.params, "signal", 9)?;
            require(fast >= 1 && signal >= 1, "MACD periods must be >= 1")?;
            require(fast < slow, "MACD fast period must be less than slow period")?;
            Box::new(MacdCrossover::new(name, fast, slow, signal))
        }
        "breakout" => {
            let lookback = param_usize(&cfg.params, "lookback", 20)?;
            require(lookback >= 1, "breakout lookback must be >= 1")?;
            Box::new(Breakout::new(name, lookback))
        }
        other => {
            return Err(Error::Config(format!("unknown signal type '{other}'")));
        }
    };

    info!(name = %source.name(), signal = %cfg.signal_type, "Built signal source");
    Ok(source)
}

fn require(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::Config(message.to_string()))
    }
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_float()
            .or_else(|| v.as_integer().map(|i| i as f64))
            .filter(|f| f.is_finite())
            .ok_or_else(|| Error::Config(format!("signal param '{key}' must be a number"))),
    }
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> Result<usize> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_integer()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| {
                Error::Config(format!("signal param '{key}' must be a non-negative integer"))
            }),
    }
}
