use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Signal source selection for one engine, embedded in the engine TOML.
///
/// Example:
/// ```toml
/// [engine.signal]
/// type = "rsi_threshold"
///
/// [engine.signal.params]
/// period = 14
/// overbought = 80.0
/// oversold = 20.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalConfig {
    /// One of "rsi_threshold", "rsi_extremes", "ma_crossover",
    /// "macd_crossover", "breakout".
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Indicator-specific parameters. Missing keys fall back to defaults.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}
