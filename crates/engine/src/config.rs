use std::collections::HashSet;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use common::{Error, Result};
use risk::{ProtectionMode, StopPolicy};
use strategy::SignalConfig;

/// Top-level engine config file (TOML).
///
/// Example `config/engines.toml`:
/// ```toml
/// [[engine]]
/// instrument = "EURUSDT"
/// label = "trend-bot"
/// base_volume = 0.15
/// pip_size = 0.0001
/// stop_loss_pips = 35
/// take_profit_pips = 135
/// protection = "trailing"
/// max_daily_loss = 200
/// martingale = false
/// blackout_start = "20:00:00"
///
/// [engine.signal]
/// type = "rsi_threshold"
///
/// [engine.signal.params]
/// period = 14
/// overbought = 80
/// oversold = 20
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineFile {
    #[serde(rename = "engine")]
    pub engines: Vec<EngineSettings>,
}

/// Parameters of one engine, fixed for its lifetime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    pub instrument: String,
    /// Owner tag attached to every position this engine opens.
    #[serde(default = "default_label")]
    pub label: String,
    /// Volume in lots before martingale scaling.
    pub base_volume: f64,
    #[serde(default = "default_pip_size")]
    pub pip_size: f64,
    pub stop_loss_pips: f64,
    #[serde(default)]
    pub take_profit_pips: f64,
    #[serde(default)]
    pub protection: ProtectionMode,
    #[serde(default = "default_breakeven_pips")]
    pub breakeven_pips: f64,
    #[serde(default)]
    pub trailing_step_pips: f64,
    /// Realized loss per day, in account currency, after which no new
    /// positions open. `0` disables the budget.
    #[serde(default)]
    pub max_daily_loss: f64,
    #[serde(default)]
    pub martingale: bool,
    #[serde(default = "default_blackout_weekday")]
    pub blackout_weekday: Weekday,
    #[serde(default = "default_blackout_start")]
    pub blackout_start: NaiveTime,
    /// Closed bars kept for indicator evaluation.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    pub signal: SignalConfig,
}

fn default_label() -> String {
    "trend-bot".to_string()
}

fn default_pip_size() -> f64 {
    0.0001
}

fn default_breakeven_pips() -> f64 {
    2.0
}

fn default_blackout_weekday() -> Weekday {
    Weekday::Fri
}

fn default_blackout_start() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_history_len() -> usize {
    500
}

impl EngineFile {
    /// Load and validate from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read engine config at '{path}': {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: EngineFile = toml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engines.is_empty() {
            return Err(Error::Config("no [[engine]] entries configured".into()));
        }
        let mut slots = HashSet::new();
        for engine in &self.engines {
            engine.validate()?;
            if !slots.insert((engine.instrument.as_str(), engine.label.as_str())) {
                return Err(Error::Config(format!(
                    "duplicate engine for instrument '{}' with label '{}'",
                    engine.instrument, engine.label
                )));
            }
        }
        Ok(())
    }
}

impl EngineSettings {
    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            mode: self.protection,
            pip_size: self.pip_size,
            stop_loss_pips: self.stop_loss_pips,
            take_profit_pips: self.take_profit_pips,
            breakeven_pips: self.breakeven_pips,
            trailing_step_pips: self.trailing_step_pips,
        }
    }

    /// Checks everything except the signal parameters, which are validated
    /// when the signal source is built.
    pub fn validate(&self) -> Result<()> {
        if self.instrument.trim().is_empty() {
            return Err(Error::Config("instrument must not be empty".into()));
        }
        if self.label.trim().is_empty() {
            return Err(Error::Config(format!(
                "label for '{}' must not be empty",
                self.instrument
            )));
        }
        if !(self.base_volume.is_finite() && self.base_volume > 0.0) {
            return Err(Error::Config(format!(
                "base_volume for '{}' must be positive, got {}",
                self.instrument, self.base_volume
            )));
        }
        if !(self.max_daily_loss.is_finite() && self.max_daily_loss >= 0.0) {
            return Err(Error::Config(format!(
                "max_daily_loss for '{}' must be zero or positive, got {}",
                self.instrument, self.max_daily_loss
            )));
        }
        if self.history_len < 2 {
            return Err(Error::Config(format!(
                "history_len for '{}' must be at least 2",
                self.instrument
            )));
        }
        self.stop_policy()
            .validate()
            .map_err(|e| Error::Config(format!("{}: {e}", self.instrument)))
    }
}
