use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Direction, Error, Position, Result};

/// How the stop of an open position is managed after entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    /// Stop and take-profit stay where they were placed at open.
    #[default]
    Fixed,
    /// Once profit reaches the stop distance, the stop jumps to entry plus a
    /// small buffer.
    Breakeven,
    /// No take-profit; the stop follows the best favourable excursion.
    Trailing,
}

/// Protective-level configuration. All distances are in pips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopPolicy {
    pub mode: ProtectionMode,
    /// Price units per pip.
    pub pip_size: f64,
    /// Initial stop distance. Also the breakeven trigger distance.
    pub stop_loss_pips: f64,
    /// Take-profit distance. `0` places no take-profit.
    pub take_profit_pips: f64,
    /// Distance beyond entry the breakeven stop is placed at.
    pub breakeven_pips: f64,
    /// Trailing advances in whole steps of this size. `0` trails continuously.
    pub trailing_step_pips: f64,
}

impl StopPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.pip_size.is_finite() && self.pip_size > 0.0) {
            return Err(Error::Config(format!(
                "pip_size must be positive, got {}",
                self.pip_size
            )));
        }
        if !(self.stop_loss_pips.is_finite() && self.stop_loss_pips > 0.0) {
            return Err(Error::Config(format!(
                "stop_loss_pips must be positive, got {}",
                self.stop_loss_pips
            )));
        }
        for (name, value) in [
            ("take_profit_pips", self.take_profit_pips),
            ("breakeven_pips", self.breakeven_pips),
            ("trailing_step_pips", self.trailing_step_pips),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Config(format!(
                    "{name} must be zero or positive, got {value}"
                )));
            }
        }
        // Breakeven triggers at the stop distance; a buffer that large would
        // put the new stop at or through the market.
        if self.mode == ProtectionMode::Breakeven && self.breakeven_pips >= self.stop_loss_pips {
            return Err(Error::Config(format!(
                "breakeven_pips ({}) must be below stop_loss_pips ({})",
                self.breakeven_pips, self.stop_loss_pips
            )));
        }
        Ok(())
    }

    /// Stop and take-profit distances to attach to a new market order.
    pub fn open_distances(&self) -> (Option<f64>, Option<f64>) {
        (Some(self.stop_loss_pips), self.take_profit_distance())
    }

    /// Levels a position opened at `entry_price` starts with.
    pub fn fixed_levels(&self, direction: Direction, entry_price: f64) -> Levels {
        Levels {
            stop_loss: Some(self.offset(direction, entry_price, -self.stop_loss_pips)),
            take_profit: self
                .take_profit_distance()
                .map(|tp| self.offset(direction, entry_price, tp)),
        }
    }

    /// Tolerance used when comparing price levels.
    pub fn price_epsilon(&self) -> f64 {
        self.pip_size * 1e-3
    }

    fn take_profit_distance(&self) -> Option<f64> {
        match self.mode {
            ProtectionMode::Trailing => None,
            _ if self.take_profit_pips > 0.0 => Some(self.take_profit_pips),
            _ => None,
        }
    }

    /// Price `pips` away from `price` in the favourable direction
    /// (negative `pips` moves against the position).
    fn offset(&self, direction: Direction, price: f64, pips: f64) -> f64 {
        price + direction.sign() * pips * self.pip_size
    }
}

/// A stop-loss / take-profit pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Computes the next protective levels for open positions and remembers the
/// best favourable excursion per direction between ticks.
#[derive(Debug, Clone)]
pub struct StopManager {
    policy: StopPolicy,
    excursions: HashMap<Direction, f64>,
}

impl StopManager {
    pub fn new(policy: StopPolicy) -> Self {
        Self {
            policy,
            excursions: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &StopPolicy {
        &self.policy
    }

    /// Best favourable excursion seen for the slot, in pips.
    pub fn excursion(&self, direction: Direction) -> f64 {
        self.excursions.get(&direction).copied().unwrap_or(0.0)
    }

    /// Forget the ratchet for a slot. Called when a new position opens and
    /// when the venue reports the slot's position closed.
    pub fn reset(&mut self, direction: Direction) {
        self.excursions.remove(&direction);
    }

    /// Fold the position's current profit into the ratchet and compute the
    /// levels it should carry now.
    pub fn candidate(&mut self, position: &Position) -> Levels {
        let excursion = self.excursions.entry(position.direction).or_insert(0.0);
        if position.pips > *excursion {
            *excursion = position.pips;
        }
        let excursion = *excursion;

        let policy = &self.policy;
        let direction = position.direction;
        let entry = position.entry_price;
        let fixed = policy.fixed_levels(direction, entry);

        match policy.mode {
            ProtectionMode::Fixed => fixed,
            ProtectionMode::Breakeven => {
                let stop_loss = if position.pips >= policy.stop_loss_pips {
                    Some(policy.offset(direction, entry, policy.breakeven_pips))
                } else {
                    position.stop_loss.or(fixed.stop_loss)
                };
                Levels {
                    stop_loss,
                    take_profit: fixed.take_profit,
                }
            }
            ProtectionMode::Trailing => {
                let trailed = if policy.trailing_step_pips > 0.0 {
                    (excursion / policy.trailing_step_pips).floor() * policy.trailing_step_pips
                } else {
                    excursion
                };
                let stop = policy.offset(direction, entry, trailed - policy.stop_loss_pips);
                // The venue may already hold a tighter stop (e.g. the ratchet
                // was rebuilt after a restart); never hand back a looser one.
                let stop = match position.stop_loss {
                    Some(current) => tighter(direction, stop, current),
                    None => stop,
                };
                Levels {
                    stop_loss: Some(stop),
                    take_profit: None,
                }
            }
        }
    }

    /// Per-tick update. Returns the new levels only when they differ from
    /// what the position already carries.
    pub fn update(&mut self, position: &Position) -> Option<Levels> {
        let next = self.candidate(position);
        let eps = self.policy.price_epsilon();
        let changed = differs(next.stop_loss, position.stop_loss, eps)
            || differs(next.take_profit, position.take_profit, eps);
        if changed {
            debug!(
                position = %position.id,
                direction = %position.direction,
                stop_loss = ?next.stop_loss,
                take_profit = ?next.take_profit,
                excursion = self.excursion(position.direction),
                "Protective levels changed"
            );
            Some(next)
        } else {
            None
        }
    }
}

fn tighter(direction: Direction, a: f64, b: f64) -> f64 {
    match direction {
        Direction::Long => a.max(b),
        Direction::Short => a.min(b),
    }
}

fn differs(a: Option<f64>, b: Option<f64>, eps: f64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() > eps,
        (None, None) => false,
        _ => true,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
