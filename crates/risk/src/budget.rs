use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Daily loss accounting and martingale sizing for one instrument.
///
/// Mutated only by the owning engine: `on_tick` at the top of every tick and
/// `on_position_closed` from the closure handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBudget {
    /// `None` until the first tick is seen.
    trading_day: Option<NaiveDate>,
    realized_loss_today: f64,
    loss_multiplier: u32,
}

impl Default for RiskBudget {
    fn default() -> Self {
        Self {
            trading_day: None,
            realized_loss_today: 0.0,
            loss_multiplier: 1,
        }
    }
}

impl RiskBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a budget from a persisted snapshot. Out-of-range values are
    /// clamped back into the valid domain (loss >= 0, multiplier >= 1).
    pub fn restore(trading_day: NaiveDate, realized_loss_today: f64, loss_multiplier: u32) -> Self {
        let realized_loss_today = if realized_loss_today.is_finite() {
            realized_loss_today.max(0.0)
        } else {
            0.0
        };
        Self {
            trading_day: Some(trading_day),
            realized_loss_today,
            loss_multiplier: loss_multiplier.max(1),
        }
    }

    pub fn trading_day(&self) -> Option<NaiveDate> {
        self.trading_day
    }

    pub fn realized_loss_today(&self) -> f64 {
        self.realized_loss_today
    }

    pub fn loss_multiplier(&self) -> u32 {
        self.loss_multiplier
    }

    /// Roll the budget over when `today` is a new trading day.
    /// Returns `true` when a rollover happened.
    pub fn on_tick(&mut self, today: NaiveDate) -> bool {
        if self.trading_day == Some(today) {
            return false;
        }
        info!(
            day = %today,
            previous_loss = self.realized_loss_today,
            "New trading day, daily loss budget reset"
        );
        self.trading_day = Some(today);
        self.realized_loss_today = 0.0;
        true
    }

    /// A zero `max_daily_loss` disables the budget.
    pub fn can_open(&self, max_daily_loss: f64) -> bool {
        max_daily_loss == 0.0 || self.realized_loss_today < max_daily_loss
    }

    /// Apply one realized result. A profit of exactly zero counts as a win.
    pub fn on_position_closed(&mut self, profit: f64, martingale_enabled: bool) {
        if profit < 0.0 {
            self.realized_loss_today += profit.abs();
            if martingale_enabled {
                self.loss_multiplier = self.loss_multiplier.saturating_add(1);
            }
        } else {
            self.loss_multiplier = 1;
        }
        debug!(
            profit,
            realized_loss_today = self.realized_loss_today,
            loss_multiplier = self.loss_multiplier,
            "Risk budget updated"
        );
    }

    pub fn sized_volume(&self, base_volume: f64) -> f64 {
        base_volume * f64::from(self.loss_multiplier)
    }
}
