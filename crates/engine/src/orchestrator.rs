use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use common::{
    BlockReason, ClosedPositionEvent, Direction, EngineEvent, Error, ExecutionGateway,
    GatewayOperation, MarketTick, OpenRequest, Result,
};
use risk::{RiskBudget, StopManager};
use strategy::{build_signal_source, PriceHistory, Signal, SignalSource};

use crate::config::EngineSettings;
use crate::tracker::PositionTracker;

/// What one tick did. Mostly useful to tests and debug logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// The tick fell inside the blackout window.
    pub blackout: bool,
    pub opened: Vec<Direction>,
    pub closed: usize,
    pub modified: usize,
    /// Gateway rejections and invariant violations surfaced this tick.
    pub failures: usize,
}

/// Position lifecycle and risk state machine for one instrument.
///
/// Owns the daily budget, the stop ratchet and the price history. Ticks and
/// closure notifications must be fed from a single task (see
/// `EngineRunner`); nothing here is shared.
pub struct StrategyEngine {
    settings: EngineSettings,
    signal: Box<dyn SignalSource>,
    gateway: Arc<dyn ExecutionGateway>,
    tracker: PositionTracker,
    budget: RiskBudget,
    stops: StopManager,
    history: PriceHistory,
    paused: bool,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl StrategyEngine {
    /// Build an engine with the signal source described in `settings`.
    pub fn from_settings(
        settings: EngineSettings,
        gateway: Arc<dyn ExecutionGateway>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Result<Self> {
        let name = format!("{}/{}", settings.instrument, settings.label);
        let signal = build_signal_source(&name, &settings.signal)?;
        Self::new(settings, signal, gateway, event_tx)
    }

    /// Build an engine around an injected signal source.
    /// Fails with `Error::Config` if the settings are invalid or the history
    /// window is too short for the source ever to produce a signal.
    pub fn new(
        settings: EngineSettings,
        signal: Box<dyn SignalSource>,
        gateway: Arc<dyn ExecutionGateway>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Result<Self> {
        settings.validate()?;
        let required = signal.min_history();
        if settings.history_len < required {
            return Err(Error::Config(format!(
                "history_len for '{}' is {} but signal '{}' needs {} bars",
                settings.instrument,
                settings.history_len,
                signal.name(),
                required
            )));
        }
        let tracker = PositionTracker::new(
            gateway.clone(),
            settings.label.clone(),
            settings.instrument.clone(),
        );
        info!(
            instrument = %settings.instrument,
            label = %settings.label,
            signal = %signal.name(),
            protection = ?settings.protection,
            "StrategyEngine configured"
        );
        Ok(Self {
            stops: StopManager::new(settings.stop_policy()),
            history: PriceHistory::new(settings.history_len),
            budget: RiskBudget::new(),
            paused: false,
            settings,
            signal,
            gateway,
            tracker,
            event_tx,
        })
    }

    /// Replace the starting budget, e.g. with a snapshot restored from the journal.
    pub fn with_budget(mut self, budget: RiskBudget) -> Self {
        info!(
            instrument = %self.settings.instrument,
            day = ?budget.trading_day(),
            realized_loss_today = budget.realized_loss_today(),
            loss_multiplier = budget.loss_multiplier(),
            "Risk budget restored"
        );
        self.budget = budget;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn budget(&self) -> &RiskBudget {
        &self.budget
    }

    pub fn stops(&self) -> &StopManager {
        &self.stops
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Process one price update.
    pub async fn on_tick(&mut self, tick: &MarketTick) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if tick.instrument != self.settings.instrument {
            debug!(
                expected = %self.settings.instrument,
                got = %tick.instrument,
                "Tick for another instrument ignored"
            );
            return outcome;
        }
        self.history.push(tick.price, tick.bar_closed);

        // ── Day rollover ─────────────────────────────────────────────────────
        let today = tick.timestamp.date_naive();
        if self.budget.on_tick(today) {
            self.emit(EngineEvent::DayRolled {
                instrument: self.settings.instrument.clone(),
                day: today,
            });
        }

        // ── Blackout window ──────────────────────────────────────────────────
        if self.in_blackout(tick.timestamp) {
            outcome.blackout = true;
            self.close_all(&mut outcome).await;
            return outcome;
        }

        // ── Signal and entries ───────────────────────────────────────────────
        let open_allowed = self.budget.can_open(self.settings.max_daily_loss);
        match self.signal.evaluate(&self.history) {
            Signal::Long => self.enter(Direction::Long, open_allowed, &mut outcome).await,
            Signal::Short => self.enter(Direction::Short, open_allowed, &mut outcome).await,
            Signal::Neutral => {}
        }

        // ── Stop management ──────────────────────────────────────────────────
        self.manage_stops(&mut outcome).await;

        if outcome != TickOutcome::default() {
            debug!(instrument = %self.settings.instrument, ?outcome, "Tick processed");
        }
        outcome
    }

    /// Apply a closure reported by the venue. Each closure must be delivered
    /// exactly once.
    pub fn on_position_closed(&mut self, event: &ClosedPositionEvent) {
        if event.label != self.settings.label || event.instrument != self.settings.instrument {
            warn!(
                instrument = %event.instrument,
                label = %event.label,
                "Closure for a position this engine does not own ignored"
            );
            return;
        }

        self.budget
            .on_position_closed(event.gross_profit, self.settings.martingale);
        self.stops.reset(event.direction);

        info!(
            instrument = %event.instrument,
            direction = %event.direction,
            reason = ?event.reason,
            profit = event.gross_profit,
            realized_loss_today = self.budget.realized_loss_today(),
            loss_multiplier = self.budget.loss_multiplier(),
            "Position closed"
        );
        self.emit(EngineEvent::PositionClosed {
            event: event.clone(),
            realized_loss_today: self.budget.realized_loss_today(),
            loss_multiplier: self.budget.loss_multiplier(),
        });
    }

    fn in_blackout(&self, at: DateTime<Utc>) -> bool {
        at.weekday() == self.settings.blackout_weekday && at.time() >= self.settings.blackout_start
    }

    async fn enter(&mut self, direction: Direction, open_allowed: bool, outcome: &mut TickOutcome) {
        let existing = match self.tracker.find(direction).await {
            Ok(existing) => existing,
            Err(e) => {
                self.surface(GatewayOperation::Query, e, outcome);
                return;
            }
        };
        if existing.is_some() {
            return;
        }

        let blocked = if !open_allowed {
            Some(BlockReason::DailyLossBudget)
        } else if self.paused {
            Some(BlockReason::Paused)
        } else {
            None
        };
        if let Some(reason) = blocked {
            debug!(instrument = %self.settings.instrument, %direction, %reason, "Entry blocked");
            self.emit(EngineEvent::OpenBlocked {
                instrument: self.settings.instrument.clone(),
                direction,
                reason,
            });
            return;
        }

        // Close the opposite side first.
        match self.tracker.raw().await {
            Ok(positions) => {
                for position in positions
                    .into_iter()
                    .filter(|p| p.direction == direction.opposite())
                {
                    match self.gateway.close(&position.id).await {
                        Ok(_) => outcome.closed += 1,
                        Err(e) => self.surface(GatewayOperation::Close, e, outcome),
                    }
                }
            }
            Err(e) => self.surface(GatewayOperation::Query, e, outcome),
        }

        let (stop_loss_pips, take_profit_pips) = self.stops.policy().open_distances();
        let request = OpenRequest {
            instrument: self.settings.instrument.clone(),
            label: self.settings.label.clone(),
            direction,
            volume: self.budget.sized_volume(self.settings.base_volume),
            stop_loss_pips,
            take_profit_pips,
        };

        match self.gateway.open(&request).await {
            Ok(position) => {
                self.stops.reset(direction);
                outcome.opened.push(direction);
                info!(
                    instrument = %position.instrument,
                    %direction,
                    id = %position.id,
                    entry = position.entry_price,
                    volume = position.volume,
                    stop_loss = ?position.stop_loss,
                    take_profit = ?position.take_profit,
                    "Position opened"
                );
                self.emit(EngineEvent::PositionOpened { position });
            }
            Err(e) => self.surface(GatewayOperation::Open, e, outcome),
        }
    }

    async fn manage_stops(&mut self, outcome: &mut TickOutcome) {
        for direction in Direction::ALL {
            let position = match self.tracker.find(direction).await {
                Ok(Some(position)) => position,
                Ok(None) => continue,
                Err(e) => {
                    self.surface(GatewayOperation::Query, e, outcome);
                    continue;
                }
            };

            let Some(levels) = self.stops.update(&position) else {
                continue;
            };
            match self
                .gateway
                .modify(&position.id, levels.stop_loss, levels.take_profit)
                .await
            {
                Ok(()) => {
                    outcome.modified += 1;
                    info!(
                        instrument = %position.instrument,
                        %direction,
                        stop_loss = ?levels.stop_loss,
                        take_profit = ?levels.take_profit,
                        excursion = self.stops.excursion(direction),
                        "Protective levels adjusted"
                    );
                    self.emit(EngineEvent::StopAdjusted {
                        instrument: position.instrument.clone(),
                        direction,
                        stop_loss: levels.stop_loss,
                        take_profit: levels.take_profit,
                    });
                }
                // Recomputed from scratch next tick; no retry here.
                Err(e) => self.surface(GatewayOperation::Modify, e, outcome),
            }
        }
    }

    async fn close_all(&mut self, outcome: &mut TickOutcome) {
        let positions = match self.tracker.raw().await {
            Ok(positions) => positions,
            Err(e) => {
                self.surface(GatewayOperation::Query, e, outcome);
                return;
            }
        };
        if positions.is_empty() {
            return;
        }

        let before = outcome.closed;
        for position in positions {
            match self.gateway.close(&position.id).await {
                Ok(_) => outcome.closed += 1,
                Err(e) => self.surface(GatewayOperation::Close, e, outcome),
            }
        }
        let closed = outcome.closed - before;
        info!(instrument = %self.settings.instrument, closed, "Blackout window: positions closed");
        self.emit(EngineEvent::BlackoutClose {
            instrument: self.settings.instrument.clone(),
            closed,
        });
    }

    /// Report a failure without aborting the tick.
    fn surface(&self, operation: GatewayOperation, err: Error, outcome: &mut TickOutcome) {
        outcome.failures += 1;
        let instrument = self.settings.instrument.clone();
        match err {
            Error::InvariantViolation {
                direction, count, ..
            } => {
                error!(%instrument, %direction, count, "More than one open position in slot");
                self.emit(EngineEvent::InvariantViolation {
                    instrument,
                    direction,
                    count,
                });
            }
            Error::GatewayRejected { operation, reason } => {
                warn!(%instrument, %operation, %reason, "Gateway rejected request");
                self.emit(EngineEvent::GatewayRejected {
                    instrument,
                    operation,
                    error: reason,
                });
            }
            other => {
                error!(%instrument, %operation, error = %other, "Gateway call failed");
                self.emit(EngineEvent::GatewayRejected {
                    instrument,
                    operation,
                    error: other.to_string(),
                });
            }
        }
    }

    /// Observability must never stall trading: a full or closed channel is
    /// logged and the event dropped.
    fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!(instrument = %self.settings.instrument, error = %e, "Engine event not delivered");
        }
    }
}
