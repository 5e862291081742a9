use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use common::{ClosedPositionEvent, EngineCommand, EngineState, MarketTick};
use risk::RiskBudget;

use crate::journal::Journal;
use crate::orchestrator::StrategyEngine;

const INBOX_CAPACITY: usize = 1024;

/// Ticks and commands share one queue so a command takes effect exactly
/// between the ticks it was sent between.
enum Inbox {
    Tick(MarketTick),
    Command(EngineCommand),
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    inbox_tx: mpsc::Sender<Inbox>,
    state: Arc<RwLock<EngineState>>,
    instrument: String,
    label: String,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        if self.inbox_tx.send(Inbox::Command(cmd)).await.is_err() {
            warn!(instrument = %self.instrument, ?cmd, "Engine already stopped, command dropped");
        }
    }

    /// Queue a tick. Returns `false` once the engine has stopped.
    pub async fn tick(&self, tick: MarketTick) -> bool {
        self.inbox_tx.send(Inbox::Tick(tick)).await.is_ok()
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Drives one `StrategyEngine` from a single task.
///
/// Closure events are always drained before the next tick, so the budget a
/// tick sees already includes every closure the venue reported before it.
pub struct EngineRunner {
    engine: StrategyEngine,
    closed_rx: mpsc::Receiver<ClosedPositionEvent>,
    inbox_rx: mpsc::Receiver<Inbox>,
    state: Arc<RwLock<EngineState>>,
    journal: Option<Journal>,
    saved_budget: Option<RiskBudget>,
}

impl EngineRunner {
    pub fn new(
        engine: StrategyEngine,
        closed_rx: mpsc::Receiver<ClosedPositionEvent>,
        journal: Option<Journal>,
    ) -> (Self, EngineHandle) {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let state = Arc::new(RwLock::new(EngineState::Running));

        let handle = EngineHandle {
            inbox_tx,
            state: state.clone(),
            instrument: engine.settings().instrument.clone(),
            label: engine.settings().label.clone(),
        };
        let runner = EngineRunner {
            saved_budget: Some(engine.budget().clone()),
            engine,
            closed_rx,
            inbox_rx,
            state,
            journal,
        };
        (runner, handle)
    }

    /// Run until `Stop` is received or every handle is dropped. Returns the
    /// engine so its final state can be inspected. Call from `tokio::spawn`.
    pub async fn run(mut self) -> StrategyEngine {
        info!(
            instrument = %self.engine.settings().instrument,
            label = %self.engine.settings().label,
            "Engine running"
        );

        loop {
            tokio::select! {
                biased;

                Some(event) = self.closed_rx.recv() => {
                    self.on_closed(event).await;
                }

                msg = self.inbox_rx.recv() => match msg {
                    Some(Inbox::Tick(tick)) => {
                        self.engine.on_tick(&tick).await;
                        self.persist_budget().await;
                    }
                    Some(Inbox::Command(EngineCommand::Stop)) => {
                        info!(instrument = %self.engine.settings().instrument, "Engine stopping");
                        break;
                    }
                    Some(Inbox::Command(cmd)) => self.apply(cmd).await,
                    None => {
                        warn!(
                            instrument = %self.engine.settings().instrument,
                            "All engine handles dropped, shutting down"
                        );
                        break;
                    }
                },
            }
        }

        // Closures already delivered still count toward today's budget.
        while let Ok(event) = self.closed_rx.try_recv() {
            self.on_closed(event).await;
        }
        *self.state.write().await = EngineState::Stopped;
        self.engine
    }

    async fn apply(&mut self, cmd: EngineCommand) {
        let mut state = self.state.write().await;
        match (cmd, *state) {
            (EngineCommand::Pause, EngineState::Running) => {
                info!(instrument = %self.engine.settings().instrument, "Engine paused, entries suppressed");
                *state = EngineState::Paused;
                self.engine.set_paused(true);
            }
            (EngineCommand::Resume, EngineState::Paused) => {
                info!(instrument = %self.engine.settings().instrument, "Engine resumed");
                *state = EngineState::Running;
                self.engine.set_paused(false);
            }
            (cmd, current) => {
                warn!(instrument = %self.engine.settings().instrument, ?cmd, %current, "Command ignored");
            }
        }
    }

    async fn on_closed(&mut self, event: ClosedPositionEvent) {
        self.engine.on_position_closed(&event);
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_close(&event).await {
                error!(id = %event.position_id, error = %e, "Failed to journal closure");
            }
        }
        self.persist_budget().await;
    }

    async fn persist_budget(&mut self) {
        let Some(journal) = &self.journal else {
            return;
        };
        let budget = self.engine.budget();
        if self.saved_budget.as_ref() == Some(budget) {
            return;
        }
        let settings = self.engine.settings();
        match journal
            .save_budget(&settings.instrument, &settings.label, budget)
            .await
        {
            Ok(()) => self.saved_budget = Some(budget.clone()),
            Err(e) => error!(instrument = %settings.instrument, error = %e, "Failed to persist risk budget"),
        }
    }
}
