use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use common::{
    BlockReason, ClosedPositionEvent, Direction, EngineCommand, EngineEvent, EngineState, Error,
    ExecutionGateway, GatewayOperation, MarketTick, OpenRequest, Position, Result,
};
use engine::{EngineRunner, EngineSettings, Journal, StrategyEngine, TickOutcome};
use paper::PaperGateway;
use risk::ProtectionMode;
use strategy::{PriceHistory, Signal, SignalConfig, SignalSource};

const INSTRUMENT: &str = "EURUSD";
const LABEL: &str = "trend-bot";
const PIP: f64 = 0.0001;
const EPS: f64 = 1e-7;

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Signal source that returns whatever the test last set.
struct Scripted(Arc<Mutex<Signal>>);

impl SignalSource for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn evaluate(&self, _history: &PriceHistory) -> Signal {
        *self.0.lock().unwrap()
    }
}

/// Long whenever the latest price is at or above a threshold, so the signal
/// is tied to the tick and not to when the test flips a switch.
struct LongAbove(f64);

impl SignalSource for LongAbove {
    fn name(&self) -> &str {
        "long-above"
    }

    fn evaluate(&self, history: &PriceHistory) -> Signal {
        match history.last() {
            Some(price) if price >= self.0 => Signal::Long,
            _ => Signal::Neutral,
        }
    }
}

fn settings(protection: ProtectionMode) -> EngineSettings {
    EngineSettings {
        instrument: INSTRUMENT.into(),
        label: LABEL.into(),
        base_volume: 0.15,
        pip_size: PIP,
        stop_loss_pips: 35.0,
        take_profit_pips: 135.0,
        protection,
        breakeven_pips: 2.0,
        trailing_step_pips: 0.0,
        max_daily_loss: 0.0,
        martingale: false,
        blackout_weekday: chrono::Weekday::Fri,
        blackout_start: chrono::NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        history_len: 50,
        signal: SignalConfig {
            signal_type: "rsi_threshold".into(),
            params: HashMap::new(),
        },
    }
}

/// Monday 2024-03-04 unless stated otherwise.
fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
}

fn friday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 8, hour, minute, 0).unwrap()
}

fn tick(at: DateTime<Utc>, price: f64) -> MarketTick {
    MarketTick {
        instrument: INSTRUMENT.into(),
        price,
        bar_closed: true,
        timestamp: at,
    }
}

async fn paper() -> Arc<PaperGateway> {
    let gw = Arc::new(PaperGateway::new(0.0, 100_000.0));
    gw.add_instrument(INSTRUMENT, PIP).await;
    gw
}

/// Drives a `StrategyEngine` directly, delivering venue closures between
/// ticks the same way `EngineRunner` does.
struct Harness {
    paper: Arc<PaperGateway>,
    engine: StrategyEngine,
    signal: Arc<Mutex<Signal>>,
    closed_rx: mpsc::Receiver<ClosedPositionEvent>,
    events: mpsc::Receiver<EngineEvent>,
}

impl Harness {
    async fn new(settings: EngineSettings) -> Self {
        let paper = paper().await;
        Self::with_gateway(settings, paper.clone(), paper).await
    }

    async fn with_gateway(
        settings: EngineSettings,
        paper: Arc<PaperGateway>,
        gateway: Arc<dyn ExecutionGateway>,
    ) -> Self {
        let closed_rx = paper.subscribe(INSTRUMENT, LABEL).await;
        let (event_tx, events) = mpsc::channel(256);
        let signal = Arc::new(Mutex::new(Signal::Neutral));
        let engine = StrategyEngine::new(
            settings,
            Box::new(Scripted(signal.clone())),
            gateway,
            event_tx,
        )
        .unwrap();
        Self {
            paper,
            engine,
            signal,
            closed_rx,
            events,
        }
    }

    async fn step(&mut self, at: DateTime<Utc>, price: f64, signal: Signal) -> TickOutcome {
        *self.signal.lock().unwrap() = signal;
        let t = tick(at, price);
        self.paper.update_price(&t).await;
        self.deliver_closures();
        let outcome = self.engine.on_tick(&t).await;
        self.deliver_closures();
        outcome
    }

    fn deliver_closures(&mut self) {
        while let Ok(event) = self.closed_rx.try_recv() {
            self.engine.on_position_closed(&event);
        }
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn positions(&self) -> Vec<Position> {
        self.paper.find_all(LABEL, INSTRUMENT).await.unwrap()
    }

    async fn position(&self, direction: Direction) -> Option<Position> {
        self.positions()
            .await
            .into_iter()
            .find(|p| p.direction == direction)
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < EPS,
        "expected {expected}, got {actual}"
    );
}

// ─── Entries ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fixed_levels_are_placed_at_open_and_left_alone() {
    let mut h = Harness::new(settings(ProtectionMode::Fixed)).await;

    let out = h.step(monday(9, 0), 1.1000, Signal::Long).await;
    assert_eq!(out.opened, vec![Direction::Long]);

    let long = h.position(Direction::Long).await.unwrap();
    assert_close(long.stop_loss.unwrap(), 1.0965);
    assert_close(long.take_profit.unwrap(), 1.1135);
    assert_close(long.volume, 0.15);

    for price in [1.1010, 1.1060, 1.0990] {
        let out = h.step(monday(9, 1), price, Signal::Neutral).await;
        assert_eq!(out.modified, 0);
    }
    let long = h.position(Direction::Long).await.unwrap();
    assert_close(long.stop_loss.unwrap(), 1.0965);
    assert_close(long.take_profit.unwrap(), 1.1135);
}

#[tokio::test]
async fn repeated_signal_never_opens_a_second_position() {
    let mut h = Harness::new(settings(ProtectionMode::Fixed)).await;

    for minute in 0..5 {
        h.step(monday(9, minute), 1.1000, Signal::Long).await;
    }
    assert_eq!(h.positions().await.len(), 1);
}

#[tokio::test]
async fn opposite_signal_closes_the_other_side_first() {
    let mut h = Harness::new(settings(ProtectionMode::Fixed)).await;
    h.step(monday(9, 0), 1.1000, Signal::Long).await;

    let out = h.step(monday(9, 5), 1.1020, Signal::Short).await;
    assert_eq!(out.closed, 1);
    assert_eq!(out.opened, vec![Direction::Short]);

    let positions = h.positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].direction, Direction::Short);
    assert_close(positions[0].stop_loss.unwrap(), 1.1055);
    assert_close(positions[0].take_profit.unwrap(), 1.0885);

    // The closed long was a win.
    assert_eq!(h.engine.budget().realized_loss_today(), 0.0);
}

#[tokio::test]
async fn ticks_for_other_instruments_are_ignored() {
    let mut h = Harness::new(settings(ProtectionMode::Fixed)).await;
    *h.signal.lock().unwrap() = Signal::Long;
    let mut other = tick(monday(9, 0), 1.2500);
    other.instrument = "GBPUSD".into();

    let out = h.engine.on_tick(&other).await;
    assert_eq!(out, TickOutcome::default());
    assert!(h.engine.history().is_empty());
    assert!(h.positions().await.is_empty());
}

// ─── Daily budget and martingale ──────────────────────────────────────────────

#[tokio::test]
async fn exhausted_budget_blocks_entries_until_the_next_day() {
    let mut s = settings(ProtectionMode::Fixed);
    s.base_volume = 0.3;
    s.max_daily_loss = 100.0;
    let mut h = Harness::new(s).await;

    h.step(monday(9, 0), 1.1000, Signal::Long).await;
    // Through the 1.0965 stop: 40 pips on 0.3 lots.
    h.step(monday(9, 30), 1.0960, Signal::Neutral).await;
    assert!(h.positions().await.is_empty());
    assert_close(h.engine.budget().realized_loss_today(), 120.0);
    h.drain_events();

    let out = h.step(monday(10, 0), 1.0960, Signal::Long).await;
    assert!(out.opened.is_empty());
    assert!(h.positions().await.is_empty());
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::OpenBlocked {
            direction: Direction::Long,
            reason: BlockReason::DailyLossBudget,
            ..
        }
    )));

    let tuesday = Utc.with_ymd_and_hms(2024, 3, 5, 0, 1, 0).unwrap();
    let out = h.step(tuesday, 1.0960, Signal::Long).await;
    assert_eq!(out.opened, vec![Direction::Long]);
    assert_eq!(h.engine.budget().realized_loss_today(), 0.0);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::DayRolled { .. })));
}

#[tokio::test]
async fn martingale_scales_volume_after_each_loss() {
    let mut s = settings(ProtectionMode::Fixed);
    s.base_volume = 0.1;
    s.martingale = true;
    let mut h = Harness::new(s).await;

    h.step(monday(9, 0), 1.1000, Signal::Long).await;
    assert_close(h.position(Direction::Long).await.unwrap().volume, 0.1);
    h.step(monday(9, 10), 1.0960, Signal::Neutral).await;
    assert_eq!(h.engine.budget().loss_multiplier(), 2);

    h.step(monday(9, 20), 1.0960, Signal::Long).await;
    assert_close(h.position(Direction::Long).await.unwrap().volume, 0.2);
    h.step(monday(9, 30), 1.0920, Signal::Neutral).await;
    assert_eq!(h.engine.budget().loss_multiplier(), 3);

    h.step(monday(9, 40), 1.0920, Signal::Long).await;
    assert_close(h.position(Direction::Long).await.unwrap().volume, 0.3);

    // Closing the long in profit resets the multiplier.
    h.step(monday(9, 50), 1.0970, Signal::Short).await;
    assert_eq!(h.engine.budget().loss_multiplier(), 1);
    assert_close(h.engine.budget().realized_loss_today(), 40.0 + 80.0);
}

#[tokio::test]
async fn closures_for_other_labels_do_not_touch_the_budget() {
    let mut h = Harness::new(settings(ProtectionMode::Fixed)).await;
    h.engine.on_position_closed(&ClosedPositionEvent {
        position_id: "x".into(),
        instrument: INSTRUMENT.into(),
        label: "someone-else".into(),
        direction: Direction::Long,
        volume: 1.0,
        entry_price: 1.1,
        exit_price: 1.0,
        gross_profit: -10_000.0,
        reason: common::CloseReason::StopLoss,
        closed_at: monday(9, 0),
    });
    assert_eq!(h.engine.budget().realized_loss_today(), 0.0);
}

// ─── Blackout ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn blackout_closes_everything_and_blocks_entries() {
    let mut h = Harness::new(settings(ProtectionMode::Fixed)).await;

    let out = h.step(friday(19, 59), 1.1000, Signal::Long).await;
    assert_eq!(out.opened, vec![Direction::Long]);
    assert!(!out.blackout);

    let out = h.step(friday(20, 0), 1.1005, Signal::Long).await;
    assert!(out.blackout);
    assert_eq!(out.closed, 1);
    assert!(out.opened.is_empty());
    assert!(h.positions().await.is_empty());

    let out = h.step(friday(21, 30), 1.1005, Signal::Short).await;
    assert!(out.blackout);
    assert!(h.positions().await.is_empty());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::BlackoutClose { closed: 1, .. })));
}

#[tokio::test]
async fn blackout_only_applies_on_the_configured_weekday() {
    let mut h = Harness::new(settings(ProtectionMode::Fixed)).await;
    let out = h.step(monday(22, 0), 1.1000, Signal::Long).await;
    assert!(!out.blackout);
    assert_eq!(out.opened, vec![Direction::Long]);
}

// ─── Stop management ──────────────────────────────────────────────────────────

#[tokio::test]
async fn trailing_stop_follows_the_best_excursion() {
    let mut h = Harness::new(settings(ProtectionMode::Trailing)).await;

    h.step(monday(9, 0), 1.1000, Signal::Long).await;
    let long = h.position(Direction::Long).await.unwrap();
    assert_close(long.stop_loss.unwrap(), 1.0965);
    assert!(long.take_profit.is_none());

    let out = h.step(monday(9, 1), 1.1050, Signal::Neutral).await;
    assert_eq!(out.modified, 1);
    assert_close(h.position(Direction::Long).await.unwrap().stop_loss.unwrap(), 1.1015);

    let out = h.step(monday(9, 2), 1.1020, Signal::Neutral).await;
    assert_eq!(out.modified, 0);
    assert_close(h.position(Direction::Long).await.unwrap().stop_loss.unwrap(), 1.1015);

    // Back through the trailed stop: closed in profit.
    h.step(monday(9, 3), 1.1010, Signal::Neutral).await;
    assert!(h.positions().await.is_empty());
    assert_eq!(h.engine.budget().realized_loss_today(), 0.0);
    assert_eq!(h.engine.stops().excursion(Direction::Long), 0.0);
}

#[tokio::test]
async fn breakeven_moves_stop_past_entry_once_triggered() {
    let mut h = Harness::new(settings(ProtectionMode::Breakeven)).await;

    h.step(monday(9, 0), 1.1000, Signal::Short).await;
    let out = h.step(monday(9, 1), 1.0980, Signal::Neutral).await;
    assert_eq!(out.modified, 0);

    let out = h.step(monday(9, 2), 1.0960, Signal::Neutral).await;
    assert_eq!(out.modified, 1);
    let short = h.position(Direction::Short).await.unwrap();
    assert_close(short.stop_loss.unwrap(), 1.0998);
    assert_close(short.take_profit.unwrap(), 1.0865);
}

/// Wraps the paper venue and refuses stop modifications while `fail_modify`
/// is set.
struct FlakyGateway {
    inner: Arc<PaperGateway>,
    fail_modify: AtomicBool,
}

#[async_trait]
impl ExecutionGateway for FlakyGateway {
    async fn open(&self, request: &OpenRequest) -> Result<Position> {
        self.inner.open(request).await
    }

    async fn modify(&self, id: &str, stop_loss: Option<f64>, take_profit: Option<f64>) -> Result<()> {
        if self.fail_modify.load(Ordering::SeqCst) {
            return Err(Error::rejected(GatewayOperation::Modify, "market closed"));
        }
        self.inner.modify(id, stop_loss, take_profit).await
    }

    async fn close(&self, id: &str) -> Result<ClosedPositionEvent> {
        self.inner.close(id).await
    }

    async fn find_all(&self, label: &str, instrument: &str) -> Result<Vec<Position>> {
        self.inner.find_all(label, instrument).await
    }
}

#[tokio::test]
async fn rejected_modify_is_reported_and_retried_next_tick() {
    let paper = paper().await;
    let flaky = Arc::new(FlakyGateway {
        inner: paper.clone(),
        fail_modify: AtomicBool::new(true),
    });
    let mut h = Harness::with_gateway(settings(ProtectionMode::Trailing), paper, flaky.clone()).await;

    h.step(monday(9, 0), 1.1000, Signal::Long).await;
    let out = h.step(monday(9, 1), 1.1050, Signal::Neutral).await;
    assert_eq!(out.modified, 0);
    assert_eq!(out.failures, 1);
    assert_close(h.position(Direction::Long).await.unwrap().stop_loss.unwrap(), 1.0965);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::GatewayRejected {
            operation: GatewayOperation::Modify,
            ..
        }
    )));

    flaky.fail_modify.store(false, Ordering::SeqCst);
    let out = h.step(monday(9, 2), 1.1040, Signal::Neutral).await;
    assert_eq!(out.modified, 1);
    assert_close(h.position(Direction::Long).await.unwrap().stop_loss.unwrap(), 1.1015);
}

#[tokio::test]
async fn duplicate_positions_surface_an_invariant_violation() {
    let mut h = Harness::new(settings(ProtectionMode::Trailing)).await;
    h.step(monday(9, 0), 1.1000, Signal::Neutral).await;
    for id in ["dup-1", "dup-2"] {
        h.paper
            .inject_position(Position {
                id: id.into(),
                instrument: INSTRUMENT.into(),
                label: LABEL.into(),
                direction: Direction::Long,
                entry_price: 1.1,
                volume: 0.15,
                stop_loss: Some(1.0965),
                take_profit: None,
                pips: 0.0,
                opened_at: monday(9, 0),
            })
            .await;
    }

    let out = h.step(monday(9, 1), 1.1050, Signal::Long).await;
    assert!(out.opened.is_empty());
    assert_eq!(out.modified, 0);
    assert!(out.failures >= 1);
    assert_eq!(h.positions().await.len(), 2);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::InvariantViolation {
            direction: Direction::Long,
            count: 2,
            ..
        }
    )));

    // Blackout still closes every position under the label.
    let out = h.step(friday(20, 0), 1.1050, Signal::Neutral).await;
    assert_eq!(out.closed, 2);
    assert!(h.positions().await.is_empty());
}

// ─── Runner ───────────────────────────────────────────────────────────────────

async fn feed(paper: &PaperGateway, handle: &engine::EngineHandle, t: MarketTick) {
    paper.update_price(&t).await;
    assert!(handle.tick(t).await);
}

#[tokio::test]
async fn runner_pauses_and_resumes_entries() {
    let paper = paper().await;
    let closed_rx = paper.subscribe(INSTRUMENT, LABEL).await;
    let (event_tx, _events) = mpsc::channel(256);
    let signal = Arc::new(Mutex::new(Signal::Long));
    let engine = StrategyEngine::new(
        settings(ProtectionMode::Fixed),
        Box::new(Scripted(signal.clone())),
        paper.clone(),
        event_tx,
    )
    .unwrap();
    let (runner, handle) = EngineRunner::new(engine, closed_rx, None);
    let task = tokio::spawn(runner.run());

    handle.send(EngineCommand::Pause).await;
    feed(&paper, &handle, tick(monday(9, 0), 1.1000)).await;
    handle.send(EngineCommand::Resume).await;
    feed(&paper, &handle, tick(monday(9, 1), 1.1000)).await;
    handle.send(EngineCommand::Stop).await;

    let engine = task.await.unwrap();
    assert!(!engine.is_paused());
    assert_eq!(handle.state().await, EngineState::Stopped);
    assert!(!handle.tick(tick(monday(9, 2), 1.1)).await);

    let positions = paper.find_all(LABEL, INSTRUMENT).await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].opened_at, monday(9, 1));
}

#[tokio::test]
async fn runner_journals_closures_and_budget_survives_restart() {
    let journal = Journal::in_memory().await.unwrap();
    let paper = paper().await;
    let mut s = settings(ProtectionMode::Fixed);
    s.base_volume = 0.3;
    s.max_daily_loss = 100.0;
    s.martingale = true;

    let closed_rx = paper.subscribe(INSTRUMENT, LABEL).await;
    let (event_tx, _events) = mpsc::channel(256);
    let engine = StrategyEngine::new(
        s.clone(),
        Box::new(LongAbove(1.0999)),
        paper.clone(),
        event_tx,
    )
    .unwrap();
    let (runner, handle) = EngineRunner::new(engine, closed_rx, Some(journal.clone()));
    let task = tokio::spawn(runner.run());

    feed(&paper, &handle, tick(monday(9, 0), 1.1000)).await;
    feed(&paper, &handle, tick(monday(9, 30), 1.0960)).await;
    handle.send(EngineCommand::Stop).await;
    let stopped = task.await.unwrap();
    assert_close(stopped.budget().realized_loss_today(), 120.0);

    let closed = journal.closed_positions(INSTRUMENT, LABEL).await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_close(closed[0].gross_profit, -120.0);

    let restored = journal.load_budget(INSTRUMENT, LABEL).await.unwrap().unwrap();
    assert_eq!(&restored, stopped.budget());
    assert_eq!(restored.loss_multiplier(), 2);

    // A fresh engine picks up where the old one left off.
    let (event_tx, mut events) = mpsc::channel(256);
    let mut engine = StrategyEngine::new(s, Box::new(LongAbove(1.09)), paper.clone(), event_tx)
        .unwrap()
        .with_budget(restored);
    let out = engine.on_tick(&tick(monday(10, 0), 1.0960)).await;
    assert!(out.opened.is_empty());
    let mut blocked = false;
    while let Ok(event) = events.try_recv() {
        blocked |= matches!(event, EngineEvent::OpenBlocked { .. });
    }
    assert!(blocked);
}

#[tokio::test]
async fn engine_from_settings_builds_the_configured_source() {
    let (event_tx, _events) = mpsc::channel(8);
    let gw = paper().await;
    let engine = StrategyEngine::from_settings(settings(ProtectionMode::Fixed), gw, event_tx);
    assert!(engine.is_ok());

    let mut bad = settings(ProtectionMode::Fixed);
    bad.signal.signal_type = "astrology".into();
    let (event_tx, _events) = mpsc::channel(8);
    assert!(matches!(
        StrategyEngine::from_settings(bad, paper().await, event_tx),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn history_shorter_than_signal_warm_up_is_rejected() {
    let mut short = settings(ProtectionMode::Fixed);
    short.history_len = 10;
    short.signal = SignalConfig {
        signal_type: "ma_crossover".into(),
        params: HashMap::from([
            ("fast".to_string(), toml::Value::Integer(5)),
            ("slow".to_string(), toml::Value::Integer(30)),
        ]),
    };
    let (event_tx, _events) = mpsc::channel(8);
    assert!(matches!(
        StrategyEngine::from_settings(short.clone(), paper().await, event_tx),
        Err(Error::Config(_))
    ));

    // slow + 1 closed bars is exactly enough.
    short.history_len = 31;
    let (event_tx, _events) = mpsc::channel(8);
    assert!(StrategyEngine::from_settings(short, paper().await, event_tx).is_ok());
}
