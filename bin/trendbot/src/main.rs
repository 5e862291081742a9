use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineCommand, EngineEvent, ExecutionGateway, MarketTick};
use engine::{BinanceStream, EngineFile, EngineHandle, EngineRunner, Journal, StrategyEngine};
use paper::PaperGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let engine_file = EngineFile::load(&cfg.engine_config_path)
        .with_context(|| format!("loading engine config from {}", cfg.engine_config_path))?;
    info!(
        engines = engine_file.engines.len(),
        config = %cfg.engine_config_path,
        "TrendBot starting"
    );

    // ── Journal ───────────────────────────────────────────────────────────────
    let journal = Journal::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening journal at {}", cfg.database_url))?;

    // ── Venue ─────────────────────────────────────────────────────────────────
    let paper = Arc::new(PaperGateway::new(cfg.paper_slippage_bps, cfg.paper_lot_size));
    let gateway: Arc<dyn ExecutionGateway> = paper.clone();

    // ── Engines ───────────────────────────────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(1024);
    let mut instruments = Vec::new();
    let mut seen = HashSet::new();
    let mut handles: Vec<EngineHandle> = Vec::new();
    let mut tasks = Vec::new();

    for settings in engine_file.engines {
        if seen.insert(settings.instrument.clone()) {
            paper.add_instrument(&settings.instrument, settings.pip_size).await;
            instruments.push(settings.instrument.clone());
        }

        let closed_rx = paper.subscribe(&settings.instrument, &settings.label).await;
        let restored = journal
            .load_budget(&settings.instrument, &settings.label)
            .await
            .with_context(|| format!("restoring risk budget for {}", settings.instrument))?;

        let instrument = settings.instrument.clone();
        let mut engine = StrategyEngine::from_settings(settings, gateway.clone(), event_tx.clone())
            .with_context(|| format!("building engine for {instrument}"))?;
        if let Some(budget) = restored {
            engine = engine.with_budget(budget);
        }

        let (runner, handle) = EngineRunner::new(engine, closed_rx, Some(journal.clone()));
        tasks.push(tokio::spawn(runner.run()));
        handles.push(handle);
    }
    drop(event_tx);

    // ── Event forwarder ───────────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    // ── Tick feeds and router ─────────────────────────────────────────────────
    let (tick_tx, mut tick_rx) = mpsc::channel::<MarketTick>(1024);
    let streams: Vec<_> = instruments
        .iter()
        .map(|instrument| tokio::spawn(BinanceStream::new(instrument.clone(), tick_tx.clone()).run()))
        .collect();
    drop(tick_tx);

    let router_handles = handles.clone();
    let router = tokio::spawn(async move {
        while let Some(tick) = tick_rx.recv().await {
            // Venue first, so stop-outs on this price reach the engine
            // before the tick does.
            paper.update_price(&tick).await;
            for handle in router_handles.iter().filter(|h| h.instrument() == tick.instrument) {
                if !handle.tick(tick.clone()).await {
                    warn!(instrument = %tick.instrument, label = %handle.label(), "Engine stopped, tick dropped");
                }
            }
        }
    });

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received. Stopping engines.");

    for stream in streams {
        stream.abort();
    }
    router.abort();
    for handle in &handles {
        handle.send(EngineCommand::Stop).await;
    }
    for task in tasks {
        match task.await {
            Ok(engine) => {
                let budget = engine.budget();
                info!(
                    instrument = %engine.settings().instrument,
                    label = %engine.settings().label,
                    realized_loss_today = budget.realized_loss_today(),
                    loss_multiplier = budget.loss_multiplier(),
                    "Engine stopped"
                );
            }
            Err(e) => error!(error = %e, "Engine task failed"),
        }
    }
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::DayRolled { instrument, day } => {
            info!(%instrument, %day, "New trading day");
        }
        EngineEvent::PositionOpened { position } => {
            info!(
                instrument = %position.instrument,
                direction = %position.direction,
                entry = position.entry_price,
                volume = position.volume,
                "Opened"
            );
        }
        EngineEvent::PositionClosed {
            event,
            realized_loss_today,
            loss_multiplier,
        } => {
            info!(
                instrument = %event.instrument,
                direction = %event.direction,
                profit = event.gross_profit,
                realized_loss_today,
                loss_multiplier,
                "Closed"
            );
        }
        EngineEvent::StopAdjusted {
            instrument,
            direction,
            stop_loss,
            take_profit,
        } => {
            info!(%instrument, %direction, ?stop_loss, ?take_profit, "Stop adjusted");
        }
        EngineEvent::OpenBlocked {
            instrument,
            direction,
            reason,
        } => {
            info!(%instrument, %direction, %reason, "Entry blocked");
        }
        EngineEvent::BlackoutClose { instrument, closed } => {
            info!(%instrument, closed, "Blackout close");
        }
        EngineEvent::GatewayRejected {
            instrument,
            operation,
            error,
        } => {
            warn!(%instrument, %operation, %error, "Venue rejected request");
        }
        EngineEvent::InvariantViolation {
            instrument,
            direction,
            count,
        } => {
            error!(%instrument, %direction, count, "Duplicate positions in slot");
        }
    }
}
