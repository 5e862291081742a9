use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use common::{
    ClosedPositionEvent, CloseReason, Direction, Error, ExecutionGateway, GatewayOperation,
    MarketTick, OpenRequest, Position, Result,
};

/// Capacity of each closure subscription channel.
const CLOSURE_CHANNEL_CAPACITY: usize = 64;

/// Simulated venue for paper trading.
///
/// Market orders fill at the latest known price with configurable slippage.
/// Stop-loss and take-profit levels are enforced on every price update, and
/// every closure is delivered exactly once to the subscriber registered for
/// the position's (instrument, label).
pub struct PaperGateway {
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
    /// Units per lot, used to convert price moves into account currency.
    lot_size: f64,
    book: RwLock<Book>,
    subscribers: RwLock<HashMap<(String, String), mpsc::Sender<ClosedPositionEvent>>>,
}

#[derive(Default)]
struct Book {
    quotes: HashMap<String, Quote>,
    positions: Vec<Position>,
}

struct Quote {
    pip_size: f64,
    price: Option<f64>,
    time: DateTime<Utc>,
}

impl PaperGateway {
    pub fn new(slippage_bps: f64, lot_size: f64) -> Self {
        info!(slippage_bps, lot_size, "PaperGateway initialized");
        Self {
            slippage_bps,
            lot_size,
            book: RwLock::new(Book::default()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Make an instrument tradable. Orders on unknown instruments are rejected.
    pub async fn add_instrument(&self, instrument: &str, pip_size: f64) {
        self.book.write().await.quotes.insert(
            instrument.to_string(),
            Quote {
                pip_size,
                price: None,
                time: Utc::now(),
            },
        );
    }

    /// Register for closure notifications of positions tagged `label` on
    /// `instrument`. A second subscription replaces the first.
    pub async fn subscribe(&self, instrument: &str, label: &str) -> mpsc::Receiver<ClosedPositionEvent> {
        let (tx, rx) = mpsc::channel(CLOSURE_CHANNEL_CAPACITY);
        self.subscribers
            .write()
            .await
            .insert((instrument.to_string(), label.to_string()), tx);
        rx
    }

    /// Apply a price update: refresh profit of open positions and close any
    /// whose stop-loss or take-profit was touched. Returns the number of
    /// positions closed.
    pub async fn update_price(&self, tick: &MarketTick) -> usize {
        let closed = {
            let mut book = self.book.write().await;
            let Some(quote) = book.quotes.get_mut(&tick.instrument) else {
                debug!(instrument = %tick.instrument, "Price for unknown instrument ignored");
                return 0;
            };
            quote.price = Some(tick.price);
            quote.time = tick.timestamp;
            let pip_size = quote.pip_size;

            let mut closed = Vec::new();
            let mut remaining = Vec::with_capacity(book.positions.len());
            for mut position in std::mem::take(&mut book.positions) {
                if position.instrument != tick.instrument {
                    remaining.push(position);
                    continue;
                }
                position.pips = profit_pips(&position, tick.price, pip_size);
                match triggered(&position, tick.price) {
                    Some(reason) => {
                        closed.push(self.settle(&position, tick.price, reason, tick.timestamp));
                    }
                    None => remaining.push(position),
                }
            }
            book.positions = remaining;
            closed
        };

        let count = closed.len();
        for event in closed {
            info!(
                id = %event.position_id,
                reason = ?event.reason,
                profit = event.gross_profit,
                "Paper position hit protective level"
            );
            self.dispatch(event).await;
        }
        count
    }

    fn settle(
        &self,
        position: &Position,
        exit_price: f64,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> ClosedPositionEvent {
        let gross_profit = (exit_price - position.entry_price)
            * position.direction.sign()
            * position.volume
            * self.lot_size;
        ClosedPositionEvent {
            position_id: position.id.clone(),
            instrument: position.instrument.clone(),
            label: position.label.clone(),
            direction: position.direction,
            volume: position.volume,
            entry_price: position.entry_price,
            exit_price,
            gross_profit,
            reason,
            closed_at,
        }
    }

    async fn dispatch(&self, event: ClosedPositionEvent) {
        let key = (event.instrument.clone(), event.label.clone());
        let tx = self.subscribers.read().await.get(&key).cloned();
        match tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    warn!(instrument = %key.0, label = %key.1, "Closure subscriber dropped");
                }
            }
            None => debug!(instrument = %key.0, label = %key.1, "No closure subscriber"),
        }
    }
}

fn profit_pips(position: &Position, price: f64, pip_size: f64) -> f64 {
    (price - position.entry_price) * position.direction.sign() / pip_size
}

fn triggered(position: &Position, price: f64) -> Option<CloseReason> {
    let (stop_hit, target_hit) = match position.direction {
        Direction::Long => (
            position.stop_loss.is_some_and(|s| price <= s),
            position.take_profit.is_some_and(|t| price >= t),
        ),
        Direction::Short => (
            position.stop_loss.is_some_and(|s| price >= s),
            position.take_profit.is_some_and(|t| price <= t),
        ),
    };
    if stop_hit {
        Some(CloseReason::StopLoss)
    } else if target_hit {
        Some(CloseReason::TakeProfit)
    } else {
        None
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn open(&self, request: &OpenRequest) -> Result<Position> {
        if !(request.volume.is_finite() && request.volume > 0.0) {
            return Err(Error::rejected(
                GatewayOperation::Open,
                format!("invalid volume {}", request.volume),
            ));
        }

        let mut book = self.book.write().await;
        let quote = book.quotes.get(&request.instrument).ok_or_else(|| {
            Error::rejected(
                GatewayOperation::Open,
                format!("unknown instrument '{}'", request.instrument),
            )
        })?;
        let mid_price = quote.price.ok_or_else(|| {
            Error::rejected(
                GatewayOperation::Open,
                format!(
                    "no price for '{}'. Ensure market ticks are flowing.",
                    request.instrument
                ),
            )
        })?;
        let pip_size = quote.pip_size;
        let opened_at = quote.time;

        // Apply slippage: longs pay more, shorts receive less
        let sign = request.direction.sign();
        let fill_price = mid_price * (1.0 + sign * self.slippage_bps / 10_000.0);

        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            instrument: request.instrument.clone(),
            label: request.label.clone(),
            direction: request.direction,
            entry_price: fill_price,
            volume: request.volume,
            stop_loss: request
                .stop_loss_pips
                .map(|pips| fill_price - sign * pips * pip_size),
            take_profit: request
                .take_profit_pips
                .map(|pips| fill_price + sign * pips * pip_size),
            pips: (mid_price - fill_price) * sign / pip_size,
            opened_at,
        };

        debug!(
            id = %position.id,
            instrument = %position.instrument,
            direction = %position.direction,
            mid = mid_price,
            fill = fill_price,
            volume = position.volume,
            "Paper fill simulated"
        );

        book.positions.push(position.clone());
        Ok(position)
    }

    async fn modify(
        &self,
        position_id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<()> {
        let mut book = self.book.write().await;
        let Book { quotes, positions } = &mut *book;
        let position = positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or_else(|| {
                Error::rejected(
                    GatewayOperation::Modify,
                    format!("position '{position_id}' not found"),
                )
            })?;

        // A stop already through the market would close the position on the
        // spot; the venue refuses it instead.
        if let (Some(stop), Some(price)) = (
            stop_loss,
            quotes.get(&position.instrument).and_then(|q| q.price),
        ) {
            let through = match position.direction {
                Direction::Long => stop >= price,
                Direction::Short => stop <= price,
            };
            if through {
                return Err(Error::rejected(
                    GatewayOperation::Modify,
                    format!("stop {stop} is through market price {price}"),
                ));
            }
        }

        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        Ok(())
    }

    async fn close(&self, position_id: &str) -> Result<ClosedPositionEvent> {
        let event = {
            let mut book = self.book.write().await;
            let idx = book
                .positions
                .iter()
                .position(|p| p.id == position_id)
                .ok_or_else(|| {
                    Error::rejected(
                        GatewayOperation::Close,
                        format!("position '{position_id}' not found"),
                    )
                })?;
            let position = book.positions.remove(idx);
            let (price, time) = book
                .quotes
                .get(&position.instrument)
                .and_then(|q| q.price.map(|p| (p, q.time)))
                .unwrap_or((position.entry_price, position.opened_at));
            self.settle(&position, price, CloseReason::Requested, time)
        };

        self.dispatch(event.clone()).await;
        Ok(event)
    }

    async fn find_all(&self, label: &str, instrument: &str) -> Result<Vec<Position>> {
        Ok(self
            .book
            .read()
            .await
            .positions
            .iter()
            .filter(|p| p.label == label && p.instrument == instrument)
            .cloned()
            .collect())
    }
}

impl PaperGateway {
    /// Insert a position as-is, bypassing order checks. Used to simulate
    /// foreign or inconsistent venue state.
    pub async fn inject_position(&self, position: Position) {
        self.book.write().await.positions.push(position);
    }
}
