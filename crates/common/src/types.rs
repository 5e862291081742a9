use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Price update delivered to an engine.
/// Emitted on every kline update (1-minute candles from Binance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub instrument: String,
    /// Latest traded price of the current bar.
    pub price: f64,
    /// True when the bar has closed (finalized). Closed bars are appended to
    /// indicator history; open bars only update the forming value.
    pub bar_closed: bool,
    /// Venue time of the update. Day rollover and the blackout window are
    /// decided from this, never from the local wall clock.
    pub timestamp: DateTime<Utc>,
}

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Long, Direction::Short];

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// `+1.0` for long, `-1.0` for short. Multiply a favourable price move
    /// by this to get a signed profit.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Snapshot of an open position as reported by the venue.
///
/// Owned by the venue: the engine only ever holds copies obtained from a
/// fresh `ExecutionGateway::find_all` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Venue handle used for modify/close.
    pub id: String,
    pub instrument: String,
    /// Owner tag separating this engine's positions from other actors on the
    /// same instrument.
    pub label: String,
    pub direction: Direction,
    pub entry_price: f64,
    /// Volume in lots.
    pub volume: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Current unrealized profit in pips (negative when under water).
    pub pips: f64,
    pub opened_at: DateTime<Utc>,
}

/// Market order request sent to the venue.
///
/// Protective levels are distances in pips; the venue anchors them to the
/// fill price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRequest {
    pub instrument: String,
    pub label: String,
    pub direction: Direction,
    pub volume: f64,
    pub stop_loss_pips: Option<f64>,
    pub take_profit_pips: Option<f64>,
}

/// Why the venue closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Requested,
}

/// Delivered once per position closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPositionEvent {
    pub position_id: String,
    pub instrument: String,
    pub label: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Realized profit in account currency. Negative for a loss.
    pub gross_profit: f64,
    pub reason: CloseReason,
    pub closed_at: DateTime<Utc>,
}

/// Current state of an engine actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Commands sent to an engine via its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Suppress new entries. Blackout closure and stop management continue.
    Pause,
    Resume,
    Stop,
}

/// Venue call that produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayOperation {
    Open,
    Modify,
    Close,
    Query,
}

impl std::fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayOperation::Open => write!(f, "open"),
            GatewayOperation::Modify => write!(f, "modify"),
            GatewayOperation::Close => write!(f, "close"),
            GatewayOperation::Query => write!(f, "query"),
        }
    }
}

/// Why a signal did not turn into an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    DailyLossBudget,
    Paused,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::DailyLossBudget => write!(f, "daily loss budget exhausted"),
            BlockReason::Paused => write!(f, "engine paused"),
        }
    }
}

/// Observability events emitted by an engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    DayRolled {
        instrument: String,
        day: chrono::NaiveDate,
    },
    PositionOpened {
        position: Position,
    },
    PositionClosed {
        event: ClosedPositionEvent,
        realized_loss_today: f64,
        loss_multiplier: u32,
    },
    StopAdjusted {
        instrument: String,
        direction: Direction,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
    OpenBlocked {
        instrument: String,
        direction: Direction,
        reason: BlockReason,
    },
    BlackoutClose {
        instrument: String,
        closed: usize,
    },
    GatewayRejected {
        instrument: String,
        operation: GatewayOperation,
        error: String,
    },
    InvariantViolation {
        instrument: String,
        direction: Direction,
        count: usize,
    },
}
