use thiserror::Error;

use crate::{Direction, GatewayOperation};

#[derive(Debug, Error)]
pub enum Error {
    /// The venue refused an open/modify/close request.
    #[error("Gateway rejected {operation}: {reason}")]
    GatewayRejected {
        operation: GatewayOperation,
        reason: String,
    },

    /// More than one open position found for a single (instrument, direction) slot.
    #[error("Invariant violation: {count} open {direction} positions on {instrument}")]
    InvariantViolation {
        instrument: String,
        direction: Direction,
        count: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn rejected(operation: GatewayOperation, reason: impl Into<String>) -> Self {
        Error::GatewayRejected {
            operation,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
