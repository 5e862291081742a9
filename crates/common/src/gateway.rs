use async_trait::async_trait;

use crate::{ClosedPositionEvent, OpenRequest, Position, Result};

/// Abstraction over order placement against a venue.
///
/// `PaperGateway` implements this for simulation.
///
/// Every call resolves before the caller proceeds; the engine never has two
/// requests in flight for the same slot. Failures are reported as
/// `Error::GatewayRejected`.
///
/// Closures (engine-requested or triggered by stop/take-profit) are also
/// delivered exactly once on the venue's closure channel; that channel, not
/// the return value of `close`, is what feeds the risk budget.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Submit a market order. Returns the venue's snapshot of the new position.
    async fn open(&self, request: &OpenRequest) -> Result<Position>;

    /// Replace the protective levels of an open position.
    async fn modify(
        &self,
        position_id: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<()>;

    /// Close an open position at market.
    async fn close(&self, position_id: &str) -> Result<ClosedPositionEvent>;

    /// All open positions tagged with `label` on `instrument`, any direction.
    async fn find_all(&self, label: &str, instrument: &str) -> Result<Vec<Position>>;
}
