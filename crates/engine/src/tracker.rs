use std::sync::Arc;

use common::{Direction, Error, ExecutionGateway, Position, Result};

/// Read-through view of this engine's open positions on one instrument.
///
/// Holds no state of its own: every call queries the venue, so the
/// single-position-per-slot rule is checked against the venue's answer and
/// never against a cache.
#[derive(Clone)]
pub struct PositionTracker {
    gateway: Arc<dyn ExecutionGateway>,
    label: String,
    instrument: String,
}

impl PositionTracker {
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        label: impl Into<String>,
        instrument: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            label: label.into(),
            instrument: instrument.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// The open position in `direction`, if any.
    ///
    /// Returns `Error::InvariantViolation` when the venue reports more than
    /// one, rather than picking one of them.
    pub async fn find(&self, direction: Direction) -> Result<Option<Position>> {
        let mut matching: Vec<Position> = self
            .raw()
            .await?
            .into_iter()
            .filter(|p| p.direction == direction)
            .collect();
        match matching.len() {
            0 => Ok(None),
            1 => Ok(matching.pop()),
            count => Err(self.violation(direction, count)),
        }
    }

    /// All open positions, at most one per direction.
    pub async fn find_all(&self) -> Result<Vec<Position>> {
        let positions = self.raw().await?;
        for direction in Direction::ALL {
            let count = positions.iter().filter(|p| p.direction == direction).count();
            if count > 1 {
                return Err(self.violation(direction, count));
            }
        }
        Ok(positions)
    }

    /// Everything the venue reports under this label, without the slot
    /// check. Used where acting on every position is safe (closing).
    pub async fn raw(&self) -> Result<Vec<Position>> {
        self.gateway.find_all(&self.label, &self.instrument).await
    }

    fn violation(&self, direction: Direction, count: usize) -> Error {
        Error::InvariantViolation {
            instrument: self.instrument.clone(),
            direction,
            count,
        }
    }
}
