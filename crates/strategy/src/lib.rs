pub mod config;
pub mod history;
pub mod indicators;
pub mod registry;
pub mod sources;

pub use config::SignalConfig;
pub use history::PriceHistory;
pub use registry::build_signal_source;

/// Direction suggested by a signal source on one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Long,
    Short,
    Neutral,
}

/// All signal implementations must satisfy this trait.
///
/// Evaluation is a pure function of the price history: no side effects, no
/// interior state. The engine owns the history and feeds it every tick.
pub trait SignalSource: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Evaluate the history. Returns `Signal::Neutral` while there is not
    /// enough data for the underlying indicator.
    fn evaluate(&self, history: &PriceHistory) -> Signal;

    /// Closed bars needed before `evaluate` can return anything but
    /// `Neutral`.
    fn min_history(&self) -> usize {
        1
    }
}
