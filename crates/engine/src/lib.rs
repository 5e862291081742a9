pub mod binance;
pub mod config;
pub mod journal;
pub mod lifecycle;
pub mod orchestrator;
pub mod tracker;

pub use binance::BinanceStream;
pub use config::{EngineFile, EngineSettings};
pub use journal::Journal;
pub use lifecycle::{EngineHandle, EngineRunner};
pub use orchestrator::{StrategyEngine, TickOutcome};
pub use tracker::PositionTracker;
