pub mod macd;
pub mod rsi;
pub mod sma;

pub use macd::{Crossover, MacdIndicator};
pub use rsi::RsiIndicator;
pub use sma::sma;
