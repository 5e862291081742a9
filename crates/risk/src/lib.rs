pub mod budget;
pub mod stops;

pub use budget::RiskBudget;
pub use stops::{Levels, ProtectionMode, StopManager, StopPolicy};
