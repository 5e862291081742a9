/// Process-level configuration loaded from environment variables at startup.
/// Malformed values cause an immediate panic with a clear message.
///
/// Per-instrument engine parameters live in the TOML file named by
/// `engine_config_path`, not here.
#[derive(Debug, Clone)]
pub struct Config {
    // Engine config file path
    pub engine_config_path: String,

    // Database
    pub database_url: String,

    // Paper venue
    pub paper_slippage_bps: f64,
    pub paper_lot_size: f64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            engine_config_path: optional_env("ENGINE_CONFIG_PATH")
                .unwrap_or_else(|| "config/engines.toml".to_string()),
            database_url: optional_env("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://trendbot.db?mode=rwc".to_string()),
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 0.0),
            paper_lot_size: parsed_env("PAPER_LOT_SIZE", 100_000.0),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env(key: &str, default: f64) -> f64 {
    match optional_env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            panic!("Environment variable '{key}' must be a number, got: '{raw}'")
        }),
        None => default,
    }
}
