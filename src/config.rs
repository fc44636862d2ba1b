use std::env;

/// Runtime configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub bind: String,
    pub port: u16,
    pub database_url: String,
    /// Price feed base URL; overridable so tests and mirrors can stand in.
    pub feed_base_url: String,
    pub poll_interval_secs: u64,
    /// Retracement (percent) from the stored high that completes a cycle.
    pub cycle_end_percent: f64,
    /// Lookback window for the recent-trades summary.
    pub trade_window_secs: u64,
    /// Quote-asset suffix used when seeding the universe from the feed.
    pub quote_suffix: String,
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self {
            bind: env_str("COINWATCH_BIND", "0.0.0.0"),
            port: env_u16("COINWATCH_PORT", 8000),
            database_url: env_str("DATABASE_URL", "postgres://localhost/coinwatch"),
            feed_base_url: env_str("COINWATCH_FEED_URL", crate::api::binance::DEFAULT_API_BASE),
            poll_interval_secs: env_u64(
                "COINWATCH_POLL_INTERVAL_SECS",
                crate::monitor::DEFAULT_POLL_INTERVAL_SECS,
            ),
            cycle_end_percent: env_f64("COINWATCH_CYCLE_END_PERCENT", 2.0),
            trade_window_secs: env_u64(
                "COINWATCH_TRADE_WINDOW_SECS",
                crate::analysis::trades::DEFAULT_WINDOW_SECS,
            ),
            quote_suffix: env_str("COINWATCH_QUOTE_SUFFIX", "USDT"),
        }
    }
}
