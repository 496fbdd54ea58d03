mod config;
pub mod database;
pub mod migrations;

pub use config::{
    BusConfig, Config, GeneratorConfig, GeneratorProvider, LedgerConfig, ReconcilerConfig,
    ServerConfig, SweepConfig,
};
pub use database::Database;

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Returns `~/.config/nudgeroom[-dev]/` based on NUDGEROOM_ENV.
///
/// Set NUDGEROOM_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("NUDGEROOM_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("nudgeroom-dev")
    } else {
        base_dir.join("nudgeroom")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Instants are persisted as UTC epoch milliseconds.
pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Truncate to the persisted precision so in-memory values compare equal to
/// what a later read returns.
pub(crate) fn truncate_ms(at: DateTime<Utc>) -> DateTime<Utc> {
    from_ms(to_ms(at))
}

/// SQLite has no u64; clamp scan limits into its integer range.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
