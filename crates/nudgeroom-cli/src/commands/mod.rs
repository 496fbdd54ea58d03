pub mod bet;
pub mod config;
pub mod emotion;
pub mod ledger;
pub mod nudge;
pub mod rules;
pub mod session;
pub mod task;

use chrono::{DateTime, Duration, Utc};
use nudgeroom_core::{Config, Services, ValidationError};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Services over the configured database and generator.
pub fn open_services() -> Result<Services, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    Ok(Services::open(&config)?)
}

/// Resolve an instant given either as RFC 3339 (`at`) or as minutes from
/// now (`in_mins`). Exactly one may be set; neither yields `None`.
pub fn resolve_instant(
    field: &str,
    at: Option<&str>,
    in_mins: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    match (at, in_mins) {
        (Some(_), Some(_)) => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: "give either a time or a minute offset, not both".to_string(),
        }),
        (Some(at), None) => DateTime::parse_from_rfc3339(at)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| ValidationError::InvalidValue {
                field: field.to_string(),
                message: format!("'{at}' is not an RFC 3339 time: {e}"),
            }),
        (None, Some(mins)) => Ok(Some(now + Duration::minutes(mins))),
        (None, None) => Ok(None),
    }
}

/// Like [`resolve_instant`], but the instant is mandatory.
pub fn require_instant(
    field: &str,
    at: Option<&str>,
    in_mins: Option<i64>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    resolve_instant(field, at, in_mins, now)?.ok_or_else(|| ValidationError::Empty(field.to_string()))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
