//! Core error types for nudgeroom-core.
//!
//! Store-level errors (`ReminderError`, `WagerError`, `LedgerError`, ...) live
//! next to their stores; this module holds the shared database, configuration
//! and validation errors plus the aggregate [`CoreError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::collab::CollabError;
use crate::generator::GeneratorError;
use crate::ledger::LedgerError;
use crate::reconciler::ReconcileError;
use crate::reminder::ReminderError;
use crate::rules::RuleError;
use crate::sweep::SweepError;
use crate::wager::WagerError;

/// Core error type for nudgeroom-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Point/streak ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Bet placement and resolution errors
    #[error("Wager error: {0}")]
    Wager(#[from] WagerError),

    /// Nudge scheduling and triggering errors
    #[error("Reminder error: {0}")]
    Reminder(#[from] ReminderError),

    /// Message generation errors
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// Task, emotion and session collaborator errors
    #[error("{0}")]
    Collab(#[from] CollabError),

    /// Connection reconciliation errors
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Rule file and evaluation errors
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Background sweep errors
    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A UNIQUE or CHECK constraint rejected the write
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A previous holder of the connection panicked
    #[error("Database connection mutex poisoned")]
    Poisoned,

    /// The blocking worker running the query did not complete
    #[error("Database worker failed: {0}")]
    WorkerFailed(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Empty value where one is required
    #[error("'{0}' must not be empty")]
    Empty(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy => {
                    DatabaseError::Locked
                }
                rusqlite::ErrorCode::ConstraintViolation => {
                    DatabaseError::Constraint(msg.clone().unwrap_or_else(|| code.to_string()))
                }
                _ => DatabaseError::QueryFailed(err.to_string()),
            },
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_maps_to_constraint() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(matches!(DatabaseError::from(err), DatabaseError::Constraint(_)));
    }

    #[test]
    fn other_failures_map_to_query_failed() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing", []).unwrap_err();
        assert!(matches!(DatabaseError::from(err), DatabaseError::QueryFailed(_)));
    }

    #[test]
    fn busy_database_maps_to_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let holder = rusqlite::Connection::open(&path).unwrap();
        holder.execute_batch("CREATE TABLE t (k TEXT); BEGIN IMMEDIATE;").unwrap();

        let other = rusqlite::Connection::open(&path).unwrap();
        other.busy_timeout(std::time::Duration::ZERO).unwrap();
        let err = other.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }

    #[test]
    fn core_error_wraps_database_error() {
        let err: CoreError = DatabaseError::Locked.into();
        assert_eq!(err.to_string(), "Database error: Database is locked");
    }
}
