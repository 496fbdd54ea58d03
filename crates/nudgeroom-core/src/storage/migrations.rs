//! Database schema migrations for nudgeroom.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (fresh database).
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: ledger, nudges, bets and checkpoints.
///
/// The CHECK constraints mirror the record invariants so a buggy writer
/// fails loudly instead of persisting a half-terminal row.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS ledger (
            user_id     TEXT PRIMARY KEY,
            points      INTEGER NOT NULL,
            streak      INTEGER NOT NULL DEFAULT 0 CHECK (streak >= 0),
            updated_ms  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nudges (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            task_id       TEXT NOT NULL,
            delivery_ms   INTEGER NOT NULL,
            triggered_ms  INTEGER,
            message       TEXT,
            canceled      INTEGER NOT NULL DEFAULT 0,
            created_ms    INTEGER NOT NULL,
            UNIQUE (user_id, task_id),
            CHECK ((triggered_ms IS NULL) = (message IS NULL)),
            CHECK (NOT (canceled = 1 AND triggered_ms IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_nudges_pending
            ON nudges(user_id, delivery_ms) WHERE triggered_ms IS NULL AND canceled = 0;
        CREATE INDEX IF NOT EXISTS idx_nudges_triggered
            ON nudges(user_id, delivery_ms) WHERE triggered_ms IS NOT NULL;

        CREATE TABLE IF NOT EXISTS bets (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            task_id       TEXT NOT NULL,
            wager         INTEGER NOT NULL CHECK (wager > 0),
            deadline_ms   INTEGER NOT NULL,
            task_due_ms   INTEGER,
            success       INTEGER,
            resolved_ms   INTEGER,
            reward        INTEGER,
            created_ms    INTEGER NOT NULL,
            UNIQUE (user_id, task_id),
            CHECK ((success IS NULL) = (resolved_ms IS NULL)),
            CHECK (task_due_ms IS NULL OR task_due_ms > deadline_ms)
        );

        CREATE INDEX IF NOT EXISTS idx_bets_open
            ON bets(user_id, deadline_ms) WHERE success IS NULL;
        CREATE INDEX IF NOT EXISTS idx_bets_resolved
            ON bets(user_id, resolved_ms) WHERE resolved_ms IS NOT NULL;

        CREATE TABLE IF NOT EXISTS checkpoints (
            user_id        TEXT PRIMARY KEY,
            last_nudge_ms  INTEGER NOT NULL,
            last_bet_ms    INTEGER NOT NULL
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: collaborator tables (tasks, emotion journal, sessions).
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            due_ms       INTEGER,
            status       TEXT NOT NULL DEFAULT 'pending',
            created_ms   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);

        CREATE TABLE IF NOT EXISTS emotions (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      TEXT NOT NULL,
            emotion      TEXT NOT NULL,
            note         TEXT,
            recorded_ms  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_emotions_user_time ON emotions(user_id, recorded_ms DESC);

        CREATE TABLE IF NOT EXISTS sessions (
            token_digest  TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            active        INTEGER NOT NULL DEFAULT 1,
            created_ms    INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id) WHERE active = 1;",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}
