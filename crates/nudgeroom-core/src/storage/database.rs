//! SQLite handle shared by every store.
//!
//! The connection sits behind a mutex that only serializes I/O; store
//! correctness comes from conditional writes, not from holding this lock
//! across a read and a later write. Queries run on tokio's blocking pool via
//! [`Database::call`] so a slow query never stalls other connection loops.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{data_dir, migrations};
use crate::error::DatabaseError;

/// Cloneable handle to the application database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database at `~/.config/nudgeroom/nudgeroom.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::DataDir(e.to_string()))?;
        Self::open_path(&dir.join("nudgeroom.db"))
    }

    /// Open (or create) the database at an explicit path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_path(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests and throwaway runs).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// # Errors
    /// Returns whatever `f` returns, or a [`DatabaseError`] if the worker
    /// could not run.
    pub async fn call<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<DatabaseError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| DatabaseError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| E::from(DatabaseError::WorkerFailed(e.to_string())))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_runs_queries_against_migrated_schema() {
        let db = Database::open_memory().unwrap();
        let count: i64 = db
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM nudges", [], |row| row.get(0))
                    .map_err(DatabaseError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn clones_share_one_connection() {
        let db = Database::open_memory().unwrap();
        let other = db.clone();
        db.call(|conn| {
            conn.execute(
                "INSERT INTO ledger (user_id, points, streak, updated_ms) VALUES ('u', 5, 0, 0)",
                [],
            )
            .map_err(DatabaseError::from)
        })
        .await
        .unwrap();

        let points: i64 = other
            .call(|conn| {
                conn.query_row("SELECT points FROM ledger WHERE user_id = 'u'", [], |row| {
                    row.get(0)
                })
                .map_err(DatabaseError::from)
            })
            .await
            .unwrap();
        assert_eq!(points, 5);
    }

    #[tokio::test]
    async fn file_database_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nudgeroom.db");
        {
            let db = Database::open_path(&path).unwrap();
            db.call(|conn| {
                conn.execute(
                    "INSERT INTO checkpoints (user_id, last_nudge_ms, last_bet_ms) VALUES ('u', 1, 2)",
                    [],
                )
                .map_err(DatabaseError::from)
            })
            .await
            .unwrap();
        }
        let db = Database::open_path(&path).unwrap();
        let nudge_ms: i64 = db
            .call(|conn| {
                conn.query_row(
                    "SELECT last_nudge_ms FROM checkpoints WHERE user_id = 'u'",
                    [],
                    |row| row.get(0),
                )
                .map_err(DatabaseError::from)
            })
            .await
            .unwrap();
        assert_eq!(nudge_ms, 1);
    }
}
