//! Per-user point and streak balances.
//!
//! Balances are only mutated by the wager store, inside the same transaction
//! as the bet write that justifies the mutation. The `pub(crate)` helpers
//! below take a bare `&Connection` so they compose into that transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::clock::Clock;
use crate::error::DatabaseError;
use crate::storage::{from_ms, to_ms, Database};

/// A user's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user: String,
    pub points: i64,
    pub streak: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("insufficient points: need {needed}, have {available}")]
    InsufficientPoints { needed: i64, available: i64 },

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.into())
    }
}

/// Read-side handle to the ledger plus an operator grant.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    clock: Arc<dyn Clock>,
    starting_points: i64,
}

impl Ledger {
    pub fn new(db: Database, clock: Arc<dyn Clock>, starting_points: i64) -> Self {
        Self {
            db,
            clock,
            starting_points,
        }
    }

    /// Current balance; users without an entry report the starting balance.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn balance(&self, user: &str) -> Result<LedgerEntry, LedgerError> {
        let user = user.to_string();
        let starting = self.starting_points;
        let now = self.clock.now();
        self.db
            .call(move |conn| {
                Ok(read_entry(conn, &user)?.unwrap_or(LedgerEntry {
                    user,
                    points: starting,
                    streak: 0,
                    updated_at: now,
                }))
            })
            .await
    }

    /// All materialized entries, highest balance first.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, points, streak, updated_ms FROM ledger
                     ORDER BY points DESC, user_id",
                )?;
                let rows = stmt.query_map([], row_to_entry)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    /// Credit points outside of any bet (operator top-up).
    ///
    /// # Errors
    /// Returns an error for a non-positive amount or a failed write.
    pub async fn grant(&self, user: &str, amount: i64) -> Result<LedgerEntry, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let user = user.to_string();
        let starting = self.starting_points;
        let clock = Arc::clone(&self.clock);
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now_ms = to_ms(clock.now());
                credit(&tx, &user, amount, starting, now_ms)?;
                let entry = read_entry(&tx, &user)?.ok_or_else(|| {
                    DatabaseError::QueryFailed(format!("ledger entry for {user} vanished"))
                })?;
                tx.commit()?;
                Ok(entry)
            })
            .await
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        user: row.get(0)?,
        points: row.get(1)?,
        streak: row.get(2)?,
        updated_at: from_ms(row.get(3)?),
    })
}

pub(crate) fn read_entry(conn: &Connection, user: &str) -> rusqlite::Result<Option<LedgerEntry>> {
    conn.query_row(
        "SELECT user_id, points, streak, updated_ms FROM ledger WHERE user_id = ?1",
        [user],
        row_to_entry,
    )
    .optional()
}

fn ensure_entry(conn: &Connection, user: &str, starting: i64, now_ms: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO ledger (user_id, points, streak, updated_ms) VALUES (?1, ?2, 0, ?3)",
        params![user, starting, now_ms],
    )?;
    Ok(())
}

/// Streak as of now, before any mutation in the current transaction.
pub(crate) fn current_streak(conn: &Connection, user: &str) -> rusqlite::Result<u32> {
    Ok(read_entry(conn, user)?.map_or(0, |e| e.streak))
}

/// Conditional debit: succeeds only if the balance covers `amount`.
pub(crate) fn debit(
    conn: &Connection,
    user: &str,
    amount: i64,
    starting: i64,
    now_ms: i64,
) -> Result<(), LedgerError> {
    ensure_entry(conn, user, starting, now_ms)?;
    let changed = conn.execute(
        "UPDATE ledger SET points = points - ?2, updated_ms = ?3
         WHERE user_id = ?1 AND points >= ?2",
        params![user, amount, now_ms],
    )?;
    if changed == 1 {
        return Ok(());
    }
    let available = read_entry(conn, user)?.map_or(starting, |e| e.points);
    Err(LedgerError::InsufficientPoints {
        needed: amount,
        available,
    })
}

pub(crate) fn credit(
    conn: &Connection,
    user: &str,
    amount: i64,
    starting: i64,
    now_ms: i64,
) -> rusqlite::Result<()> {
    ensure_entry(conn, user, starting, now_ms)?;
    conn.execute(
        "UPDATE ledger SET points = points + ?2, updated_ms = ?3 WHERE user_id = ?1",
        params![user, amount, now_ms],
    )?;
    Ok(())
}

/// Credit a winning bet's reward and extend the streak.
pub(crate) fn record_win(
    conn: &Connection,
    user: &str,
    reward: i64,
    starting: i64,
    now_ms: i64,
) -> rusqlite::Result<()> {
    ensure_entry(conn, user, starting, now_ms)?;
    conn.execute(
        "UPDATE ledger SET points = points + ?2, streak = streak + 1, updated_ms = ?3
         WHERE user_id = ?1",
        params![user, reward, now_ms],
    )?;
    Ok(())
}

/// A lost bet keeps the wager and breaks the streak.
pub(crate) fn record_loss(
    conn: &Connection,
    user: &str,
    starting: i64,
    now_ms: i64,
) -> rusqlite::Result<()> {
    ensure_entry(conn, user, starting, now_ms)?;
    conn.execute(
        "UPDATE ledger SET streak = 0, updated_ms = ?2 WHERE user_id = ?1",
        params![user, now_ms],
    )?;
    Ok(())
}
