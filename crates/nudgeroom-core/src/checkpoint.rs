//! Durable per-user delivery cursor.
//!
//! Writes are a max-merge upsert, so two connections of the same user can
//! save in any order and the stored cursor never moves backwards.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::DatabaseError;
use crate::storage::{from_ms, to_ms, truncate_ms, Database};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub user: String,
    /// Delivery time of the last nudge delivered to this user.
    pub last_nudge: DateTime<Utc>,
    /// Resolution time of the last bet event delivered to this user.
    pub last_bet: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    db: Database,
    clock: Arc<dyn Clock>,
    backlog_window: Duration,
}

impl CheckpointStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>, backlog_window: Duration) -> Self {
        Self {
            db,
            clock,
            backlog_window,
        }
    }

    /// The stored checkpoint, if any.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn get(&self, user: &str) -> Result<Option<Checkpoint>, DatabaseError> {
        let user = user.to_string();
        self.db
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT last_nudge_ms, last_bet_ms FROM checkpoints WHERE user_id = ?1",
                        [&user],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?
                    .map(|(nudge_ms, bet_ms)| Checkpoint {
                        user: user.clone(),
                        last_nudge: from_ms(nudge_ms),
                        last_bet: from_ms(bet_ms),
                    }))
            })
            .await
    }

    /// The stored checkpoint, or one a backlog window before now.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn load(&self, user: &str) -> Result<Checkpoint, DatabaseError> {
        if let Some(checkpoint) = self.get(user).await? {
            return Ok(checkpoint);
        }
        let start = truncate_ms(self.clock.now() - self.backlog_window);
        Ok(Checkpoint {
            user: user.to_string(),
            last_nudge: start,
            last_bet: start,
        })
    }

    /// Merge `checkpoint` into storage, keeping the later of each cursor.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), DatabaseError> {
        let user = checkpoint.user.clone();
        let nudge_ms = to_ms(checkpoint.last_nudge);
        let bet_ms = to_ms(checkpoint.last_bet);
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO checkpoints (user_id, last_nudge_ms, last_bet_ms) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id) DO UPDATE SET
                         last_nudge_ms = MAX(last_nudge_ms, excluded.last_nudge_ms),
                         last_bet_ms = MAX(last_bet_ms, excluded.last_bet_ms)",
                    params![user, nudge_ms, bet_ms],
                )?;
                Ok(())
            })
            .await
    }
}
