use async_trait::async_trait;
use rusqlite::params;
use std::sync::Arc;

use super::{CollabError, EmotionEntry, EmotionLogger};
use crate::clock::Clock;
use crate::storage::{from_ms, sql_limit, to_ms, truncate_ms, Database};

/// Append-only mood journal.
#[derive(Debug, Clone)]
pub struct EmotionJournal {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl EmotionJournal {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// # Errors
    /// Returns an error for an empty emotion or a failed write.
    pub async fn log(
        &self,
        user: &str,
        emotion: &str,
        note: Option<&str>,
    ) -> Result<EmotionEntry, CollabError> {
        let emotion = emotion.trim().to_lowercase();
        if emotion.is_empty() {
            return Err(CollabError::Empty("emotion"));
        }
        let note = note.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
        let recorded_at = truncate_ms(self.clock.now());
        let user = user.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO emotions (user_id, emotion, note, recorded_ms) VALUES (?1, ?2, ?3, ?4)",
                    params![user, emotion, note, to_ms(recorded_at)],
                )?;
                Ok(EmotionEntry {
                    id: conn.last_insert_rowid(),
                    user,
                    emotion,
                    note,
                    recorded_at,
                })
            })
            .await
    }
}

#[async_trait]
impl EmotionLogger for EmotionJournal {
    async fn recent_emotions(
        &self,
        user: &str,
        limit: usize,
    ) -> Result<Vec<EmotionEntry>, CollabError> {
        let user = user.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, emotion, note, recorded_ms FROM emotions
                     WHERE user_id = ?1 ORDER BY recorded_ms DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![user, sql_limit(limit)], |row| {
                    Ok(EmotionEntry {
                        id: row.get(0)?,
                        user: row.get(1)?,
                        emotion: row.get(2)?,
                        note: row.get(3)?,
                        recorded_at: from_ms(row.get(4)?),
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }
}
