//! Bearer-token sessions.
//!
//! Tokens are handed out once and only their SHA-256 digest is stored.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{Auth, CollabError};
use crate::clock::Clock;
use crate::events::{DomainEvent, EventBus};
use crate::storage::{to_ms, Database};

fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct SessionRegistry {
    db: Database,
    clock: Arc<dyn Clock>,
    bus: EventBus,
}

impl SessionRegistry {
    pub fn new(db: Database, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self { db, clock, bus }
    }

    /// Create a session for `user` and return its token.
    ///
    /// # Errors
    /// Returns an error for an empty user or a failed write.
    pub async fn issue(&self, user: &str) -> Result<String, CollabError> {
        let user = user.trim().to_string();
        if user.is_empty() {
            return Err(CollabError::Empty("user"));
        }
        let token = format!("nr_{}", Uuid::new_v4().simple());
        let token_digest = digest(&token);
        let now_ms = to_ms(self.clock.now());
        let owner = user.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (token_digest, user_id, active, created_ms) VALUES (?1, ?2, 1, ?3)",
                    params![token_digest, owner, now_ms],
                )?;
                Ok::<_, CollabError>(())
            })
            .await?;
        info!(user = %user, "session issued");
        Ok(token)
    }

    /// Deactivate every session of `user`. Returns how many were active.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn revoke_user(&self, user: &str) -> Result<usize, CollabError> {
        let owner = user.to_string();
        let revoked = self
            .db
            .call(move |conn| {
                Ok::<_, CollabError>(conn.execute(
                    "UPDATE sessions SET active = 0 WHERE user_id = ?1 AND active = 1",
                    [owner],
                )?)
            })
            .await?;
        info!(user = %user, revoked, "sessions revoked");
        self.bus.publish(DomainEvent::SessionRevoked {
            user: user.to_string(),
        });
        Ok(revoked)
    }

    /// Deactivate a single token. Returns its user if it was active.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn revoke_token(&self, token: &str) -> Result<Option<String>, CollabError> {
        let token_digest = digest(token);
        let user = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let user: Option<String> = tx
                    .query_row(
                        "SELECT user_id FROM sessions WHERE token_digest = ?1 AND active = 1",
                        [&token_digest],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.execute(
                    "UPDATE sessions SET active = 0 WHERE token_digest = ?1",
                    [&token_digest],
                )?;
                tx.commit()?;
                Ok::<_, CollabError>(user)
            })
            .await?;
        if let Some(user) = &user {
            self.bus.publish(DomainEvent::SessionRevoked { user: user.clone() });
        }
        Ok(user)
    }
}

#[async_trait]
impl Auth for SessionRegistry {
    async fn current_user(&self, token: &str) -> Result<String, CollabError> {
        let token_digest = digest(token);
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT user_id FROM sessions WHERE token_digest = ?1 AND active = 1",
                    [token_digest],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or(CollabError::InvalidToken)
            })
            .await
    }

    async fn has_active_session(&self, user: &str) -> Result<bool, CollabError> {
        let user = user.to_string();
        self.db
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sessions WHERE user_id = ?1 AND active = 1",
                    [user],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }
}
