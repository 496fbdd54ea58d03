//! Scheduled nudges and their one-shot delivery.
//!
//! A nudge is pending until it is either triggered (a generated message is
//! attached) or canceled; both are terminal. `trigger` may run concurrently
//! from several connections and the background sweep. The message is
//! generated outside any lock, then a single conditional write decides the
//! winner. Losers get [`TriggerOutcome::NotEligible`] and must not retry.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DatabaseError;
use crate::events::{DomainEvent, EventBus};
use crate::generator::{validate_message, GeneratorError, MessageGenerator, NudgeContext};
use crate::storage::{from_ms, sql_limit, to_ms, truncate_ms, Database};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nudge {
    pub id: String,
    pub user: String,
    pub task: String,
    pub delivery_time: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    /// Present exactly when `triggered_at` is.
    pub message: Option<String>,
    pub canceled: bool,
    pub created_at: DateTime<Utc>,
}

impl Nudge {
    pub fn is_terminal(&self) -> bool {
        self.triggered_at.is_some() || self.canceled
    }
}

/// Why a nudge could not be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    NotFound,
    AlreadyTriggered,
    Canceled,
    NotYetDue { delivery_time: DateTime<Utc> },
}

impl std::fmt::Display for Ineligible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::AlreadyTriggered => f.write_str("already triggered"),
            Self::Canceled => f.write_str("canceled"),
            Self::NotYetDue { delivery_time } => write!(f, "not due until {delivery_time}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Triggered(Nudge),
    NotEligible(Ineligible),
}

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("a nudge already exists for task {task}")]
    Duplicate { task: String },

    #[error("delivery time {delivery_time} is not in the future")]
    PastTime { delivery_time: DateTime<Utc> },

    #[error("no nudge for task {task}")]
    NotFound { task: String },

    #[error("nudge for task {task} is already triggered or canceled")]
    AlreadyTerminal { task: String },

    #[error("message generation failed: {0}")]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for ReminderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.into())
    }
}

const NUDGE_COLUMNS: &str =
    "id, user_id, task_id, delivery_ms, triggered_ms, message, canceled, created_ms";

fn row_to_nudge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Nudge> {
    Ok(Nudge {
        id: row.get(0)?,
        user: row.get(1)?,
        task: row.get(2)?,
        delivery_time: from_ms(row.get(3)?),
        triggered_at: row.get::<_, Option<i64>>(4)?.map(from_ms),
        message: row.get(5)?,
        canceled: row.get(6)?,
        created_at: from_ms(row.get(7)?),
    })
}

fn find_nudge(conn: &Connection, user: &str, task: &str) -> rusqlite::Result<Option<Nudge>> {
    conn.query_row(
        &format!("SELECT {NUDGE_COLUMNS} FROM nudges WHERE user_id = ?1 AND task_id = ?2"),
        params![user, task],
        row_to_nudge,
    )
    .optional()
}

/// Explain why `(user, task)` is not eligible as of `now_ms`.
fn diagnose(conn: &Connection, user: &str, task: &str, now_ms: i64) -> rusqlite::Result<Ineligible> {
    Ok(match find_nudge(conn, user, task)? {
        None => Ineligible::NotFound,
        Some(n) if n.triggered_at.is_some() => Ineligible::AlreadyTriggered,
        Some(n) if n.canceled => Ineligible::Canceled,
        Some(n) if to_ms(n.delivery_time) > now_ms => Ineligible::NotYetDue {
            delivery_time: n.delivery_time,
        },
        // Eligible at read time but lost the write: someone else got there.
        Some(_) => Ineligible::AlreadyTriggered,
    })
}

#[derive(Debug, Clone)]
pub struct ReminderStore {
    db: Database,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    generator: Arc<dyn MessageGenerator>,
}

impl ReminderStore {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        generator: Arc<dyn MessageGenerator>,
    ) -> Self {
        Self {
            db,
            clock,
            bus,
            generator,
        }
    }

    pub fn generator(&self) -> &Arc<dyn MessageGenerator> {
        &self.generator
    }

    /// Create a pending nudge for `task`, due at `delivery_time`.
    ///
    /// # Errors
    /// Returns `PastTime` if `delivery_time` is not in the future, or
    /// `Duplicate` if the task already has a nudge in any state.
    pub async fn schedule(
        &self,
        user: &str,
        task: &str,
        delivery_time: DateTime<Utc>,
    ) -> Result<Nudge, ReminderError> {
        let delivery_time = truncate_ms(delivery_time);
        let now = truncate_ms(self.clock.now());
        if delivery_time <= now {
            return Err(ReminderError::PastTime { delivery_time });
        }
        let nudge = Nudge {
            id: Uuid::new_v4().to_string(),
            user: user.to_string(),
            task: task.to_string(),
            delivery_time,
            triggered_at: None,
            message: None,
            canceled: false,
            created_at: now,
        };
        let record = nudge.clone();
        self.db
            .call(move |conn| {
                let inserted = conn.execute(
                    &format!(
                        "INSERT INTO nudges ({NUDGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, NULL, NULL, 0, ?5)"
                    ),
                    params![
                        record.id,
                        record.user,
                        record.task,
                        to_ms(record.delivery_time),
                        to_ms(record.created_at),
                    ],
                );
                match inserted {
                    Ok(_) => Ok(()),
                    Err(e) => match DatabaseError::from(e) {
                        DatabaseError::Constraint(_) => {
                            Err(ReminderError::Duplicate { task: record.task })
                        }
                        other => Err(other.into()),
                    },
                }
            })
            .await?;

        info!(user = %nudge.user, task = %nudge.task, delivery = %nudge.delivery_time, "nudge scheduled");
        self.bus.publish(DomainEvent::NudgeScheduled {
            user: nudge.user.clone(),
            task: nudge.task.clone(),
            delivery: nudge.delivery_time,
        });
        Ok(nudge)
    }

    /// Cancel a pending nudge.
    ///
    /// # Errors
    /// Returns `NotFound`, or `AlreadyTerminal` if it was already triggered
    /// or canceled.
    pub async fn cancel(&self, user: &str, task: &str) -> Result<Nudge, ReminderError> {
        let user = user.to_string();
        let task = task.to_string();
        let nudge = self
            .db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE nudges SET canceled = 1
                     WHERE user_id = ?1 AND task_id = ?2 AND triggered_ms IS NULL AND canceled = 0",
                    params![user, task],
                )?;
                match find_nudge(conn, &user, &task)? {
                    None => Err(ReminderError::NotFound { task }),
                    Some(_) if changed != 1 => Err(ReminderError::AlreadyTerminal { task }),
                    Some(nudge) => Ok(nudge),
                }
            })
            .await?;

        info!(user = %nudge.user, task = %nudge.task, "nudge canceled");
        self.bus.publish(DomainEvent::NudgeCanceled {
            user: nudge.user.clone(),
            task: nudge.task.clone(),
        });
        Ok(nudge)
    }

    /// Generate and attach the message for a due nudge, at most once.
    ///
    /// # Errors
    /// Returns `Generator` if generation or validation fails (the nudge stays
    /// pending), or `Database` on storage failure. Ineligibility, including a
    /// lost race, is an `Ok(NotEligible)` outcome.
    pub async fn trigger(
        &self,
        user: &str,
        task: &str,
        context: &NudgeContext,
    ) -> Result<TriggerOutcome, ReminderError> {
        let candidate = {
            let user = user.to_string();
            let task = task.to_string();
            let clock = Arc::clone(&self.clock);
            self.db
                .call(move |conn| {
                    let now_ms = to_ms(clock.now());
                    let found = conn
                        .query_row(
                            &format!(
                                "SELECT {NUDGE_COLUMNS} FROM nudges
                                 WHERE user_id = ?1 AND task_id = ?2 AND triggered_ms IS NULL
                                   AND canceled = 0 AND delivery_ms <= ?3"
                            ),
                            params![user, task, now_ms],
                            row_to_nudge,
                        )
                        .optional()?;
                    match found {
                        Some(nudge) => Ok::<_, ReminderError>(Ok(nudge)),
                        None => Ok(Err(diagnose(conn, &user, &task, now_ms)?)),
                    }
                })
                .await?
        };
        let nudge = match candidate {
            Ok(nudge) => nudge,
            Err(reason) => {
                debug!(user, task, %reason, "nudge not eligible");
                return Ok(TriggerOutcome::NotEligible(reason));
            }
        };

        let generated = self
            .generator
            .generate(context)
            .await
            .and_then(|raw| validate_message(&raw));
        let message = match generated {
            Ok(message) => message,
            Err(e) => {
                warn!(user, task, generator = self.generator.name(), error = %e, "nudge generation failed");
                return Err(e.into());
            }
        };

        let clock = Arc::clone(&self.clock);
        let id = nudge.id.clone();
        let text = message.clone();
        let (user_id, task_id) = (nudge.user.clone(), nudge.task.clone());
        let won = self
            .db
            .call(move |conn| {
                let now = truncate_ms(clock.now());
                let changed = conn.execute(
                    "UPDATE nudges SET triggered_ms = ?2, message = ?3
                     WHERE id = ?1 AND triggered_ms IS NULL AND canceled = 0",
                    params![id, to_ms(now), text],
                )?;
                if changed == 1 {
                    Ok::<_, ReminderError>(Ok(now))
                } else {
                    Ok(Err(diagnose(conn, &user_id, &task_id, to_ms(now))?))
                }
            })
            .await?;

        match won {
            Ok(triggered_at) => {
                info!(user, task, "nudge triggered");
                self.bus.publish(DomainEvent::NudgeTriggered {
                    user: user.to_string(),
                    task: task.to_string(),
                    at: triggered_at,
                });
                Ok(TriggerOutcome::Triggered(Nudge {
                    triggered_at: Some(triggered_at),
                    message: Some(message),
                    ..nudge
                }))
            }
            Err(reason) => {
                debug!(user, task, %reason, "lost nudge trigger race");
                Ok(TriggerOutcome::NotEligible(reason))
            }
        }
    }

    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn get(&self, user: &str, task: &str) -> Result<Option<Nudge>, ReminderError> {
        let user = user.to_string();
        let task = task.to_string();
        self.db
            .call(move |conn| Ok(find_nudge(conn, &user, &task)?))
            .await
    }

    /// All nudges for `user`, soonest delivery first.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn list_for_user(&self, user: &str) -> Result<Vec<Nudge>, ReminderError> {
        self.query(
            format!("SELECT {NUDGE_COLUMNS} FROM nudges WHERE user_id = ?1 ORDER BY delivery_ms, id"),
            vec![user.to_string().into()],
        )
        .await
    }

    /// Triggered nudges for `user` with delivery time strictly after `after`,
    /// in delivery order.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn triggered_since(
        &self,
        user: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Nudge>, ReminderError> {
        self.query(
            format!(
                "SELECT {NUDGE_COLUMNS} FROM nudges
                 WHERE user_id = ?1 AND triggered_ms IS NOT NULL AND delivery_ms > ?2
                 ORDER BY delivery_ms, id LIMIT ?3"
            ),
            vec![user.to_string().into(), to_ms(after).into(), sql_limit(limit).into()],
        )
        .await
    }

    /// Pending nudges for `user` due at or before `now`, in delivery order.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn due_pending(
        &self,
        user: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Nudge>, ReminderError> {
        self.query(
            format!(
                "SELECT {NUDGE_COLUMNS} FROM nudges
                 WHERE user_id = ?1 AND triggered_ms IS NULL AND canceled = 0 AND delivery_ms <= ?2
                 ORDER BY delivery_ms, id LIMIT ?3"
            ),
            vec![user.to_string().into(), to_ms(now).into(), sql_limit(limit).into()],
        )
        .await
    }

    /// Due pending nudges across all users.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn due_pending_all(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Nudge>, ReminderError> {
        self.query(
            format!(
                "SELECT {NUDGE_COLUMNS} FROM nudges
                 WHERE triggered_ms IS NULL AND canceled = 0 AND delivery_ms <= ?1
                 ORDER BY delivery_ms, id LIMIT ?2"
            ),
            vec![to_ms(now).into(), sql_limit(limit).into()],
        )
        .await
    }

    async fn query(
        &self,
        sql: String,
        args: Vec<rusqlite::types::Value>,
    ) -> Result<Vec<Nudge>, ReminderError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(args), row_to_nudge)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }
}
