//! Bets placed on starting a task before a deadline.
//!
//! Every terminal transition is a single conditional `UPDATE ... WHERE
//! success IS NULL`, committed in the same transaction as the ledger
//! mutation it pays for. A writer that loses the race sees zero changed rows
//! and reports [`ResolveOutcome::AlreadyResolved`] instead of touching the
//! ledger.

pub mod reward;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DatabaseError;
use crate::events::{DomainEvent, EventBus};
use crate::ledger::{self, LedgerError};
use crate::storage::{from_ms, sql_limit, to_ms, truncate_ms, Database};

/// A wager on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub user: String,
    pub task: String,
    pub wager: i64,
    pub deadline: DateTime<Utc>,
    pub task_due: Option<DateTime<Utc>>,
    /// `None` while open; set together with `resolved_at`.
    pub success: Option<bool>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Points credited on a win.
    pub reward: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Bet {
    pub fn is_resolved(&self) -> bool {
        self.success.is_some()
    }
}

/// Result of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// This call won the bet and credited the reward.
    Won { bet: Bet, reward: i64 },
    /// This call expired the bet and reset the streak.
    Expired { bet: Bet },
    /// Someone else already resolved it; nothing changed.
    AlreadyResolved(Bet),
}

impl ResolveOutcome {
    pub fn bet(&self) -> &Bet {
        match self {
            Self::Won { bet, .. } | Self::Expired { bet } | Self::AlreadyResolved(bet) => bet,
        }
    }

    /// True if this call performed the transition.
    pub fn applied(&self) -> bool {
        !matches!(self, Self::AlreadyResolved(_))
    }
}

#[derive(Error, Debug)]
pub enum WagerError {
    #[error("wager must be positive, got {0}")]
    InvalidWager(i64),

    #[error("deadline {deadline} is not in the future")]
    DeadlineInPast { deadline: DateTime<Utc> },

    #[error("deadline {deadline} must be before the task due time {due}")]
    DeadlineAfterDue {
        deadline: DateTime<Utc>,
        due: DateTime<Utc>,
    },

    #[error("insufficient points: need {needed}, have {available}")]
    InsufficientPoints { needed: i64, available: i64 },

    #[error("a bet already exists for task {task}")]
    Duplicate { task: String },

    #[error("no bet for task {task}")]
    NotFound { task: String },

    #[error("task {task} started at {completion}, after the deadline {deadline}")]
    MissedDeadline {
        task: String,
        completion: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },

    #[error("bet for task {task} has not expired yet (deadline {deadline})")]
    NotExpired {
        task: String,
        deadline: DateTime<Utc>,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for WagerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.into())
    }
}

impl From<LedgerError> for WagerError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientPoints { needed, available } => {
                Self::InsufficientPoints { needed, available }
            }
            LedgerError::NonPositiveAmount(amount) => Self::InvalidWager(amount),
            LedgerError::Database(e) => Self::Database(e),
        }
    }
}

const BET_COLUMNS: &str = "id, user_id, task_id, wager, deadline_ms, task_due_ms, success, \
                           resolved_ms, reward, created_ms";

fn row_to_bet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bet> {
    Ok(Bet {
        id: row.get(0)?,
        user: row.get(1)?,
        task: row.get(2)?,
        wager: row.get(3)?,
        deadline: from_ms(row.get(4)?),
        task_due: row.get::<_, Option<i64>>(5)?.map(from_ms),
        success: row.get(6)?,
        resolved_at: row.get::<_, Option<i64>>(7)?.map(from_ms),
        reward: row.get(8)?,
        created_at: from_ms(row.get(9)?),
    })
}

fn find_bet(conn: &Connection, user: &str, task: &str) -> rusqlite::Result<Option<Bet>> {
    conn.query_row(
        &format!("SELECT {BET_COLUMNS} FROM bets WHERE user_id = ?1 AND task_id = ?2"),
        params![user, task],
        row_to_bet,
    )
    .optional()
}

fn require_bet(conn: &Connection, user: &str, task: &str) -> Result<Bet, WagerError> {
    find_bet(conn, user, task)?.ok_or_else(|| WagerError::NotFound {
        task: task.to_string(),
    })
}

/// Bet records and their transitions.
#[derive(Debug, Clone)]
pub struct WagerStore {
    db: Database,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    starting_points: i64,
}

impl WagerStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>, bus: EventBus, starting_points: i64) -> Self {
        Self {
            db,
            clock,
            bus,
            starting_points,
        }
    }

    /// Debit `wager` points and open a bet on `task`.
    ///
    /// Validation failures mutate nothing.
    ///
    /// # Errors
    /// Returns an error for a non-positive wager, a deadline that is not in
    /// the future or not before `task_due`, an existing bet on the task, or
    /// an insufficient balance.
    pub async fn place(
        &self,
        user: &str,
        task: &str,
        wager: i64,
        deadline: DateTime<Utc>,
        task_due: Option<DateTime<Utc>>,
    ) -> Result<Bet, WagerError> {
        if wager <= 0 {
            return Err(WagerError::InvalidWager(wager));
        }
        let deadline = truncate_ms(deadline);
        let task_due = task_due.map(truncate_ms);
        if deadline <= self.clock.now() {
            return Err(WagerError::DeadlineInPast { deadline });
        }
        if let Some(due) = task_due {
            if deadline >= due {
                return Err(WagerError::DeadlineAfterDue { deadline, due });
            }
        }

        let bet = Bet {
            id: Uuid::new_v4().to_string(),
            user: user.to_string(),
            task: task.to_string(),
            wager,
            deadline,
            task_due,
            success: None,
            resolved_at: None,
            reward: None,
            created_at: truncate_ms(self.clock.now()),
        };
        let starting = self.starting_points;
        let record = bet.clone();
        let bet = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if find_bet(&tx, &record.user, &record.task)?.is_some() {
                    return Err(WagerError::Duplicate { task: record.task });
                }
                let now_ms = to_ms(record.created_at);
                ledger::debit(&tx, &record.user, record.wager, starting, now_ms)?;

                let inserted = tx.execute(
                    &format!("INSERT INTO bets ({BET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, ?7)"),
                    params![
                        record.id,
                        record.user,
                        record.task,
                        record.wager,
                        to_ms(record.deadline),
                        record.task_due.map(to_ms),
                        now_ms,
                    ],
                );
                if let Err(e) = inserted {
                    // Refund before surfacing the insert failure.
                    ledger::credit(&tx, &record.user, record.wager, starting, now_ms)?;
                    tx.commit()?;
                    return Err(match DatabaseError::from(e) {
                        DatabaseError::Constraint(_) => WagerError::Duplicate { task: record.task },
                        other => other.into(),
                    });
                }
                tx.commit()?;
                Ok(record)
            })
            .await?;

        info!(user = %bet.user, task = %bet.task, wager = bet.wager, "bet placed");
        self.bus.publish(DomainEvent::BetPlaced {
            user: bet.user.clone(),
            task: bet.task.clone(),
            wager: bet.wager,
        });
        Ok(bet)
    }

    /// Delete the bet on `task`, refunding the wager if it was still open.
    ///
    /// Returns the removed bet and whether a refund was issued.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no bet on the task.
    pub async fn cancel(&self, user: &str, task: &str) -> Result<(Bet, bool), WagerError> {
        let user = user.to_string();
        let task = task.to_string();
        let starting = self.starting_points;
        let clock = Arc::clone(&self.clock);
        let (bet, refunded) = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let bet = require_bet(&tx, &user, &task)?;
                tx.execute("DELETE FROM bets WHERE id = ?1", [&bet.id])?;
                let refunded = !bet.is_resolved();
                if refunded {
                    ledger::credit(&tx, &user, bet.wager, starting, to_ms(clock.now()))?;
                }
                tx.commit()?;
                Ok::<_, WagerError>((bet, refunded))
            })
            .await?;

        info!(user = %bet.user, task = %bet.task, refunded, "bet canceled");
        self.bus.publish(DomainEvent::BetCanceled {
            user: bet.user.clone(),
            task: bet.task.clone(),
            refunded,
        });
        Ok((bet, refunded))
    }

    /// Win the bet on `task` if the task started by its deadline.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no bet, or `MissedDeadline` if
    /// `completion` is after the deadline.
    pub async fn resolve(
        &self,
        user: &str,
        task: &str,
        completion: DateTime<Utc>,
    ) -> Result<ResolveOutcome, WagerError> {
        let user = user.to_string();
        let task = task.to_string();
        let starting = self.starting_points;
        let clock = Arc::clone(&self.clock);
        let outcome = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let bet = require_bet(&tx, &user, &task)?;
                if bet.is_resolved() {
                    return Ok(ResolveOutcome::AlreadyResolved(bet));
                }
                if completion > bet.deadline {
                    return Err(WagerError::MissedDeadline {
                        task,
                        completion,
                        deadline: bet.deadline,
                    });
                }

                let streak = ledger::current_streak(&tx, &user)?;
                let payout = reward::reward(bet.wager, streak, bet.deadline, bet.task_due);
                let now = truncate_ms(clock.now());
                let changed = tx.execute(
                    "UPDATE bets SET success = 1, resolved_ms = ?2, reward = ?3
                     WHERE id = ?1 AND success IS NULL",
                    params![bet.id, to_ms(now), payout],
                )?;
                if changed != 1 {
                    let current = require_bet(&tx, &user, &task)?;
                    return Ok(ResolveOutcome::AlreadyResolved(current));
                }
                ledger::record_win(&tx, &user, payout, starting, to_ms(now))?;
                tx.commit()?;

                Ok(ResolveOutcome::Won {
                    bet: Bet {
                        success: Some(true),
                        resolved_at: Some(now),
                        reward: Some(payout),
                        ..bet
                    },
                    reward: payout,
                })
            })
            .await?;

        self.announce(&outcome);
        Ok(outcome)
    }

    /// Lose the bet on `task` once its deadline has passed.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no bet, or `NotExpired` if the
    /// deadline is still ahead.
    pub async fn resolve_expired(
        &self,
        user: &str,
        task: &str,
    ) -> Result<ResolveOutcome, WagerError> {
        let user = user.to_string();
        let task = task.to_string();
        let starting = self.starting_points;
        let clock = Arc::clone(&self.clock);
        let outcome = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let bet = require_bet(&tx, &user, &task)?;
                if bet.is_resolved() {
                    return Ok(ResolveOutcome::AlreadyResolved(bet));
                }
                let now = truncate_ms(clock.now());
                if bet.deadline > now {
                    return Err(WagerError::NotExpired {
                        task,
                        deadline: bet.deadline,
                    });
                }

                let changed = tx.execute(
                    "UPDATE bets SET success = 0, resolved_ms = ?2
                     WHERE id = ?1 AND success IS NULL AND deadline_ms <= ?2",
                    params![bet.id, to_ms(now)],
                )?;
                if changed != 1 {
                    let current = require_bet(&tx, &user, &task)?;
                    return Ok(ResolveOutcome::AlreadyResolved(current));
                }
                ledger::record_loss(&tx, &user, starting, to_ms(now))?;
                tx.commit()?;

                Ok(ResolveOutcome::Expired {
                    bet: Bet {
                        success: Some(false),
                        resolved_at: Some(now),
                        ..bet
                    },
                })
            })
            .await?;

        self.announce(&outcome);
        Ok(outcome)
    }

    fn announce(&self, outcome: &ResolveOutcome) {
        match outcome {
            ResolveOutcome::Won { bet, reward } => {
                info!(user = %bet.user, task = %bet.task, reward, "bet won");
            }
            ResolveOutcome::Expired { bet } => {
                info!(user = %bet.user, task = %bet.task, "bet expired");
            }
            ResolveOutcome::AlreadyResolved(bet) => {
                debug!(user = %bet.user, task = %bet.task, "bet already resolved");
                return;
            }
        }
        let bet = outcome.bet();
        self.bus.publish(DomainEvent::BetResolved {
            user: bet.user.clone(),
            task: bet.task.clone(),
            success: bet.success.unwrap_or(false),
            at: bet.resolved_at.unwrap_or(bet.created_at),
        });
    }

    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn get(&self, user: &str, task: &str) -> Result<Option<Bet>, WagerError> {
        let user = user.to_string();
        let task = task.to_string();
        self.db
            .call(move |conn| Ok(find_bet(conn, &user, &task)?))
            .await
    }

    /// All bets for `user`, newest first.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn list_for_user(&self, user: &str) -> Result<Vec<Bet>, WagerError> {
        let user = user.to_string();
        self.query(
            format!("SELECT {BET_COLUMNS} FROM bets WHERE user_id = ?1 ORDER BY created_ms DESC, id"),
            vec![user.into()],
        )
        .await
    }

    /// Bets for `user` resolved strictly after `after`, oldest resolution first.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn resolved_since(
        &self,
        user: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bet>, WagerError> {
        self.query(
            format!(
                "SELECT {BET_COLUMNS} FROM bets
                 WHERE user_id = ?1 AND resolved_ms IS NOT NULL AND resolved_ms > ?2
                 ORDER BY resolved_ms, id LIMIT ?3"
            ),
            vec![user.to_string().into(), to_ms(after).into(), sql_limit(limit).into()],
        )
        .await
    }

    /// Open bets for `user` whose deadline is at or before `now`, earliest
    /// deadline first.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn expired_unresolved(
        &self,
        user: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bet>, WagerError> {
        self.query(
            format!(
                "SELECT {BET_COLUMNS} FROM bets
                 WHERE user_id = ?1 AND success IS NULL AND deadline_ms <= ?2
                 ORDER BY deadline_ms, id LIMIT ?3"
            ),
            vec![user.to_string().into(), to_ms(now).into(), sql_limit(limit).into()],
        )
        .await
    }

    /// Expired open bets across all users.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn expired_unresolved_all(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bet>, WagerError> {
        self.query(
            format!(
                "SELECT {BET_COLUMNS} FROM bets
                 WHERE success IS NULL AND deadline_ms <= ?1
                 ORDER BY deadline_ms, id LIMIT ?2"
            ),
            vec![to_ms(now).into(), sql_limit(limit).into()],
        )
        .await
    }

    async fn query(
        &self,
        sql: String,
        args: Vec<rusqlite::types::Value>,
    ) -> Result<Vec<Bet>, WagerError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(args), row_to_bet)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::Ledger;
    use chrono::Duration;

    struct Fixture {
        clock: ManualClock,
        store: WagerStore,
        ledger: Ledger,
        bus: EventBus,
    }

    fn fixture() -> Fixture {
        let db = Database::open_memory().unwrap();
        let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let bus = EventBus::new(64);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        Fixture {
            store: WagerStore::new(db.clone(), Arc::clone(&shared), bus.clone(), 100),
            ledger: Ledger::new(db, shared, 100),
            clock,
            bus,
        }
    }

    #[tokio::test]
    async fn place_debits_and_records() {
        let f = fixture();
        let deadline = f.clock.now() + Duration::hours(1);
        let bet = f.store.place("u", "t", 20, deadline, None).await.unwrap();
        assert_eq!(bet.wager, 20);
        assert!(!bet.is_resolved());
        assert_eq!(f.ledger.balance("u").await.unwrap().points, 80);
        assert_eq!(f.store.get("u", "t").await.unwrap(), Some(bet));
    }

    #[tokio::test]
    async fn place_rejects_invalid_input_without_mutation() {
        let f = fixture();
        let now = f.clock.now();

        assert!(matches!(
            f.store.place("u", "t", 0, now + Duration::hours(1), None).await,
            Err(WagerError::InvalidWager(0))
        ));
        assert!(matches!(
            f.store.place("u", "t", 10, now - Duration::minutes(1), None).await,
            Err(WagerError::DeadlineInPast { .. })
        ));
        assert!(matches!(
            f.store
                .place("u", "t", 10, now + Duration::hours(2), Some(now + Duration::hours(1)))
                .await,
            Err(WagerError::DeadlineAfterDue { .. })
        ));
        assert!(matches!(
            f.store.place("u", "t", 500, now + Duration::hours(1), None).await,
            Err(WagerError::InsufficientPoints {
                needed: 500,
                available: 100
            })
        ));

        assert_eq!(f.ledger.balance("u").await.unwrap().points, 100);
        assert!(f.store.get("u", "t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn place_twice_is_duplicate_and_debits_once() {
        let f = fixture();
        let deadline = f.clock.now() + Duration::hours(1);
        f.store.place("u", "t", 10, deadline, None).await.unwrap();
        assert!(matches!(
            f.store.place("u", "t", 10, deadline, None).await,
            Err(WagerError::Duplicate { .. })
        ));
        assert_eq!(f.ledger.balance("u").await.unwrap().points, 90);
    }

    #[tokio::test]
    async fn cancel_refunds_open_bet_only() {
        let f = fixture();
        let deadline = f.clock.now() + Duration::hours(1);
        f.store.place("u", "open", 10, deadline, None).await.unwrap();
        f.store.place("u", "lost", 10, deadline, None).await.unwrap();

        let (_, refunded) = f.store.cancel("u", "open").await.unwrap();
        assert!(refunded);
        assert_eq!(f.ledger.balance("u").await.unwrap().points, 90);

        f.clock.advance(Duration::hours(2));
        f.store.resolve_expired("u", "lost").await.unwrap();
        let (_, refunded) = f.store.cancel("u", "lost").await.unwrap();
        assert!(!refunded);
        assert_eq!(f.ledger.balance("u").await.unwrap().points, 90);

        assert!(matches!(
            f.store.cancel("u", "lost").await,
            Err(WagerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_credits_reward_and_extends_streak() {
        let f = fixture();
        let deadline = f.clock.now() + Duration::hours(1);
        f.store.place("u", "t", 20, deadline, None).await.unwrap();

        f.clock.advance(Duration::minutes(10));
        let outcome = f.store.resolve("u", "t", f.clock.now()).await.unwrap();
        let ResolveOutcome::Won { bet, reward } = outcome else {
            panic!("expected a win, got {outcome:?}");
        };
        assert_eq!(reward, 22);
        assert_eq!(bet.success, Some(true));
        assert_eq!(bet.resolved_at, Some(f.clock.now()));

        let entry = f.ledger.balance("u").await.unwrap();
        assert_eq!(entry.points, 102);
        assert_eq!(entry.streak, 1);
    }

    #[tokio::test]
    async fn resolve_twice_is_a_no_op() {
        let f = fixture();
        let deadline = f.clock.now() + Duration::hours(1);
        f.store.place("u", "t", 20, deadline, None).await.unwrap();
        let first = f.store.resolve("u", "t", f.clock.now()).await.unwrap();
        assert!(first.applied());

        f.clock.advance(Duration::minutes(5));
        let second = f.store.resolve("u", "t", f.clock.now()).await.unwrap();
        assert!(!second.applied());
        assert_eq!(second.bet().resolved_at, first.bet().resolved_at);

        let entry = f.ledger.balance("u").await.unwrap();
        assert_eq!((entry.points, entry.streak), (102, 1));
    }

    #[tokio::test]
    async fn resolve_after_deadline_is_rejected() {
        let f = fixture();
        let deadline = f.clock.now() + Duration::hours(1);
        f.store.place("u", "t", 20, deadline, None).await.unwrap();
        let late = deadline + Duration::seconds(1);
        assert!(matches!(
            f.store.resolve("u", "t", late).await,
            Err(WagerError::MissedDeadline { .. })
        ));
        assert!(!f.store.get("u", "t").await.unwrap().unwrap().is_resolved());
    }

    #[tokio::test]
    async fn resolve_expired_resets_streak() {
        let f = fixture();
        let now = f.clock.now();
        f.store.place("u", "a", 10, now + Duration::minutes(5), None).await.unwrap();
        f.store.place("u", "b", 10, now + Duration::minutes(10), None).await.unwrap();
        f.store.resolve("u", "a", now).await.unwrap();
        assert_eq!(f.ledger.balance("u").await.unwrap().streak, 1);

        assert!(matches!(
            f.store.resolve_expired("u", "b").await,
            Err(WagerError::NotExpired { .. })
        ));

        f.clock.advance(Duration::minutes(10));
        let outcome = f.store.resolve_expired("u", "b").await.unwrap();
        assert!(matches!(outcome, ResolveOutcome::Expired { .. }));
        assert_eq!(f.ledger.balance("u").await.unwrap().streak, 0);

        let again = f.store.resolve_expired("u", "b").await.unwrap();
        assert!(matches!(again, ResolveOutcome::AlreadyResolved(_)));
    }

    #[tokio::test]
    async fn scans_are_ordered_and_bounded() {
        let f = fixture();
        let start = f.clock.now();
        for (task, mins) in [("late", 30), ("early", 10), ("mid", 20)] {
            f.store
                .place("u", task, 1, start + Duration::minutes(mins), None)
                .await
                .unwrap();
        }
        f.store
            .place("other", "x", 1, start + Duration::minutes(5), None)
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(25));
        let expired = f.store.expired_unresolved("u", f.clock.now(), 10).await.unwrap();
        let tasks: Vec<_> = expired.iter().map(|b| b.task.as_str()).collect();
        assert_eq!(tasks, ["early", "mid"]);

        let all = f.store.expired_unresolved_all(f.clock.now(), 2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user, "other");

        for bet in &expired {
            f.store.resolve_expired("u", &bet.task).await.unwrap();
            f.clock.advance(Duration::seconds(1));
        }
        let resolved = f.store.resolved_since("u", start, 10).await.unwrap();
        let tasks: Vec<_> = resolved.iter().map(|b| b.task.as_str()).collect();
        assert_eq!(tasks, ["early", "mid"]);

        let after_first = resolved[0].resolved_at.unwrap();
        let rest = f.store.resolved_since("u", after_first, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let deadline = f.clock.now() + Duration::hours(1);
        f.store.place("u", "t", 5, deadline, None).await.unwrap();
        f.store.resolve("u", "t", f.clock.now()).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap().event, DomainEvent::BetPlaced { .. }));
        assert!(matches!(
            rx.recv().await.unwrap().event,
            DomainEvent::BetResolved { success: true, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_resolutions_pay_once() {
        let f = fixture();
        let deadline = f.clock.now() + Duration::hours(1);
        f.store.place("u", "t", 20, deadline, None).await.unwrap();

        let now = f.clock.now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = f.store.clone();
                tokio::spawn(async move { store.resolve("u", "t", now).await })
            })
            .collect();
        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(f.ledger.balance("u").await.unwrap().points, 102);
    }
}
