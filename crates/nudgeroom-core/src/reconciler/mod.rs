//! Per-connection event reconciliation.
//!
//! An [`EventReconciler`] walks `Connecting -> Backfilling -> Polling ->
//! Closed`. It compares store state against the user's checkpoint, fires due
//! transitions (nudge generation, bet expiry) and streams results as
//! [`Frame`]s. Correctness under concurrent connections comes from the
//! stores' conditional writes; the reconciler never locks anything itself.
//!
//! Each connection keeps its own in-memory cursor seeded from the durable
//! checkpoint. Re-delivery scans compare against that cursor, so every open
//! device of a user sees every event, while the durable checkpoint is
//! max-merged and only used to resume after a reconnect.

mod frame;
mod sink;
mod supervisor;

pub use frame::Frame;
pub use sink::{ChannelSink, FrameSink, SinkError};
pub use supervisor::{CloseHandle, CloseReason, ConnectionSupervisor};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::clock::Clock;
use crate::collab::{Auth, CollabError, EmotionLogger, TaskManager};
use crate::error::DatabaseError;
use crate::reminder::{Ineligible, ReminderError, ReminderStore, TriggerOutcome};
use crate::services::nudge_context;
use crate::storage::ReconcilerConfig;
use crate::wager::{ResolveOutcome, WagerError, WagerStore};

/// Everything a reconciler talks to.
#[derive(Debug, Clone)]
pub struct ReconcilerDeps {
    pub reminders: ReminderStore,
    pub wagers: WagerStore,
    pub checkpoints: CheckpointStore,
    pub auth: Arc<dyn Auth>,
    pub tasks: Arc<dyn TaskManager>,
    pub emotions: Arc<dyn EmotionLogger>,
    pub clock: Arc<dyn Clock>,
    pub config: ReconcilerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Connecting,
    Backfilling,
    Polling,
    Closed,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid or revoked session token")]
    Unauthorized,

    #[error("user {user} has no active session")]
    LoggedOut { user: String },

    #[error(transparent)]
    Transport(#[from] SinkError),

    #[error("connection is closed")]
    Closed,

    #[error("storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("reminder error: {0}")]
    Reminder(#[from] ReminderError),

    #[error("wager error: {0}")]
    Wager(#[from] WagerError),

    #[error("lookup failed: {0}")]
    Collab(#[from] CollabError),
}

impl ReconcileError {
    /// Fatal errors end the connection; the rest are reported to the client
    /// as an `error` frame and the current step is abandoned.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::LoggedOut { .. } | Self::Transport(_) | Self::Closed
        )
    }
}

/// Per-connection view of what has been delivered.
#[derive(Debug)]
struct Live {
    user: String,
    /// Re-delivery scan positions.
    nudge_cursor: DateTime<Utc>,
    bet_cursor: DateTime<Utc>,
    /// Delivered by this connection ahead of the scan cursor, keyed by id.
    sent_nudges: HashMap<String, DateTime<Utc>>,
    sent_bets: HashMap<String, DateTime<Utc>>,
    /// Last value written to the durable checkpoint.
    durable: Checkpoint,
}

impl Live {
    fn new(checkpoint: Checkpoint) -> Self {
        Self {
            user: checkpoint.user.clone(),
            nudge_cursor: checkpoint.last_nudge,
            bet_cursor: checkpoint.last_bet,
            sent_nudges: HashMap::new(),
            sent_bets: HashMap::new(),
            durable: checkpoint,
        }
    }
}

pub struct EventReconciler<S> {
    deps: ReconcilerDeps,
    sink: S,
    token: String,
    state: ReconcilerState,
    live: Option<Live>,
}

impl<S> std::fmt::Debug for EventReconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReconciler")
            .field("state", &self.state)
            .field("user", &self.live.as_ref().map(|l| l.user.as_str()))
            .finish_non_exhaustive()
    }
}

impl<S: FrameSink> EventReconciler<S> {
    pub fn new(deps: ReconcilerDeps, sink: S, token: impl Into<String>) -> Self {
        Self {
            deps,
            sink,
            token: token.into(),
            state: ReconcilerState::Connecting,
            live: None,
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    /// The authenticated user, once connected.
    pub fn user(&self) -> Option<&str> {
        self.live.as_ref().map(|l| l.user.as_str())
    }

    /// The durable checkpoint as last written by this connection.
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.live.as_ref().map(|l| &l.durable)
    }

    /// Authenticate, load the checkpoint and announce the connection.
    ///
    /// # Errors
    /// `Unauthorized` for a bad token, `Transport` if the first frame cannot
    /// be sent, or a storage error while loading the checkpoint.
    pub async fn connect(&mut self) -> Result<String, ReconcileError> {
        match self.state {
            ReconcilerState::Connecting => {}
            ReconcilerState::Closed => return Err(ReconcileError::Closed),
            _ => return self.user().map(str::to_string).ok_or(ReconcileError::Closed),
        }
        let user = match self.deps.auth.current_user(&self.token).await {
            Ok(user) => user,
            Err(CollabError::InvalidToken) => return Err(ReconcileError::Unauthorized),
            Err(e) => return Err(e.into()),
        };
        let checkpoint = self.deps.checkpoints.load(&user).await?;
        self.live = Some(Live::new(checkpoint));
        self.sink.send(Frame::Connected).await?;
        self.state = ReconcilerState::Backfilling;
        info!(user = %user, "connected");
        Ok(user)
    }

    /// One-time catch-up: re-deliver what was missed, then fire what is due.
    ///
    /// # Errors
    /// Only fatal errors are returned; see [`ReconcileError::is_fatal`].
    pub async fn backfill(&mut self) -> Result<(), ReconcileError> {
        match self.state {
            ReconcilerState::Backfilling => {}
            ReconcilerState::Polling => return Ok(()),
            _ => return Err(ReconcileError::Closed),
        }
        let limit = self.deps.config.backlog_limit;
        let result = self.redeliver_nudges(limit).await;
        self.settle(result).await?;
        let result = self.redeliver_bets(limit).await;
        self.settle(result).await?;
        self.fire_due(limit).await?;
        self.state = ReconcilerState::Polling;
        Ok(())
    }

    /// One polling cycle: re-validate the session, re-check deliveries, then
    /// fire what is due.
    ///
    /// # Errors
    /// Only fatal errors are returned.
    pub async fn poll(&mut self) -> Result<(), ReconcileError> {
        if self.state == ReconcilerState::Backfilling {
            return self.backfill().await;
        }
        self.ensure_polling()?;
        if let Err(e) = self.verify_session().await {
            // A failed lookup skips the cycle; a failed check ends the connection.
            return self.settle(Err(e)).await;
        }
        self.recheck().await?;
        self.fire_due(self.deps.config.backlog_limit).await
    }

    /// Bounded re-delivery of triggered nudges and resolved bets.
    ///
    /// # Errors
    /// Only fatal errors are returned.
    pub async fn recheck(&mut self) -> Result<(), ReconcileError> {
        self.ensure_polling()?;
        let limit = self.deps.config.recheck_limit;
        let result = self.redeliver_nudges(limit).await;
        self.settle(result).await?;
        let result = self.redeliver_bets(limit).await;
        self.settle(result).await
    }

    /// Re-validate the token and the user's session outside the poll cadence.
    ///
    /// # Errors
    /// `Unauthorized` or `LoggedOut` when the session is gone.
    pub async fn check_auth(&mut self) -> Result<(), ReconcileError> {
        self.ensure_polling()?;
        let result = self.verify_session().await;
        self.settle(result).await
    }

    /// # Errors
    /// `Transport` if the frame cannot be sent.
    pub async fn heartbeat(&mut self) -> Result<(), ReconcileError> {
        if self.state == ReconcilerState::Closed {
            return Err(ReconcileError::Closed);
        }
        let timestamp = self.deps.clock.now();
        self.sink.send(Frame::Heartbeat { timestamp }).await?;
        Ok(())
    }

    /// Enter `Closed`. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ReconcilerState::Closed {
            return false;
        }
        self.state = ReconcilerState::Closed;
        true
    }

    fn ensure_polling(&self) -> Result<(), ReconcileError> {
        if self.state == ReconcilerState::Polling {
            Ok(())
        } else {
            Err(ReconcileError::Closed)
        }
    }

    fn live_user(&self) -> Result<String, ReconcileError> {
        self.user().map(str::to_string).ok_or(ReconcileError::Closed)
    }

    /// Pass fatal errors through; report the rest to the client.
    async fn settle(&mut self, result: Result<(), ReconcileError>) -> Result<(), ReconcileError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(user = ?self.user(), error = %e, "reconcile step abandoned");
                self.sink.send(Frame::error(e.to_string())).await?;
                Ok(())
            }
        }
    }

    async fn verify_session(&self) -> Result<(), ReconcileError> {
        let user = self.live_user()?;
        if !self.deps.auth.has_active_session(&user).await? {
            return Err(ReconcileError::LoggedOut { user });
        }
        match self.deps.auth.current_user(&self.token).await {
            Ok(owner) if owner == user => Ok(()),
            Ok(_) | Err(CollabError::InvalidToken) => Err(ReconcileError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }

    async fn fire_due(&mut self, limit: usize) -> Result<(), ReconcileError> {
        let result = self.trigger_due_nudges(limit).await;
        self.settle(result).await?;
        let result = self.expire_due_bets(limit).await;
        self.settle(result).await
    }

    async fn save_checkpoint(&mut self) -> Result<(), ReconcileError> {
        let live = self.live.as_ref().ok_or(ReconcileError::Closed)?;
        self.deps.checkpoints.save(&live.durable).await?;
        Ok(())
    }

    async fn redeliver_nudges(&mut self, limit: usize) -> Result<(), ReconcileError> {
        let (user, after) = {
            let live = self.live.as_ref().ok_or(ReconcileError::Closed)?;
            (live.user.clone(), live.nudge_cursor)
        };
        let nudges = self.deps.reminders.triggered_since(&user, after, limit).await?;
        for nudge in nudges {
            let live = self.live.as_mut().ok_or(ReconcileError::Closed)?;
            let already_sent = live.sent_nudges.remove(&nudge.id).is_some();
            if !already_sent {
                if let Some(frame) = Frame::nudge(&nudge) {
                    self.sink.send(frame).await?;
                }
            }
            let live = self.live.as_mut().ok_or(ReconcileError::Closed)?;
            live.nudge_cursor = live.nudge_cursor.max(nudge.delivery_time);
            let cursor = live.nudge_cursor;
            live.sent_nudges.retain(|_, at| *at > cursor);
            if nudge.delivery_time > live.durable.last_nudge {
                live.durable.last_nudge = nudge.delivery_time;
                self.save_checkpoint().await?;
            }
        }
        Ok(())
    }

    async fn redeliver_bets(&mut self, limit: usize) -> Result<(), ReconcileError> {
        let (user, after) = {
            let live = self.live.as_ref().ok_or(ReconcileError::Closed)?;
            (live.user.clone(), live.bet_cursor)
        };
        let bets = self.deps.wagers.resolved_since(&user, after, limit).await?;
        for bet in bets {
            let Some(resolved_at) = bet.resolved_at else {
                continue;
            };
            let live = self.live.as_mut().ok_or(ReconcileError::Closed)?;
            let already_sent = live.sent_bets.remove(&bet.id).is_some();
            if !already_sent {
                if let Some(frame) = Frame::bet(&bet) {
                    self.sink.send(frame).await?;
                }
            }
            let live = self.live.as_mut().ok_or(ReconcileError::Closed)?;
            live.bet_cursor = live.bet_cursor.max(resolved_at);
            let cursor = live.bet_cursor;
            live.sent_bets.retain(|_, at| *at > cursor);
            if resolved_at > live.durable.last_bet {
                live.durable.last_bet = resolved_at;
                self.save_checkpoint().await?;
            }
        }
        Ok(())
    }

    async fn trigger_due_nudges(&mut self, limit: usize) -> Result<(), ReconcileError> {
        let user = self.live_user()?;
        let now = self.deps.clock.now();
        let due = self.deps.reminders.due_pending(&user, now, limit).await?;
        // Set once an earlier due nudge was triggered but not delivered here;
        // the durable checkpoint must stay behind it until re-delivery.
        let mut held_back = false;
        for nudge in due {
            let context = nudge_context(
                self.deps.tasks.as_ref(),
                self.deps.emotions.as_ref(),
                &user,
                &nudge.task,
                self.deps.config.emotion_history,
            )
            .await?;
            let Some(context) = context else {
                match self.deps.reminders.cancel(&user, &nudge.task).await {
                    Ok(_) => info!(user = %user, task = %nudge.task, "canceled nudge for deleted task"),
                    Err(ReminderError::NotFound { .. } | ReminderError::AlreadyTerminal { .. }) => {
                        debug!(user = %user, task = %nudge.task, "orphaned nudge already settled");
                    }
                    Err(e) => return Err(e.into()),
                }
                continue;
            };

            match self.deps.reminders.trigger(&user, &nudge.task, &context).await {
                Ok(TriggerOutcome::Triggered(triggered)) => {
                    if let Some(frame) = Frame::nudge(&triggered) {
                        self.sink.send(frame).await?;
                    }
                    let live = self.live.as_mut().ok_or(ReconcileError::Closed)?;
                    if triggered.delivery_time > live.nudge_cursor {
                        live.sent_nudges
                            .insert(triggered.id.clone(), triggered.delivery_time);
                    }
                    if !held_back && triggered.delivery_time > live.durable.last_nudge {
                        live.durable.last_nudge = triggered.delivery_time;
                        self.save_checkpoint().await?;
                    }
                }
                Ok(TriggerOutcome::NotEligible(reason)) => {
                    held_back |= reason == Ineligible::AlreadyTriggered;
                    debug!(user = %user, task = %nudge.task, %reason, "nudge handled elsewhere");
                }
                Err(ReminderError::Generator(e)) => {
                    // Stays pending and blocks later nudges until the next
                    // cycle retries it.
                    self.sink
                        .send(Frame::error(format!(
                            "could not prepare reminder for task {}: {e}",
                            nudge.task
                        )))
                        .await?;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn expire_due_bets(&mut self, limit: usize) -> Result<(), ReconcileError> {
        let user = self.live_user()?;
        let now = self.deps.clock.now();
        let expired = self.deps.wagers.expired_unresolved(&user, now, limit).await?;
        let mut held_back = false;
        for bet in expired {
            match self.deps.wagers.resolve_expired(&user, &bet.task).await {
                Ok(ResolveOutcome::Expired { bet: resolved }) => {
                    if let Some(frame) = Frame::bet(&resolved) {
                        self.sink.send(frame).await?;
                    }
                    let Some(resolved_at) = resolved.resolved_at else {
                        continue;
                    };
                    let live = self.live.as_mut().ok_or(ReconcileError::Closed)?;
                    if resolved_at > live.bet_cursor {
                        live.sent_bets.insert(resolved.id.clone(), resolved_at);
                    }
                    if !held_back && resolved_at > live.durable.last_bet {
                        live.durable.last_bet = resolved_at;
                        self.save_checkpoint().await?;
                    }
                }
                Ok(ResolveOutcome::AlreadyResolved(_)) => {
                    held_back = true;
                    debug!(user = %user, task = %bet.task, "bet resolved elsewhere");
                }
                Ok(_) | Err(WagerError::NotFound { .. } | WagerError::NotExpired { .. }) => {
                    debug!(user = %user, task = %bet.task, "bet handled elsewhere");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
