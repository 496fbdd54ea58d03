//! Background sweep over all users.
//!
//! Triggers due nudges and expires overdue bets for users who have no open
//! connection. It races connections through the same conditional writes and
//! delivers nothing itself; connections pick the results up on their next
//! re-check or backfill.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::collab::{EmotionLogger, TaskManager};
use crate::reminder::{ReminderError, ReminderStore, TriggerOutcome};
use crate::services::{nudge_context, Services};
use crate::wager::{ResolveOutcome, WagerError, WagerStore};

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub triggered: usize,
    pub expired: usize,
    pub orphans_canceled: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Sweeper {
    reminders: ReminderStore,
    wagers: WagerStore,
    tasks: Arc<dyn TaskManager>,
    emotions: Arc<dyn EmotionLogger>,
    clock: Arc<dyn Clock>,
    limit: usize,
    emotion_history: usize,
}

impl Sweeper {
    pub fn new(services: &Services) -> Self {
        Self {
            reminders: services.reminders.clone(),
            wagers: services.wagers.clone(),
            tasks: Arc::new(services.tasks.clone()),
            emotions: Arc::new(services.emotions.clone()),
            clock: Arc::clone(&services.clock),
            limit: services.reconciler.backlog_limit,
            emotion_history: services.reconciler.emotion_history,
        }
    }

    /// One bounded pass. Per-record failures are counted, not returned.
    ///
    /// # Errors
    /// Returns an error only if a scan query fails.
    pub async fn sweep_once(&self) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::default();
        let now = self.clock.now();

        for nudge in self.reminders.due_pending_all(now, self.limit).await? {
            let context = match nudge_context(
                self.tasks.as_ref(),
                self.emotions.as_ref(),
                &nudge.user,
                &nudge.task,
                self.emotion_history,
            )
            .await
            {
                Ok(context) => context,
                Err(e) => {
                    warn!(user = %nudge.user, task = %nudge.task, error = %e, "sweep lookup failed");
                    report.failed += 1;
                    continue;
                }
            };
            let Some(context) = context else {
                match self.reminders.cancel(&nudge.user, &nudge.task).await {
                    Ok(_) => report.orphans_canceled += 1,
                    Err(ReminderError::NotFound { .. } | ReminderError::AlreadyTerminal { .. }) => {}
                    Err(e) => {
                        warn!(task = %nudge.task, error = %e, "orphan cancel failed");
                        report.failed += 1;
                    }
                }
                continue;
            };
            match self.reminders.trigger(&nudge.user, &nudge.task, &context).await {
                Ok(TriggerOutcome::Triggered(_)) => report.triggered += 1,
                Ok(TriggerOutcome::NotEligible(reason)) => {
                    debug!(task = %nudge.task, %reason, "sweep lost nudge race");
                }
                Err(e) => {
                    warn!(user = %nudge.user, task = %nudge.task, error = %e, "sweep trigger failed");
                    report.failed += 1;
                }
            }
        }

        for bet in self.wagers.expired_unresolved_all(now, self.limit).await? {
            match self.wagers.resolve_expired(&bet.user, &bet.task).await {
                Ok(ResolveOutcome::Expired { .. }) => report.expired += 1,
                Ok(_) | Err(WagerError::NotFound { .. } | WagerError::NotExpired { .. }) => {}
                Err(e) => {
                    warn!(user = %bet.user, task = %bet.task, error = %e, "sweep expiry failed");
                    report.failed += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(?report, "sweep pass");
        }
        Ok(report)
    }

    /// Sweep every `every` until `shutdown` resolves.
    pub async fn run(self, every: Duration, shutdown: impl Future<Output = ()>) {
        let every = every.max(Duration::from_secs(1));
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(interval_secs = every.as_secs(), "sweeper started");

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "sweep pass failed");
                    }
                }
            }
        }
        info!("sweeper stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Reminder(#[from] ReminderError),

    #[error(transparent)]
    Wager(#[from] WagerError),
}
