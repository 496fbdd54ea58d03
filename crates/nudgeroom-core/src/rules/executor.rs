//! Action execution.
//!
//! Runs the actions the engine produced for one task event against the
//! wager and reminder stores. Anything that loses a race or finds nothing to
//! act on is `Skipped`; only genuine errors are `Failed`.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    action::Action,
    log::{ActionLog, ActionResult, ExecutionStatus},
};
use crate::clock::Clock;
use crate::collab::{CollabError, TaskManager};
use crate::events::DomainEvent;
use crate::reminder::{ReminderError, ReminderStore};
use crate::services::Services;
use crate::wager::{WagerError, WagerStore};

/// The task an event is about.
struct Target<'a> {
    user: &'a str,
    task: &'a str,
    at: DateTime<Utc>,
    /// Set when the event itself carries the due time.
    due: Option<Option<DateTime<Utc>>>,
}

impl<'a> Target<'a> {
    fn of(event: &'a DomainEvent) -> Option<Self> {
        match event {
            DomainEvent::TaskCreated {
                user,
                task,
                due,
                at,
            } => Some(Self {
                user,
                task,
                at: *at,
                due: Some(*due),
            }),
            DomainEvent::TaskStarted { user, task, at }
            | DomainEvent::TaskCompleted { user, task, at }
            | DomainEvent::TaskDeleted { user, task, at } => Some(Self {
                user,
                task,
                at: *at,
                due: None,
            }),
            _ => None,
        }
    }
}

/// Executes actions and logs results
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    reminders: ReminderStore,
    wagers: WagerStore,
    tasks: Arc<dyn TaskManager>,
    clock: Arc<dyn Clock>,
    /// Whether to actually execute actions (false for dry-run)
    dry_run: bool,
}

impl ActionExecutor {
    pub fn new(
        reminders: ReminderStore,
        wagers: WagerStore,
        tasks: Arc<dyn TaskManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reminders,
            wagers,
            tasks,
            clock,
            dry_run: false,
        }
    }

    pub fn from_services(services: &Services) -> Self {
        Self::new(
            services.reminders.clone(),
            services.wagers.clone(),
            Arc::new(services.tasks.clone()),
            Arc::clone(&services.clock),
        )
    }

    /// Report every action as skipped without touching the stores.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Execute a batch of actions for `event` and return the log
    pub async fn execute_batch(
        &self,
        event: &DomainEvent,
        actions: Vec<(String, Action)>,
    ) -> ActionLog {
        let target = Target::of(event);
        let mut results = Vec::with_capacity(actions.len());

        for (rule_name, action) in actions {
            let status = match &target {
                _ if self.dry_run => skipped("dry-run mode"),
                Some(target) => self.execute_action(target, &action).await,
                None => skipped("not a task event"),
            };
            if let ExecutionStatus::Failed { reason, .. } = &status {
                warn!(rule = %rule_name, action = action.type_name(), %reason, "rule action failed");
            } else {
                debug!(rule = %rule_name, action = action.type_name(), ?status, "rule action");
            }
            results.push(ActionResult {
                rule_name,
                action_type: action.type_name().to_string(),
                status,
            });
        }

        ActionLog::new(self.clock.now(), results)
    }

    async fn execute_action(&self, target: &Target<'_>, action: &Action) -> ExecutionStatus {
        let (user, task) = (target.user, target.task);
        match action {
            Action::ScheduleNudge {
                lead_mins,
                fallback_delay_mins,
            } => {
                let due = match target.due {
                    Some(due) => due,
                    None => match self.tasks.get_task(user, task).await {
                        Ok(info) => info.due,
                        Err(CollabError::TaskNotFound(_)) => return skipped("task no longer exists"),
                        Err(e) => return failed(e, true),
                    },
                };
                let now = self.clock.now();
                let delivery = due
                    .map(|due| due - Duration::minutes(i64::from(*lead_mins)))
                    .filter(|at| *at > now)
                    .unwrap_or_else(|| {
                        now + Duration::minutes(i64::from((*fallback_delay_mins).max(1)))
                    });
                match self.reminders.schedule(user, task, delivery).await {
                    Ok(_) => ExecutionStatus::Success,
                    Err(ReminderError::Duplicate { .. }) => skipped("task already has a nudge"),
                    Err(e @ ReminderError::Database(_)) => failed(e, true),
                    Err(e) => failed(e, false),
                }
            }
            Action::CancelNudge => match self.reminders.cancel(user, task).await {
                Ok(_) => ExecutionStatus::Success,
                Err(ReminderError::NotFound { .. }) => skipped("no nudge for task"),
                Err(ReminderError::AlreadyTerminal { .. }) => {
                    skipped("nudge already delivered or canceled")
                }
                Err(e) => failed(e, true),
            },
            Action::ResolveBet => match self.wagers.resolve(user, task, target.at).await {
                Ok(outcome) if outcome.applied() => ExecutionStatus::Success,
                Ok(_) => skipped("bet already resolved"),
                Err(WagerError::NotFound { .. }) => skipped("no bet for task"),
                Err(e @ WagerError::MissedDeadline { .. }) => skipped(e.to_string()),
                Err(e) => failed(e, true),
            },
            Action::CancelBet => match self.wagers.cancel(user, task).await {
                Ok(_) => ExecutionStatus::Success,
                Err(WagerError::NotFound { .. }) => skipped("no bet for task"),
                Err(e) => failed(e, true),
            },
        }
    }
}

fn skipped(reason: impl Into<String>) -> ExecutionStatus {
    ExecutionStatus::Skipped {
        reason: reason.into(),
    }
}

fn failed(err: impl std::fmt::Display, retriable: bool) -> ExecutionStatus {
    ExecutionStatus::Failed {
        reason: err.to_string(),
        retriable,
    }
}
