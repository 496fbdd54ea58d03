//! Wiring of stores and collaborators over one database and clock.

use std::sync::Arc;

use crate::checkpoint::CheckpointStore;
use crate::clock::{Clock, SystemClock};
use crate::collab::{
    CollabError, EmotionJournal, EmotionLogger, SessionRegistry, TaskBook, TaskManager,
};
use crate::error::{CoreError, DatabaseError};
use crate::events::EventBus;
use crate::generator::{self, MessageGenerator, NudgeContext};
use crate::ledger::Ledger;
use crate::reconciler::ReconcilerDeps;
use crate::reminder::ReminderStore;
use crate::storage::{Config, Database, ReconcilerConfig};
use crate::wager::WagerStore;

#[derive(Debug, Clone)]
pub struct Services {
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    pub bus: EventBus,
    pub ledger: Ledger,
    pub wagers: WagerStore,
    pub reminders: ReminderStore,
    pub checkpoints: CheckpointStore,
    pub tasks: TaskBook,
    pub emotions: EmotionJournal,
    pub sessions: SessionRegistry,
    pub reconciler: ReconcilerConfig,
}

impl Services {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        config: &Config,
        generator: Arc<dyn MessageGenerator>,
    ) -> Self {
        let bus = EventBus::new(config.bus.capacity);
        let starting = config.ledger.starting_points;
        Self {
            ledger: Ledger::new(db.clone(), Arc::clone(&clock), starting),
            wagers: WagerStore::new(db.clone(), Arc::clone(&clock), bus.clone(), starting),
            reminders: ReminderStore::new(db.clone(), Arc::clone(&clock), bus.clone(), generator),
            checkpoints: CheckpointStore::new(
                db.clone(),
                Arc::clone(&clock),
                config.reconciler.backlog_window(),
            ),
            tasks: TaskBook::new(db.clone(), Arc::clone(&clock)),
            emotions: EmotionJournal::new(db.clone(), Arc::clone(&clock)),
            sessions: SessionRegistry::new(db.clone(), Arc::clone(&clock), bus.clone()),
            reconciler: config.reconciler.clone(),
            db,
            clock,
            bus,
        }
    }

    /// Open the default database and the configured generator.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the generator
    /// cannot be built.
    pub fn open(config: &Config) -> Result<Self, CoreError> {
        let db = Database::open()?;
        let generator = generator::from_config(&config.generator)?;
        Ok(Self::new(db, Arc::new(SystemClock), config, generator))
    }

    /// Services over a fresh in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn in_memory(
        clock: Arc<dyn Clock>,
        config: &Config,
        generator: Arc<dyn MessageGenerator>,
    ) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_memory()?, clock, config, generator))
    }

    /// What a per-connection reconciler needs, with collaborators behind
    /// their contracts.
    pub fn reconciler_deps(&self) -> ReconcilerDeps {
        ReconcilerDeps {
            reminders: self.reminders.clone(),
            wagers: self.wagers.clone(),
            checkpoints: self.checkpoints.clone(),
            auth: Arc::new(self.sessions.clone()),
            tasks: Arc::new(self.tasks.clone()),
            emotions: Arc::new(self.emotions.clone()),
            clock: Arc::clone(&self.clock),
            config: self.reconciler.clone(),
        }
    }

    /// Context for generating `task`'s nudge; `None` if the task is gone.
    ///
    /// # Errors
    /// Returns an error if a collaborator lookup fails.
    pub async fn nudge_context(
        &self,
        user: &str,
        task: &str,
    ) -> Result<Option<NudgeContext>, CollabError> {
        nudge_context(
            &self.tasks,
            &self.emotions,
            user,
            task,
            self.reconciler.emotion_history,
        )
        .await
    }
}

/// Assemble a nudge context from the collaborator contracts.
///
/// # Errors
/// Returns an error if a lookup fails for a reason other than a missing task.
pub async fn nudge_context(
    tasks: &dyn TaskManager,
    emotions: &dyn EmotionLogger,
    user: &str,
    task: &str,
    history: usize,
) -> Result<Option<NudgeContext>, CollabError> {
    let info = match tasks.get_task(user, task).await {
        Ok(info) => info,
        Err(CollabError::TaskNotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let recent_emotions = emotions.recent_emotions(user, history).await?;
    Ok(Some(NudgeContext {
        user: user.to_string(),
        task: task.to_string(),
        title: info.title,
        description: info.description,
        due: info.due,
        recent_emotions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::generator::TemplateGenerator;

    fn services() -> Services {
        Services::in_memory(
            Arc::new(ManualClock::default()),
            &Config::default(),
            Arc::new(TemplateGenerator::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn nudge_context_collects_task_and_moods() {
        let s = services();
        let task = s.tasks.create("u", "Read", "ch. 3", None).await.unwrap().task;
        s.emotions.log("u", "calm", None).await.unwrap();

        let ctx = s.nudge_context("u", &task.id).await.unwrap().unwrap();
        assert_eq!(ctx.title, "Read");
        assert_eq!(ctx.description, "ch. 3");
        assert_eq!(ctx.recent_emotions.len(), 1);
    }

    #[tokio::test]
    async fn nudge_context_is_none_for_deleted_task() {
        let s = services();
        assert!(s.nudge_context("u", "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stores_share_bus() {
        let s = services();
        let mut rx = s.bus.subscribe();
        s.sessions.revoke_user("u").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event.user(), "u");
    }
}
