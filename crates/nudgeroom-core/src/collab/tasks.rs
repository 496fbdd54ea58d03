use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use uuid::Uuid;

use super::{CollabError, Task, TaskChange, TaskInfo, TaskManager, TaskStatus};
use crate::clock::Clock;
use crate::events::DomainEvent;
use crate::storage::{from_ms, to_ms, truncate_ms, Database};

const TASK_COLUMNS: &str = "id, user_id, title, description, due_ms, status, created_ms";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        user: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        due: row.get::<_, Option<i64>>(4)?.map(from_ms),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        created_at: from_ms(row.get(6)?),
    })
}

fn find_task(conn: &Connection, user: &str, task: &str) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 AND id = ?2"),
        params![user, task],
        row_to_task,
    )
    .optional()
}

/// Minimal task list backing the rule triggers.
#[derive(Debug, Clone)]
pub struct TaskBook {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl TaskBook {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// # Errors
    /// Returns an error for an empty title or a failed write.
    pub async fn create(
        &self,
        user: &str,
        title: &str,
        description: &str,
        due: Option<DateTime<Utc>>,
    ) -> Result<TaskChange, CollabError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CollabError::Empty("title"));
        }
        let now = truncate_ms(self.clock.now());
        let task = Task {
            id: Uuid::new_v4().to_string(),
            user: user.to_string(),
            title: title.to_string(),
            description: description.trim().to_string(),
            due: due.map(truncate_ms),
            status: TaskStatus::Pending,
            created_at: now,
        };
        let record = task.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                    params![
                        record.id,
                        record.user,
                        record.title,
                        record.description,
                        record.due.map(to_ms),
                        record.status.as_str(),
                        to_ms(record.created_at),
                    ],
                )?;
                Ok::<_, CollabError>(())
            })
            .await?;

        let event = DomainEvent::TaskCreated {
            user: task.user.clone(),
            task: task.id.clone(),
            due: task.due,
            at: now,
        };
        Ok(TaskChange { task, event })
    }

    /// Move a pending task to started.
    ///
    /// # Errors
    /// Returns `TaskNotFound`, or `InvalidTransition` if the task is not pending.
    pub async fn start(&self, user: &str, task: &str) -> Result<TaskChange, CollabError> {
        let task = self
            .transition(user, task, TaskStatus::Started, &[TaskStatus::Pending])
            .await?;
        let event = DomainEvent::TaskStarted {
            user: task.user.clone(),
            task: task.id.clone(),
            at: truncate_ms(self.clock.now()),
        };
        Ok(TaskChange { task, event })
    }

    /// Mark a task completed.
    ///
    /// # Errors
    /// Returns `TaskNotFound`, or `InvalidTransition` if it is already completed.
    pub async fn complete(&self, user: &str, task: &str) -> Result<TaskChange, CollabError> {
        let task = self
            .transition(
                user,
                task,
                TaskStatus::Completed,
                &[TaskStatus::Pending, TaskStatus::Started],
            )
            .await?;
        let event = DomainEvent::TaskCompleted {
            user: task.user.clone(),
            task: task.id.clone(),
            at: truncate_ms(self.clock.now()),
        };
        Ok(TaskChange { task, event })
    }

    /// # Errors
    /// Returns `TaskNotFound` if there is nothing to delete.
    pub async fn delete(&self, user: &str, task: &str) -> Result<TaskChange, CollabError> {
        let user_id = user.to_string();
        let task_id = task.to_string();
        let task = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let task = find_task(&tx, &user_id, &task_id)?
                    .ok_or_else(|| CollabError::TaskNotFound(task_id.clone()))?;
                tx.execute(
                    "DELETE FROM tasks WHERE user_id = ?1 AND id = ?2",
                    params![user_id, task_id],
                )?;
                tx.commit()?;
                Ok::<_, CollabError>(task)
            })
            .await?;
        let event = DomainEvent::TaskDeleted {
            user: task.user.clone(),
            task: task.id.clone(),
            at: truncate_ms(self.clock.now()),
        };
        Ok(TaskChange { task, event })
    }

    async fn transition(
        &self,
        user: &str,
        task: &str,
        to: TaskStatus,
        from: &'static [TaskStatus],
    ) -> Result<Task, CollabError> {
        let user = user.to_string();
        let task = task.to_string();
        self.db
            .call(move |conn| {
                let current = find_task(conn, &user, &task)?
                    .ok_or_else(|| CollabError::TaskNotFound(task.clone()))?;
                if !from.contains(&current.status) {
                    return Err(CollabError::InvalidTransition(format!(
                        "task {task} is {} and cannot become {}",
                        current.status.as_str(),
                        to.as_str()
                    )));
                }
                let changed = conn.execute(
                    "UPDATE tasks SET status = ?3 WHERE user_id = ?1 AND id = ?2 AND status = ?4",
                    params![user, task, to.as_str(), current.status.as_str()],
                )?;
                if changed != 1 {
                    return Err(CollabError::InvalidTransition(format!(
                        "task {task} changed concurrently"
                    )));
                }
                Ok(Task {
                    status: to,
                    ..current
                })
            })
            .await
    }

    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn get(&self, user: &str, task: &str) -> Result<Option<Task>, CollabError> {
        let user = user.to_string();
        let task = task.to_string();
        self.db
            .call(move |conn| Ok(find_task(conn, &user, &task)?))
            .await
    }

    /// Tasks for `user`, oldest first.
    ///
    /// # Errors
    /// Returns an error if the database read fails.
    pub async fn list(&self, user: &str) -> Result<Vec<Task>, CollabError> {
        let user = user.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY created_ms, id"
                ))?;
                let rows = stmt.query_map([&user], row_to_task)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }
}

#[async_trait]
impl TaskManager for TaskBook {
    async fn get_task(&self, user: &str, task: &str) -> Result<TaskInfo, CollabError> {
        let found = self
            .get(user, task)
            .await?
            .ok_or_else(|| CollabError::TaskNotFound(task.to_string()))?;
        Ok(TaskInfo {
            title: found.title,
            description: found.description,
            due: found.due,
        })
    }
}
