//! Collaborators at the boundary of the reconciliation layer.
//!
//! The reconciler only needs three narrow contracts: look up a task's text,
//! read a user's recent moods, and check a bearer token. The traits below
//! are those contracts; the SQLite-backed types in the submodules are the
//! implementations the server and CLI use.

mod emotions;
mod sessions;
mod tasks;

pub use emotions::EmotionJournal;
pub use sessions::SessionRegistry;
pub use tasks::TaskBook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DatabaseError;
use crate::events::DomainEvent;

#[derive(Error, Debug)]
pub enum CollabError {
    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("invalid or revoked session token")]
    InvalidToken,

    #[error("invalid task transition: {0}")]
    InvalidTransition(String),

    #[error("'{0}' must not be empty")]
    Empty(&'static str),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for CollabError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.into())
    }
}

/// Where a task is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Started,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user: String,
    pub title: String,
    pub description: String,
    pub due: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// A task mutation together with the event it should raise.
///
/// The caller decides how the event travels: the server publishes it with a
/// correlation id, the CLI feeds it straight into the rule engine.
#[derive(Debug, Clone)]
pub struct TaskChange {
    pub task: Task,
    pub event: DomainEvent,
}

/// The text a nudge is written from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub title: String,
    pub description: String,
    pub due: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionEntry {
    pub id: i64,
    pub user: String,
    pub emotion: String,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskManager: Send + Sync + std::fmt::Debug {
    /// Returns `TaskNotFound` if the user has no such task.
    async fn get_task(&self, user: &str, task: &str) -> Result<TaskInfo, CollabError>;
}

#[async_trait]
pub trait EmotionLogger: Send + Sync + std::fmt::Debug {
    /// Most recent entries first.
    async fn recent_emotions(
        &self,
        user: &str,
        limit: usize,
    ) -> Result<Vec<EmotionEntry>, CollabError>;
}

#[async_trait]
pub trait Auth: Send + Sync + std::fmt::Debug {
    /// Resolve a bearer token to its user; `InvalidToken` otherwise.
    async fn current_user(&self, token: &str) -> Result<String, CollabError>;

    async fn has_active_session(&self, user: &str) -> Result<bool, CollabError>;
}
