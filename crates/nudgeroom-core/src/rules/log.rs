//! Action execution logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of executing a single action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Name of the rule that produced this action
    pub rule_name: String,
    /// Type of action that was executed
    pub action_type: String,
    pub status: ExecutionStatus,
}

/// Status of action execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed {
        /// Human-readable reason for failure
        reason: String,
        /// Whether running the action again could succeed
        retriable: bool,
    },
    /// Nothing to do, including losing a race to another writer
    Skipped { reason: String },
}

/// Log of one event's rule evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLog {
    pub executed_at: DateTime<Utc>,
    pub results: Vec<ActionResult>,
}

impl ActionLog {
    pub fn new(executed_at: DateTime<Utc>, results: Vec<ActionResult>) -> Self {
        Self {
            executed_at,
            results,
        }
    }

    /// Get the number of successful actions
    pub fn success_count(&self) -> usize {
        self.count(|s| matches!(s, ExecutionStatus::Success))
    }

    /// Get the number of failed actions
    pub fn failure_count(&self) -> usize {
        self.count(|s| matches!(s, ExecutionStatus::Failed { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, ExecutionStatus::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&ExecutionStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}
