//! Trigger definitions for the rule engine.

use serde::{Deserialize, Serialize};

use crate::events::DomainEvent;

/// The task event a rule fires on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Trigger {
    TaskCreated,
    TaskStarted,
    TaskCompleted,
    TaskDeleted,
}

impl Trigger {
    pub fn matches(self, event: &DomainEvent) -> bool {
        matches!(
            (self, event),
            (Self::TaskCreated, DomainEvent::TaskCreated { .. })
                | (Self::TaskStarted, DomainEvent::TaskStarted { .. })
                | (Self::TaskCompleted, DomainEvent::TaskCompleted { .. })
                | (Self::TaskDeleted, DomainEvent::TaskDeleted { .. })
        )
    }
}
