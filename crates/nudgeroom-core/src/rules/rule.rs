//! A complete trigger -> action rule.

use serde::{Deserialize, Serialize};

use super::{Action, RuleError, Trigger};
use crate::events::DomainEvent;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    /// Human-readable name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this rule is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Events that cause this rule to fire
    pub triggers: Vec<Trigger>,

    /// Actions to execute, in order, when a trigger matches
    pub actions: Vec<Action>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// The rule's actions if it is enabled and any trigger matches.
    pub fn matches_event(&self, event: &DomainEvent) -> Option<&[Action]> {
        if !self.enabled {
            return None;
        }
        self.triggers
            .iter()
            .any(|trigger| trigger.matches(event))
            .then_some(self.actions.as_slice())
    }

    /// # Errors
    /// Returns `InvalidRule` for a blank name or an empty trigger list.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidRule("rule name must not be empty".into()));
        }
        if self.triggers.is_empty() {
            return Err(RuleError::InvalidRule(format!(
                "rule '{}' has no triggers",
                self.name
            )));
        }
        Ok(())
    }

    /// The built-in rule set written on first use.
    pub fn defaults() -> Vec<Rule> {
        vec![
            Rule {
                name: "nudge-on-create".into(),
                description: "Remind the user before a new task is due".into(),
                enabled: true,
                triggers: vec![Trigger::TaskCreated],
                actions: vec![Action::ScheduleNudge {
                    lead_mins: 30,
                    fallback_delay_mins: 60,
                }],
            },
            Rule {
                name: "settle-on-start".into(),
                description: "Starting a task wins its bet and silences its nudge".into(),
                enabled: true,
                triggers: vec![Trigger::TaskStarted],
                actions: vec![Action::ResolveBet, Action::CancelNudge],
            },
            Rule {
                name: "quiet-on-finish".into(),
                description: "Finished or deleted tasks need no reminder".into(),
                enabled: true,
                triggers: vec![Trigger::TaskCompleted, Trigger::TaskDeleted],
                actions: vec![Action::CancelNudge],
            },
        ]
    }
}
