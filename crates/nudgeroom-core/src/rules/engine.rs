//! Rule evaluation.

use super::{Action, Result, Rule, RuleStore};
use crate::events::DomainEvent;

/// Evaluates events against a loaded rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn load(store: &RuleStore) -> Result<Self> {
        Ok(Self::new(store.load_enabled()?))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// All actions of all matching rules, in rule order.
    pub fn evaluate(&self, event: &DomainEvent) -> Vec<(String, Action)> {
        self.rules
            .iter()
            .filter_map(|rule| rule.matches_event(event).map(|actions| (rule, actions)))
            .flat_map(|(rule, actions)| {
                actions
                    .iter()
                    .map(move |action| (rule.name.clone(), action.clone()))
            })
            .collect()
    }
}
