//! Rule engine for task-driven automation.
//!
//! Task mutations raise domain events; rules map those events to wager and
//! reminder actions. One event can fan out to several actions across
//! several rules, and each action reports its own result.

pub mod action;
pub mod engine;
pub mod error;
pub mod executor;
pub mod log;
pub mod rule;
pub mod store;
pub mod trigger;

pub use action::Action;
pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use executor::ActionExecutor;
pub use log::{ActionLog, ActionResult, ExecutionStatus};
pub use rule::Rule;
pub use store::RuleStore;
pub use trigger::Trigger;
