//! Action definitions for the rule engine.

use serde::{Deserialize, Serialize};

/// Something a rule does to the wager and reminder stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Action {
    /// Schedule a nudge `lead_mins` before the task's due time, or
    /// `fallback_delay_mins` from now when that is not in the future.
    ScheduleNudge {
        lead_mins: u32,
        fallback_delay_mins: u32,
    },
    CancelNudge,
    /// Win the task's bet, using the event time as the start time.
    ResolveBet,
    /// Delete the task's bet, refunding it if still open.
    CancelBet,
}

impl Action {
    /// Get a human-readable description of this action
    pub fn description(&self) -> String {
        match self {
            Action::ScheduleNudge {
                lead_mins,
                fallback_delay_mins,
            } => format!(
                "Schedule a nudge {lead_mins} minutes before the due time \
                 (or in {fallback_delay_mins} minutes)"
            ),
            Action::CancelNudge => "Cancel the task's pending nudge".to_string(),
            Action::ResolveBet => "Resolve the task's bet as won".to_string(),
            Action::CancelBet => "Cancel the task's bet with a refund".to_string(),
        }
    }

    /// Get the type name of this action
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::ScheduleNudge { .. } => "ScheduleNudge",
            Action::CancelNudge => "CancelNudge",
            Action::ResolveBet => "ResolveBet",
            Action::CancelBet => "CancelBet",
        }
    }
}
