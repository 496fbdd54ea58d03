use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reminder::Nudge;
use crate::wager::Bet;

/// One message on a client's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Connected,
    #[serde(rename_all = "camelCase")]
    Nudge {
        id: String,
        task: String,
        delivery_time: DateTime<Utc>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    BetResolved {
        id: String,
        task: String,
        wager: i64,
        deadline: DateTime<Utc>,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    BetExpired {
        id: String,
        task: String,
        wager: i64,
        deadline: DateTime<Utc>,
        success: bool,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl Frame {
    /// `None` for a nudge that has not been triggered.
    pub fn nudge(nudge: &Nudge) -> Option<Self> {
        Some(Self::Nudge {
            id: nudge.id.clone(),
            task: nudge.task.clone(),
            delivery_time: nudge.delivery_time,
            message: nudge.message.clone()?,
        })
    }

    /// `None` for an open bet.
    pub fn bet(bet: &Bet) -> Option<Self> {
        let (id, task, wager, deadline) = (bet.id.clone(), bet.task.clone(), bet.wager, bet.deadline);
        match bet.success? {
            true => Some(Self::BetResolved {
                id,
                task,
                wager,
                deadline,
                success: true,
            }),
            false => Some(Self::BetExpired {
                id,
                task,
                wager,
                deadline,
                success: false,
            }),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
