use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};

/// Every state transition in the system produces a DomainEvent.
/// The rule dispatcher subscribes to task events; connection supervisors
/// subscribe to reminder, wager and session events to wake up early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    TaskCreated {
        user: String,
        task: String,
        due: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    TaskStarted {
        user: String,
        task: String,
        at: DateTime<Utc>,
    },
    TaskCompleted {
        user: String,
        task: String,
        at: DateTime<Utc>,
    },
    TaskDeleted {
        user: String,
        task: String,
        at: DateTime<Utc>,
    },
    NudgeScheduled {
        user: String,
        task: String,
        delivery: DateTime<Utc>,
    },
    NudgeTriggered {
        user: String,
        task: String,
        at: DateTime<Utc>,
    },
    NudgeCanceled {
        user: String,
        task: String,
    },
    BetPlaced {
        user: String,
        task: String,
        wager: i64,
    },
    BetCanceled {
        user: String,
        task: String,
        refunded: bool,
    },
    /// A bet reached its terminal state, won or expired.
    BetResolved {
        user: String,
        task: String,
        success: bool,
        at: DateTime<Utc>,
    },
    SessionRevoked {
        user: String,
    },
}

impl DomainEvent {
    pub fn user(&self) -> &str {
        match self {
            Self::TaskCreated { user, .. }
            | Self::TaskStarted { user, .. }
            | Self::TaskCompleted { user, .. }
            | Self::TaskDeleted { user, .. }
            | Self::NudgeScheduled { user, .. }
            | Self::NudgeTriggered { user, .. }
            | Self::NudgeCanceled { user, .. }
            | Self::BetPlaced { user, .. }
            | Self::BetCanceled { user, .. }
            | Self::BetResolved { user, .. }
            | Self::SessionRevoked { user } => user,
        }
    }

    /// Task events are the ones rules fire on.
    pub fn is_task_event(&self) -> bool {
        matches!(
            self,
            Self::TaskCreated { .. }
                | Self::TaskStarted { .. }
                | Self::TaskCompleted { .. }
                | Self::TaskDeleted { .. }
        )
    }
}

/// Ties a published event to a waiting HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub u64);

/// An event as it travels on the bus.
#[derive(Debug, Clone)]
pub struct Published {
    pub event: DomainEvent,
    pub correlation: Option<CorrelationId>,
}

/// Broadcast bus for domain events.
///
/// Publishing never blocks and never fails: with no subscribers the event is
/// dropped, and a lagging subscriber skips ahead (and is told how far).
/// Task feeds are the exception: they are unbounded and see every task event.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Published>,
    task_feeds: Arc<Mutex<Vec<mpsc::UnboundedSender<Published>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            task_feeds: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn publish(&self, event: DomainEvent) {
        self.publish_correlated(event, None);
    }

    pub fn publish_correlated(&self, event: DomainEvent, correlation: Option<CorrelationId>) {
        tracing::trace!(?event, ?correlation, "publish");
        let published = Published { event, correlation };
        if published.event.is_task_event() {
            let mut feeds = self.task_feeds.lock().unwrap_or_else(PoisonError::into_inner);
            feeds.retain(|feed| feed.send(published.clone()).is_ok());
        }
        let _ = self.tx.send(published);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }

    /// A feed of task events that never lags. Work that must run once per
    /// task event (rules) reads from here instead of [`subscribe`](Self::subscribe).
    pub fn subscribe_tasks(&self) -> mpsc::UnboundedReceiver<Published> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.task_feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = DomainEvent::NudgeCanceled {
            user: "u".into(),
            task: "t".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "NudgeCanceled");
        assert_eq!(json["task"], "t");
    }

    #[tokio::test]
    async fn subscribers_receive_correlated_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish_correlated(
            DomainEvent::SessionRevoked { user: "u".into() },
            Some(CorrelationId(7)),
        );
        let got = rx.recv().await.unwrap();
        assert_eq!(got.correlation, Some(CorrelationId(7)));
        assert_eq!(got.event.user(), "u");
        assert!(!got.event.is_task_event());
    }

    #[tokio::test]
    async fn task_feed_keeps_events_a_lagging_subscriber_drops() {
        let bus = EventBus::new(2);
        let mut lossy = bus.subscribe();
        let mut feed = bus.subscribe_tasks();
        for n in 0..5 {
            bus.publish(DomainEvent::TaskDeleted {
                user: "u".into(),
                task: format!("t{n}"),
                at: Utc::now(),
            });
        }
        bus.publish(DomainEvent::SessionRevoked { user: "u".into() });

        assert!(matches!(lossy.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
        let mut tasks = Vec::new();
        while let Ok(published) = feed.try_recv() {
            assert!(published.event.is_task_event());
            tasks.push(published.event);
        }
        assert_eq!(tasks.len(), 5);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::SessionRevoked { user: "u".into() });
    }
}
