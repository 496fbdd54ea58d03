//! Rule dispatcher: runs the rule engine for every task event on the bus.
//!
//! Events arrive on the bus's lossless task feed and are handled one at a
//! time in publish order, so the actions for one task never interleave and
//! none are skipped when traffic outruns the broadcast capacity. Results go back to the originating request through
//! the correlation table when the event carries an id.

use nudgeroom_core::rules::{ActionExecutor, ActionLog, RuleEngine};
use nudgeroom_core::Published;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::correlation::CorrelationTable;

#[derive(Debug, Clone)]
pub struct RuleDispatcher {
    engine: RuleEngine,
    executor: ActionExecutor,
    correlations: CorrelationTable,
}

impl RuleDispatcher {
    pub fn new(engine: RuleEngine, executor: ActionExecutor, correlations: CorrelationTable) -> Self {
        Self {
            engine,
            executor,
            correlations,
        }
    }

    /// Evaluate and execute rules for one published event. Non-task events
    /// produce no log.
    pub async fn handle(&self, published: &Published) -> Option<ActionLog> {
        if !published.event.is_task_event() {
            return None;
        }
        let actions = self.engine.evaluate(&published.event);
        let log = self.executor.execute_batch(&published.event, actions).await;
        debug!(
            user = published.event.user(),
            succeeded = log.success_count(),
            failed = log.failure_count(),
            skipped = log.skipped_count(),
            "rules executed"
        );
        if let Some(id) = published.correlation {
            if !self.correlations.complete(id, log.clone()) {
                debug!(?id, "no waiter for rule results");
            }
        }
        Some(log)
    }

    /// Consume `events` until the bus is dropped or `shutdown` resolves.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<Published>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        info!(rules = self.engine.rules().len(), "rule dispatcher started");
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                received = events.recv() => match received {
                    Some(published) => {
                        self.handle(&published).await;
                    }
                    None => break,
                },
            }
        }
        info!("rule dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudgeroom_core::generator::TemplateGenerator;
    use nudgeroom_core::rules::Rule;
    use nudgeroom_core::{Config, ManualClock, Services};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Services, RuleDispatcher, CorrelationTable) {
        setup_with(Config::default())
    }

    fn setup_with(config: Config) -> (Services, RuleDispatcher, CorrelationTable) {
        let services = Services::in_memory(
            Arc::new(ManualClock::default()),
            &config,
            Arc::new(TemplateGenerator::new()),
        )
        .unwrap();
        let correlations = CorrelationTable::new();
        let dispatcher = RuleDispatcher::new(
            RuleEngine::new(Rule::defaults()),
            ActionExecutor::from_services(&services),
            correlations.clone(),
        );
        (services, dispatcher, correlations)
    }

    #[tokio::test]
    async fn correlated_event_answers_its_waiter() {
        let (services, dispatcher, correlations) = setup();
        let change = services.tasks.create("u", "Read", "", None).await.unwrap();
        let pending = correlations.register().unwrap();
        let published = Published {
            event: change.event,
            correlation: Some(pending.id()),
        };

        dispatcher.handle(&published).await.unwrap();
        let log = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(log.success_count(), 1);
    }

    #[tokio::test]
    async fn burst_larger_than_bus_capacity_runs_every_rule() {
        let mut config = Config::default();
        config.bus.capacity = 2;
        let (services, dispatcher, _) = setup_with(config);
        let feed = services.bus.subscribe_tasks();
        for n in 0..8 {
            let change = services.tasks.create("u", &format!("task {n}"), "", None).await.unwrap();
            services.bus.publish(change.event);
        }

        let handle = tokio::spawn(dispatcher.run(feed, std::future::pending()));
        let mut scheduled = 0;
        for _ in 0..200 {
            scheduled = services.reminders.list_for_user("u").await.unwrap().len();
            if scheduled == 8 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(scheduled, 8);
    }

    #[tokio::test]
    async fn non_task_events_are_ignored() {
        let (_services, dispatcher, _) = setup();
        let published = Published {
            event: nudgeroom_core::DomainEvent::SessionRevoked { user: "u".into() },
            correlation: None,
        };
        assert!(dispatcher.handle(&published).await.is_none());
    }
}
