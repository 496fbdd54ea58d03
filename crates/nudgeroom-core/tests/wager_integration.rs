//! Integration tests for bets and nudges driven through rules.
//!
//! Covers the task lifecycle end to end: task events go through the default
//! rule set into the stores, and concurrent observers race on the same
//! records.

use chrono::{DateTime, Duration};
use nudgeroom_core::generator::{MessageGenerator, NudgeContext, ScriptedGenerator};
use nudgeroom_core::rules::{ActionExecutor, Rule, RuleEngine};
use nudgeroom_core::wager::WagerError;
use nudgeroom_core::{Clock, Config, DomainEvent, ManualClock, ResolveOutcome, Services, TriggerOutcome};
use std::sync::Arc;

fn services_with(generator: Arc<dyn MessageGenerator>) -> (Services, ManualClock) {
    let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    let services = Services::in_memory(Arc::new(clock.clone()), &Config::default(), generator).unwrap();
    (services, clock)
}

fn services() -> (Services, ManualClock) {
    services_with(Arc::new(ScriptedGenerator::default()))
}

async fn dispatch(services: &Services, event: &DomainEvent) {
    let engine = RuleEngine::new(Rule::defaults());
    let log = ActionExecutor::from_services(services)
        .execute_batch(event, engine.evaluate(event))
        .await;
    assert_eq!(log.failure_count(), 0, "{log:?}");
}

#[tokio::test]
async fn test_full_bet_lifecycle() {
    let (s, clock) = services();
    let created = s.tasks.create("alice", "Report", "", None).await.unwrap();
    dispatch(&s, &created.event).await;
    let task = created.task.id;

    s.wagers
        .place("alice", &task, 20, clock.now() + Duration::hours(1), None)
        .await
        .unwrap();
    assert_eq!(s.ledger.balance("alice").await.unwrap().points, 80);

    clock.advance(Duration::minutes(30));
    let started = s.tasks.start("alice", &task).await.unwrap();
    dispatch(&s, &started.event).await;

    let bet = s.wagers.get("alice", &task).await.unwrap().unwrap();
    assert_eq!(bet.success, Some(true));
    assert_eq!(bet.reward, Some(22));
    let entry = s.ledger.balance("alice").await.unwrap();
    assert_eq!(entry.points, 102);
    assert_eq!(entry.streak, 1);

    // The nudge scheduled on creation was silenced by the start.
    let nudge = s.reminders.get("alice", &task).await.unwrap().unwrap();
    assert!(nudge.canceled);
    assert!(nudge.triggered_at.is_none());
}

#[tokio::test]
async fn test_deadline_after_due_is_rejected_without_debit() {
    let (s, clock) = services();
    let due = clock.now() + Duration::hours(2);
    let task = s.tasks.create("alice", "Slides", "", Some(due)).await.unwrap().task;

    let err = s
        .wagers
        .place("alice", &task.id, 20, due + Duration::minutes(1), Some(due))
        .await
        .unwrap_err();
    assert!(matches!(err, WagerError::DeadlineAfterDue { .. }));
    assert_eq!(s.ledger.balance("alice").await.unwrap().points, 100);
    assert!(s.wagers.get("alice", &task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expiry_and_late_start_race_settles_once() {
    let (s, clock) = services();
    let task = s.tasks.create("alice", "Run", "", None).await.unwrap().task;
    s.wagers
        .place("alice", &task.id, 30, clock.now() + Duration::minutes(10), None)
        .await
        .unwrap();
    clock.advance(Duration::minutes(11));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let wagers = s.wagers.clone();
        let task = task.id.clone();
        handles.push(tokio::spawn(async move {
            wagers.resolve_expired("alice", &task).await
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().applied() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    // The start arrives after the deadline: the bet stays lost.
    let late = s.wagers.resolve("alice", &task.id, clock.now()).await.unwrap();
    assert!(matches!(late, ResolveOutcome::AlreadyResolved(_)));
    let entry = s.ledger.balance("alice").await.unwrap();
    assert_eq!(entry.points, 70);
    assert_eq!(entry.streak, 0);
}

#[tokio::test]
async fn test_concurrent_triggers_generate_once_per_winner() {
    let generator = Arc::new(ScriptedGenerator::default().with_delay(std::time::Duration::from_millis(20)));
    let (s, clock) = services_with(Arc::clone(&generator) as Arc<dyn MessageGenerator>);
    let task = s.tasks.create("alice", "Floss", "", None).await.unwrap().task;
    s.reminders
        .schedule("alice", &task.id, clock.now() + Duration::minutes(1))
        .await
        .unwrap();
    clock.advance(Duration::minutes(2));
    let context: NudgeContext = s.nudge_context("alice", &task.id).await.unwrap().unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let reminders = s.reminders.clone();
        let context = context.clone();
        let task = task.id.clone();
        handles.push(tokio::spawn(async move {
            reminders.trigger("alice", &task, &context).await
        }));
    }
    let mut triggered = 0;
    for handle in handles {
        if let TriggerOutcome::Triggered(_) = handle.await.unwrap().unwrap() {
            triggered += 1;
        }
    }
    assert_eq!(triggered, 1);

    let nudge = s.reminders.get("alice", &task.id).await.unwrap().unwrap();
    assert_eq!(nudge.message.as_deref(), Some("Time to get started!"));
}

#[tokio::test]
async fn test_deleting_task_refunds_nothing_by_default() {
    let (s, clock) = services();
    let created = s.tasks.create("alice", "Garden", "", None).await.unwrap();
    dispatch(&s, &created.event).await;
    let task = created.task.id;
    s.wagers
        .place("alice", &task, 10, clock.now() + Duration::hours(1), None)
        .await
        .unwrap();

    let deleted = s.tasks.delete("alice", &task).await.unwrap();
    dispatch(&s, &deleted.event).await;

    assert!(s.reminders.get("alice", &task).await.unwrap().unwrap().canceled);
    assert!(s.wagers.get("alice", &task).await.unwrap().is_some());
    assert_eq!(s.ledger.balance("alice").await.unwrap().points, 90);
}
