//! Integration tests for per-connection reconciliation.
//!
//! Each test drives `EventReconciler` by hand against in-memory stores and a
//! manual clock, then inspects the exact frame sequence a client would see.

use chrono::{DateTime, Duration, Utc};
use nudgeroom_core::generator::{GeneratorError, MessageGenerator, ScriptedGenerator};
use nudgeroom_core::reconciler::{ChannelSink, EventReconciler, Frame, ReconcileError};
use nudgeroom_core::sweep::Sweeper;
use nudgeroom_core::{Clock, Config, ManualClock, Services};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    services: Services,
    clock: ManualClock,
    generator: Arc<ScriptedGenerator>,
}

type Connection = (EventReconciler<ChannelSink>, mpsc::Receiver<Frame>);

fn harness() -> Harness {
    harness_with(ScriptedGenerator::default())
}

fn harness_with(generator: ScriptedGenerator) -> Harness {
    let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    let generator = Arc::new(generator);
    let services = Services::in_memory(
        Arc::new(clock.clone()),
        &Config::default(),
        Arc::clone(&generator) as Arc<dyn MessageGenerator>,
    )
    .unwrap();
    Harness {
        services,
        clock,
        generator,
    }
}

impl Harness {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn open(&self, token: &str) -> Connection {
        let (sink, rx) = ChannelSink::new(64);
        (
            EventReconciler::new(self.services.reconciler_deps(), sink, token),
            rx,
        )
    }

    /// Connect and backfill, returning the live connection.
    async fn connect(&self, token: &str) -> Connection {
        let (mut reconciler, rx) = self.open(token);
        reconciler.connect().await.unwrap();
        reconciler.backfill().await.unwrap();
        (reconciler, rx)
    }

    async fn task(&self, user: &str, title: &str) -> String {
        self.services
            .tasks
            .create(user, title, "", None)
            .await
            .unwrap()
            .task
            .id
    }

    async fn nudge_in(&self, user: &str, task: &str, minutes: i64) -> DateTime<Utc> {
        let at = self.now() + Duration::minutes(minutes);
        self.services.reminders.schedule(user, task, at).await.unwrap();
        at
    }
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn nudge_tasks(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Nudge { task, .. } => Some(task.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Backfill and reconnect
// ============================================================================

#[tokio::test]
async fn test_backfill_triggers_due_nudge_once_across_reconnects() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let first = h.task("alice", "Write report").await;
    let delivery = h.nudge_in("alice", &first, 1).await;
    h.clock.advance(Duration::minutes(2));

    let (mut conn, mut rx) = h.connect(&token).await;
    assert_eq!(
        drain(&mut rx),
        vec![
            Frame::Connected,
            Frame::Nudge {
                id: h.services.reminders.get("alice", &first).await.unwrap().unwrap().id,
                task: first.clone(),
                delivery_time: delivery,
                message: "Time to get started!".into(),
            },
        ]
    );
    conn.close();

    let second = h.task("alice", "Call bank").await;
    h.nudge_in("alice", &second, 1).await;
    h.clock.advance(Duration::minutes(2));

    let (_conn, mut rx) = h.connect(&token).await;
    let frames = drain(&mut rx);
    assert_eq!(frames[0], Frame::Connected);
    assert_eq!(nudge_tasks(&frames), vec![second]);
    assert_eq!(h.generator.call_count(), 2);
}

#[tokio::test]
async fn test_nudge_triggered_while_offline_is_replayed() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let task = h.task("alice", "Stretch").await;
    h.nudge_in("alice", &task, 1).await;
    h.clock.advance(Duration::minutes(2));

    let report = Sweeper::new(&h.services).sweep_once().await.unwrap();
    assert_eq!(report.triggered, 1);

    let (_conn, mut rx) = h.connect(&token).await;
    assert_eq!(nudge_tasks(&drain(&mut rx)), vec![task]);
    assert_eq!(h.generator.call_count(), 1);
}

#[tokio::test]
async fn test_frames_arrive_in_delivery_order() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let late = h.task("alice", "Late").await;
    let early = h.task("alice", "Early").await;
    h.nudge_in("alice", &late, 3).await;
    h.nudge_in("alice", &early, 1).await;
    h.clock.advance(Duration::minutes(5));

    let (_conn, mut rx) = h.connect(&token).await;
    assert_eq!(nudge_tasks(&drain(&mut rx)), vec![early, late]);
}

#[tokio::test]
async fn test_old_history_outside_backlog_window_is_not_replayed() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let task = h.task("alice", "Ancient").await;
    h.nudge_in("alice", &task, 1).await;
    h.clock.advance(Duration::minutes(2));
    Sweeper::new(&h.services).sweep_once().await.unwrap();

    h.clock.advance(Duration::hours(2));
    let (_conn, mut rx) = h.connect(&token).await;
    assert_eq!(drain(&mut rx), vec![Frame::Connected]);
}

// ============================================================================
// Multiple devices
// ============================================================================

#[tokio::test]
async fn test_two_devices_each_see_a_nudge_exactly_once() {
    let h = harness();
    let phone = h.services.sessions.issue("alice").await.unwrap();
    let laptop = h.services.sessions.issue("alice").await.unwrap();
    let (mut a, mut rx_a) = h.connect(&phone).await;
    let (mut b, mut rx_b) = h.connect(&laptop).await;
    assert_eq!(drain(&mut rx_a), vec![Frame::Connected]);
    assert_eq!(drain(&mut rx_b), vec![Frame::Connected]);

    let task = h.task("alice", "Water plants").await;
    h.nudge_in("alice", &task, 1).await;
    h.clock.advance(Duration::minutes(2));

    a.poll().await.unwrap();
    b.poll().await.unwrap();
    a.poll().await.unwrap();
    b.poll().await.unwrap();

    assert_eq!(nudge_tasks(&drain(&mut rx_a)), vec![task.clone()]);
    assert_eq!(nudge_tasks(&drain(&mut rx_b)), vec![task]);
    assert_eq!(h.generator.call_count(), 1);
}

#[tokio::test]
async fn test_debug_output_names_the_connected_user() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let (conn, _rx) = h.connect(&token).await;
    let shown = format!("{conn:?}");
    assert!(shown.contains("Polling"), "{shown}");
    assert!(shown.contains("alice"), "{shown}");
}

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let (mut a, _rx_a) = h.connect(&token).await;
    let (mut b, mut rx_b) = h.connect(&token).await;

    let first = h.task("alice", "One").await;
    let second = h.task("alice", "Two").await;
    h.nudge_in("alice", &first, 1).await;
    let later = h.nudge_in("alice", &second, 2).await;
    h.clock.advance(Duration::minutes(3));
    a.poll().await.unwrap();

    // The second device replays from its older cursor; its intermediate
    // saves are behind the stored value and must not pull it back.
    b.poll().await.unwrap();
    assert_eq!(nudge_tasks(&drain(&mut rx_b)), vec![first, second]);
    let stored = h.services.checkpoints.get("alice").await.unwrap().unwrap();
    assert_eq!(stored.last_nudge, later);
    assert_eq!(b.checkpoint().unwrap().last_nudge, later);
}

// ============================================================================
// Failures and cleanup
// ============================================================================

#[tokio::test]
async fn test_generator_failure_reports_error_and_retries_next_cycle() {
    let h = harness_with(ScriptedGenerator::default().with_reply(Err(GeneratorError::RateLimited)));
    let token = h.services.sessions.issue("alice").await.unwrap();
    let task = h.task("alice", "Taxes").await;
    h.nudge_in("alice", &task, 1).await;
    h.clock.advance(Duration::minutes(2));

    let (mut conn, mut rx) = h.connect(&token).await;
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[1], Frame::Error { message } if message.contains("rate limited")));
    let pending = h.services.reminders.get("alice", &task).await.unwrap().unwrap();
    assert!(pending.triggered_at.is_none());

    conn.poll().await.unwrap();
    assert_eq!(nudge_tasks(&drain(&mut rx)), vec![task]);
}

#[tokio::test]
async fn test_generator_failure_keeps_later_nudges_behind_it() {
    let h = harness_with(ScriptedGenerator::default().with_reply(Err(GeneratorError::RateLimited)));
    let token = h.services.sessions.issue("alice").await.unwrap();
    let first = h.task("alice", "First").await;
    let second = h.task("alice", "Second").await;
    h.nudge_in("alice", &first, 1).await;
    h.nudge_in("alice", &second, 2).await;
    h.clock.advance(Duration::minutes(3));

    let (mut conn, mut rx) = h.connect(&token).await;
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[1], Frame::Error { .. }));
    assert!(h.services.reminders.get("alice", &second).await.unwrap().unwrap().triggered_at.is_none());
    assert!(h.services.checkpoints.get("alice").await.unwrap().is_none());
    conn.close();

    // Both fire while no client is connected.
    let report = Sweeper::new(&h.services).sweep_once().await.unwrap();
    assert_eq!(report.triggered, 2);

    let (_conn, mut rx) = h.connect(&token).await;
    assert_eq!(nudge_tasks(&drain(&mut rx)), vec![first, second]);
}

#[tokio::test]
async fn test_nudge_for_deleted_task_is_canceled() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let task = h.task("alice", "Gone soon").await;
    h.nudge_in("alice", &task, 1).await;
    h.services.tasks.delete("alice", &task).await.unwrap();
    h.clock.advance(Duration::minutes(2));

    let (_conn, mut rx) = h.connect(&token).await;
    assert_eq!(drain(&mut rx), vec![Frame::Connected]);
    assert!(h.services.reminders.get("alice", &task).await.unwrap().unwrap().canceled);
    assert_eq!(h.generator.call_count(), 0);
}

// ============================================================================
// Bets
// ============================================================================

#[tokio::test]
async fn test_expired_bet_is_resolved_and_delivered() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let task = h.task("alice", "Gym").await;
    let deadline = h.now() + Duration::minutes(5);
    let bet = h
        .services
        .wagers
        .place("alice", &task, 10, deadline, None)
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(6));

    let (_conn, mut rx) = h.connect(&token).await;
    assert_eq!(
        drain(&mut rx),
        vec![
            Frame::Connected,
            Frame::BetExpired {
                id: bet.id,
                task,
                wager: 10,
                deadline,
                success: false,
            },
        ]
    );
    let entry = h.services.ledger.balance("alice").await.unwrap();
    assert_eq!(entry.points, 90);
    assert_eq!(entry.streak, 0);
}

#[tokio::test]
async fn test_won_bet_is_delivered_once() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let task = h.task("alice", "Essay").await;
    h.services
        .wagers
        .place("alice", &task, 20, h.now() + Duration::hours(1), None)
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(5));
    h.services.wagers.resolve("alice", &task, h.now()).await.unwrap();

    let (mut conn, mut rx) = h.connect(&token).await;
    let frames = drain(&mut rx);
    assert!(matches!(frames.as_slice(), [Frame::Connected, Frame::BetResolved { success: true, .. }]));

    conn.poll().await.unwrap();
    assert!(drain(&mut rx).is_empty());
}

// ============================================================================
// Authorization
// ============================================================================

#[tokio::test]
async fn test_unknown_token_is_rejected() {
    let h = harness();
    let (mut conn, mut rx) = h.open("nr_bogus");
    assert!(matches!(conn.connect().await, Err(ReconcileError::Unauthorized)));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_logout_closes_on_next_poll() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let (mut conn, _rx) = h.connect(&token).await;

    h.services.sessions.revoke_user("alice").await.unwrap();
    assert!(matches!(conn.poll().await, Err(ReconcileError::LoggedOut { .. })));
}

#[tokio::test]
async fn test_revoked_token_with_other_sessions_is_unauthorized() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let _other = h.services.sessions.issue("alice").await.unwrap();
    let (mut conn, _rx) = h.connect(&token).await;

    h.services.sessions.revoke_token(&token).await.unwrap();
    assert!(matches!(conn.check_auth().await, Err(ReconcileError::Unauthorized)));
}

#[tokio::test]
async fn test_closed_reconciler_refuses_work() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let (mut conn, mut rx) = h.connect(&token).await;
    drain(&mut rx);

    assert!(conn.close());
    assert!(!conn.close());
    assert!(matches!(conn.poll().await, Err(ReconcileError::Closed)));
    assert!(matches!(conn.heartbeat().await, Err(ReconcileError::Closed)));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_dropped_client_is_a_transport_error() {
    let h = harness();
    let token = h.services.sessions.issue("alice").await.unwrap();
    let (mut conn, rx) = h.connect(&token).await;
    drop(rx);
    assert!(matches!(conn.heartbeat().await, Err(ReconcileError::Transport(_))));
}
