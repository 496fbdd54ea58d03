//! Drives one reconciler through its lifetime.
//!
//! The supervisor owns the poll and heartbeat timers and the event-bus
//! subscription. Every step runs against the connection's [`CloseHandle`],
//! so closing from anywhere (client gone, logout, shutdown) takes effect
//! even in the middle of a cycle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{EventReconciler, FrameSink, ReconcileError, ReconcilerDeps};
use crate::events::{DomainEvent, EventBus, Published};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ClientGone,
    TransportFailed,
    Unauthorized,
    LoggedOut,
    Shutdown,
    ServerError,
}

impl From<&ReconcileError> for CloseReason {
    fn from(err: &ReconcileError) -> Self {
        match err {
            ReconcileError::Unauthorized => Self::Unauthorized,
            ReconcileError::LoggedOut { .. } => Self::LoggedOut,
            ReconcileError::Transport(_) => Self::TransportFailed,
            ReconcileError::Closed => Self::Shutdown,
            _ => Self::ServerError,
        }
    }
}

/// Shared, idempotent close signal for one connection.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record `reason` and wake waiters. Only the first call wins.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CloseReason> {
        *self.tx.borrow()
    }

    /// Resolves once the handle is closed.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.tx.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(CloseReason::Shutdown),
            Err(_) => CloseReason::Shutdown,
        };
        reason
    }
}

#[derive(Debug, Clone, Copy)]
enum Wake {
    Poll,
    Heartbeat,
    Recheck,
    Auth,
}

pub struct ConnectionSupervisor<S> {
    reconciler: EventReconciler<S>,
    events: broadcast::Receiver<Published>,
    close: CloseHandle,
    poll_every: Duration,
    heartbeat_every: Duration,
}

impl<S: FrameSink> ConnectionSupervisor<S> {
    /// The bus subscription starts here, so events raised while the
    /// connection backfills still wake it afterwards.
    pub fn new(
        deps: ReconcilerDeps,
        sink: S,
        token: impl Into<String>,
        bus: &EventBus,
        close: CloseHandle,
    ) -> Self {
        let poll_every = deps.config.poll_interval();
        let heartbeat_every = deps.config.heartbeat_interval();
        Self {
            reconciler: EventReconciler::new(deps, sink, token),
            events: bus.subscribe(),
            close,
            poll_every,
            heartbeat_every,
        }
    }

    /// Override the timer periods.
    #[must_use]
    pub fn with_intervals(mut self, poll: Duration, heartbeat: Duration) -> Self {
        self.poll_every = poll.max(Duration::from_millis(1));
        self.heartbeat_every = heartbeat.max(Duration::from_millis(1));
        self
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    /// Authenticate and send `connected`.
    ///
    /// # Errors
    /// Returns why the connection could not be established; the handle is
    /// closed with that reason.
    pub async fn connect(&mut self) -> Result<String, CloseReason> {
        let result = tokio::select! {
            biased;
            reason = self.close.closed() => return Err(reason),
            result = self.reconciler.connect() => result,
        };
        match result {
            Ok(user) => Ok(user),
            Err(e) => {
                warn!(error = %e, "connection rejected");
                self.reconciler.close();
                self.close.close(CloseReason::from(&e));
                Err(self.close.reason().unwrap_or(CloseReason::from(&e)))
            }
        }
    }

    /// Backfill, then poll until closed. Returns the close reason.
    pub async fn run(self) -> CloseReason {
        let Self {
            mut reconciler,
            mut events,
            close,
            poll_every,
            heartbeat_every,
        } = self;
        let Some(user) = reconciler.user().map(str::to_string) else {
            close.close(CloseReason::Unauthorized);
            reconciler.close();
            return close.reason().unwrap_or(CloseReason::Unauthorized);
        };

        let backfilled = tokio::select! {
            biased;
            _ = close.closed() => Ok(()),
            result = reconciler.backfill() => result,
        };
        if let Err(e) = backfilled {
            close.close(CloseReason::from(&e));
        }

        let start = Instant::now();
        let mut poll = interval_at(start + poll_every, poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval_at(start + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut bus_open = true;

        while !close.is_closed() {
            let wake = tokio::select! {
                biased;
                _ = close.closed() => break,
                _ = poll.tick() => Wake::Poll,
                _ = heartbeat.tick() => Wake::Heartbeat,
                received = events.recv(), if bus_open => match received {
                    Ok(published) if published.event.user() == user => match published.event {
                        DomainEvent::NudgeTriggered { .. } | DomainEvent::BetResolved { .. } => {
                            Wake::Recheck
                        }
                        DomainEvent::SessionRevoked { .. } => Wake::Auth,
                        _ => continue,
                    },
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(user = %user, skipped, "event bus lagged");
                        Wake::Recheck
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        bus_open = false;
                        continue;
                    }
                },
            };

            let result = tokio::select! {
                biased;
                _ = close.closed() => break,
                result = step(&mut reconciler, wake) => result,
            };
            if let Err(e) = result {
                info!(user = %user, error = %e, "closing connection");
                close.close(CloseReason::from(&e));
            }
        }

        reconciler.close();
        let reason = close.reason().unwrap_or(CloseReason::Shutdown);
        info!(user = %user, ?reason, "connection closed");
        reason
    }
}

async fn step<S: FrameSink>(
    reconciler: &mut EventReconciler<S>,
    wake: Wake,
) -> Result<(), ReconcileError> {
    match wake {
        Wake::Poll => reconciler.poll().await,
        Wake::Heartbeat => reconciler.heartbeat().await,
        Wake::Recheck => reconciler.recheck().await,
        Wake::Auth => reconciler.check_auth().await,
    }
}
