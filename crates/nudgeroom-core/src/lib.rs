//! # Nudgeroom Core Library
//!
//! Core logic for Nudgeroom: tasks carry optional point wagers and
//! generated reminder nudges, and every open client connection is kept in
//! step with store state by a per-connection reconciler.
//!
//! ## Architecture
//!
//! - **Stores**: SQLite-backed [`WagerStore`], [`ReminderStore`], [`Ledger`]
//!   and [`CheckpointStore`]. Terminal transitions are conditional writes, so
//!   concurrent observers resolve each record exactly once.
//! - **Reconciler**: [`EventReconciler`] backfills, polls and streams
//!   [`Frame`]s; [`ConnectionSupervisor`] drives it with timers and bus
//!   wake-ups until a [`CloseReason`] ends it.
//! - **Rules**: typed trigger/action rules turn task events into store calls.
//! - **Generator**: [`MessageGenerator`] implementations write nudge text.
//!
//! ## Key Components
//!
//! - [`Services`]: all stores wired over one database, clock and bus
//! - [`Config`]: TOML configuration
//! - [`EventBus`]: broadcast of [`DomainEvent`]s

pub mod checkpoint;
pub mod clock;
pub mod collab;
pub mod error;
pub mod events;
pub mod generator;
pub mod ledger;
pub mod reconciler;
pub mod reminder;
pub mod rules;
pub mod services;
pub mod storage;
pub mod sweep;
pub mod wager;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collab::{Auth, EmotionLogger, TaskManager};
pub use error::{ConfigError, CoreError, DatabaseError, ValidationError};
pub use events::{CorrelationId, DomainEvent, EventBus, Published};
pub use generator::{MessageGenerator, NudgeContext};
pub use ledger::{Ledger, LedgerEntry};
pub use reconciler::{
    CloseHandle, CloseReason, ConnectionSupervisor, EventReconciler, Frame, FrameSink,
};
pub use reminder::{Nudge, ReminderStore, TriggerOutcome};
pub use rules::{ActionExecutor, ActionLog, RuleEngine, RuleStore};
pub use services::Services;
pub use storage::{Config, Database};
pub use sweep::Sweeper;
pub use wager::{Bet, ResolveOutcome, WagerStore};
