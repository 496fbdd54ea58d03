//! HTTP and WebSocket surface for Nudgeroom.
//!
//! Handlers share an [`AppState`]. Task routes hand their events to the
//! [`RuleDispatcher`] through the bus and wait on the [`CorrelationTable`];
//! event streams are tracked in the [`ConnectionRegistry`] so logout and
//! shutdown can close them.

pub mod api;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod state;
pub mod ws;

pub use api::router;
pub use correlation::{CorrelationTable, PendingReply};
pub use dispatch::RuleDispatcher;
pub use error::ApiError;
pub use registry::{ConnectionRegistry, Registration};
pub use state::AppState;
