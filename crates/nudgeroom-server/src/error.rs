//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nudgeroom_core::collab::CollabError;
use nudgeroom_core::ledger::LedgerError;
use nudgeroom_core::reminder::ReminderError;
use nudgeroom_core::wager::WagerError;
use nudgeroom_core::DatabaseError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid session token")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<CollabError> for ApiError {
    fn from(err: CollabError) -> Self {
        match err {
            CollabError::TaskNotFound(_) => Self::NotFound(err.to_string()),
            CollabError::InvalidToken => Self::Unauthorized,
            CollabError::InvalidTransition(_) => Self::Conflict(err.to_string()),
            CollabError::Empty(_) => Self::BadRequest(err.to_string()),
            CollabError::Database(e) => e.into(),
        }
    }
}

impl From<WagerError> for ApiError {
    fn from(err: WagerError) -> Self {
        match err {
            WagerError::InvalidWager(_)
            | WagerError::DeadlineInPast { .. }
            | WagerError::DeadlineAfterDue { .. } => Self::BadRequest(err.to_string()),
            WagerError::InsufficientPoints { .. }
            | WagerError::Duplicate { .. }
            | WagerError::MissedDeadline { .. }
            | WagerError::NotExpired { .. } => Self::Conflict(err.to_string()),
            WagerError::NotFound { .. } => Self::NotFound(err.to_string()),
            WagerError::Database(e) => e.into(),
        }
    }
}

impl From<ReminderError> for ApiError {
    fn from(err: ReminderError) -> Self {
        match err {
            ReminderError::PastTime { .. } => Self::BadRequest(err.to_string()),
            ReminderError::Duplicate { .. } | ReminderError::AlreadyTerminal { .. } => {
                Self::Conflict(err.to_string())
            }
            ReminderError::NotFound { .. } => Self::NotFound(err.to_string()),
            ReminderError::Generator(_) => Self::Internal(err.to_string()),
            ReminderError::Database(e) => e.into(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Database(e) => e.into(),
            other => Self::BadRequest(other.to_string()),
        }
    }
}
