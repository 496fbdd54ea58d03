//! HTTP routes.
//!
//! Task mutations publish their domain event with a correlation id and wait
//! (bounded) for the rule dispatcher to report what the rules did. Every
//! other route is a thin call into a store.

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{async_trait, Json, Router};
use chrono::{DateTime, Utc};
use nudgeroom_core::collab::{EmotionEntry, Task, TaskChange};
use nudgeroom_core::{ActionLog, Auth, Bet, CloseReason, LedgerEntry, Nudge};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws;

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(ws::events))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", delete(delete_task))
        .route("/tasks/:id/start", post(start_task))
        .route("/tasks/:id/complete", post(complete_task))
        .route("/bets", get(list_bets).post(place_bet))
        .route("/bets/:task", delete(cancel_bet))
        .route("/ledger", get(ledger))
        .route("/nudges", get(list_nudges))
        .route("/emotions", post(log_emotion))
        .route("/logout", post(logout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pull the bearer token out of an `Authorization` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The user behind a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let user = state.services.sessions.current_user(token).await?;
        Ok(Self(user))
    }
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    task: Task,
    /// Absent when the rules did not finish within the dispatch timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    actions: Option<ActionLog>,
}

/// Publish `change`'s event and wait for the dispatcher's log.
async fn publish_and_wait(state: &AppState, change: TaskChange, status: StatusCode) -> Response {
    let TaskChange { task, event } = change;
    let pending = state.correlations.register();
    state
        .services
        .bus
        .publish_correlated(event, pending.as_ref().map(|p| p.id()));

    let actions = match pending {
        Some(pending) => pending.wait(state.dispatch_timeout).await,
        None => None,
    };
    if actions.is_none() {
        debug!(task = %task.id, "rule results not ready; answering 202");
    }
    let status = if actions.is_some() { status } else { StatusCode::ACCEPTED };
    (status, Json(TaskResponse { task, actions })).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateTask {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    due: Option<DateTime<Utc>>,
}

async fn create_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateTask>,
) -> Result<Response, ApiError> {
    let change = state
        .services
        .tasks
        .create(&user, &body.title, &body.description, body.due)
        .await?;
    Ok(publish_and_wait(&state, change, StatusCode::CREATED).await)
}

async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.services.tasks.list(&user).await?))
}

async fn start_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let change = state.services.tasks.start(&user, &id).await?;
    Ok(publish_and_wait(&state, change, StatusCode::OK).await)
}

async fn complete_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let change = state.services.tasks.complete(&user, &id).await?;
    Ok(publish_and_wait(&state, change, StatusCode::OK).await)
}

async fn delete_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let change = state.services.tasks.delete(&user, &id).await?;
    Ok(publish_and_wait(&state, change, StatusCode::OK).await)
}

#[derive(Debug, Deserialize)]
struct PlaceBet {
    task: String,
    wager: i64,
    deadline: DateTime<Utc>,
}

async fn place_bet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<PlaceBet>,
) -> Result<(StatusCode, Json<Bet>), ApiError> {
    let task = state
        .services
        .tasks
        .get(&user, &body.task)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", body.task)))?;
    let bet = state
        .services
        .wagers
        .place(&user, &task.id, body.wager, body.deadline, task.due)
        .await?;
    Ok((StatusCode::CREATED, Json(bet)))
}

async fn cancel_bet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (bet, refunded) = state.services.wagers.cancel(&user, &task).await?;
    Ok(Json(json!({ "bet": bet, "refunded": refunded })))
}

async fn list_bets(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Bet>>, ApiError> {
    Ok(Json(state.services.wagers.list_for_user(&user).await?))
}

async fn ledger(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<LedgerEntry>, ApiError> {
    Ok(Json(state.services.ledger.balance(&user).await?))
}

async fn list_nudges(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Nudge>>, ApiError> {
    Ok(Json(state.services.reminders.list_for_user(&user).await?))
}

#[derive(Debug, Deserialize)]
struct LogEmotion {
    emotion: String,
    #[serde(default)]
    note: Option<String>,
}

async fn log_emotion(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<LogEmotion>,
) -> Result<(StatusCode, Json<EmotionEntry>), ApiError> {
    let entry = state
        .services
        .emotions
        .log(&user, &body.emotion, body.note.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let revoked = state.services.sessions.revoke_user(&user).await?;
    let closed = state.registry.close_user(&user, CloseReason::LoggedOut);
    info!(user = %user, revoked, closed, "logged out");
    Ok(Json(json!({ "revoked": revoked, "closed": closed })))
}
