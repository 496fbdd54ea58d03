//! `GET /events`: the per-connection event stream.
//!
//! The token is checked before the upgrade so a bad one gets a plain 401.
//! After that the socket is split: a writer task drains the supervisor's
//! frame channel into the socket, a reader task watches for the client
//! leaving, and the supervisor runs on the handler's task.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nudgeroom_core::reconciler::ChannelSink;
use nudgeroom_core::{Auth, CloseHandle, CloseReason, ConnectionSupervisor, Frame};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::bearer_token;
use crate::error::ApiError;
use crate::state::AppState;

const FRAME_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    token: Option<String>,
}

pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string))
        .ok_or(ApiError::Unauthorized)?;
    let user = state.services.sessions.current_user(&token).await?;
    debug!(user = %user, "upgrading event stream");
    Ok(upgrade.on_upgrade(move |socket| serve(socket, state, token)))
}

async fn serve(socket: WebSocket, state: AppState, token: String) {
    let (tx, rx) = socket.split();
    let close = CloseHandle::new();
    let (sink, frames) = ChannelSink::new(FRAME_BUFFER);

    let writer = tokio::spawn(write_frames(tx, frames, close.clone()));
    let reader = tokio::spawn(watch_client(rx, close.clone()));

    let mut supervisor = ConnectionSupervisor::new(
        state.services.reconciler_deps(),
        sink,
        token,
        &state.services.bus,
        close.clone(),
    );
    match supervisor.connect().await {
        Ok(user) => {
            let _registration = state.registry.register(&user, close.clone());
            info!(user = %user, open = state.registry.count(), "event stream opened");
            supervisor.run().await;
        }
        Err(reason) => {
            debug!(?reason, "event stream refused");
            drop(supervisor);
        }
    }

    reader.abort();
    if let Err(e) = writer.await {
        warn!(error = %e, "event stream writer failed");
    }
}

/// Forward frames until the supervisor drops its sink, then send a close
/// frame carrying the reason.
async fn write_frames(
    mut tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Frame>,
    close: CloseHandle,
) {
    while let Some(frame) = frames.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "frame encoding failed");
                continue;
            }
        };
        if let Err(e) = tx.send(Message::Text(text)).await {
            debug!(error = %e, "event stream write failed");
            close.close(CloseReason::TransportFailed);
            return;
        }
    }

    let reason = close.reason().unwrap_or(CloseReason::Shutdown);
    if reason == CloseReason::ClientGone || reason == CloseReason::TransportFailed {
        return;
    }
    let (code, text) = close_frame(reason);
    let _ = tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: text.into(),
        })))
        .await;
}

async fn watch_client(mut rx: SplitStream<WebSocket>, close: CloseHandle) {
    loop {
        match rx.next().await {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(error = %e, "event stream read failed");
                break;
            }
            Some(Ok(_)) => {}
        }
    }
    close.close(CloseReason::ClientGone);
}

fn close_frame(reason: CloseReason) -> (u16, &'static str) {
    match reason {
        CloseReason::ClientGone => (close_code::NORMAL, "client_gone"),
        CloseReason::TransportFailed => (close_code::ERROR, "transport_failed"),
        CloseReason::Unauthorized => (close_code::POLICY, "unauthorized"),
        CloseReason::LoggedOut => (close_code::POLICY, "logged_out"),
        CloseReason::Shutdown => (close_code::AWAY, "shutdown"),
        CloseReason::ServerError => (close_code::ERROR, "server_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_close_with_policy_code() {
        assert_eq!(close_frame(CloseReason::LoggedOut).0, close_code::POLICY);
        assert_eq!(close_frame(CloseReason::Unauthorized).0, close_code::POLICY);
        assert_eq!(close_frame(CloseReason::Shutdown).0, close_code::AWAY);
    }
}
