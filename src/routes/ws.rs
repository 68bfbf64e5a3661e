//! WebSocket handler: bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, registers the connection with the room and enters a
//! `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames queued by peers (broadcasts, invitations) → forward to client
//!
//! Handlers lock the room, call one synchronous service function, and
//! release. Services queue every event on recipients' channels, including
//! the sender's own, so per-connection delivery order matches mutation
//! order. Only error replies go straight back to the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → connect → send `session:connected` with `sessionId`
//! 2. Client sends frames → dispatch → service mutates room, queues events
//! 3. Close or socket error → disconnect (exactly once) → `presence:left`

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::frame::{Data, ErrorCode, Frame, Status};
use crate::services::invitation::{self, InvitationError};
use crate::services::registry::SessionId;
use crate::services::{E_UNKNOWN_SESSION, connection, movement};
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    // Per-connection channel for frames queued by the room.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);

    let presence = {
        let mut room = state.room.write().await;
        connection::connect(&mut room, client_tx, &state.config)
    };
    let session_id = presence.id;

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("sessionId", session_id.to_string())
        .with_data("nickname", presence.nickname);

    if send_frame(&mut socket, &welcome).await.is_ok() {
        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(msg) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            for reply in process_inbound_text(&state, session_id, text.as_str()).await {
                                let _ = send_frame(&mut socket, &reply).await;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(frame) = client_rx.recv() => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Single exit path: teardown runs once per connection.
    let mut room = state.room.write().await;
    connection::disconnect(&mut room, session_id);
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept separate from the socket so tests can drive dispatch directly.
async fn process_inbound_text(state: &AppState, session_id: SessionId, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%session_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection's own session id as `from`.
    req.from = Some(session_id.to_string());

    if req.syscall != "presence:move" {
        info!(%session_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match req.prefix() {
        "presence" => handle_presence(state, session_id, &req).await,
        "invite" => handle_invite(state, session_id, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(()) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// PRESENCE HANDLERS
// =============================================================================

async fn handle_presence(state: &AppState, session_id: SessionId, req: &Frame) -> Result<(), Frame> {
    match req.op() {
        "identify" => {
            let nickname = req
                .data
                .get("nickname")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let mut room = state.room.write().await;
            connection::identify(&mut room, session_id, nickname, &state.config)
                .map(|_| ())
                .or_else(|e| reject_or_drop(req, session_id, &e))
        }
        "move" => {
            let delta = movement::parse_delta(&req.data).map_err(|e| req.error_from(&e))?;
            let mut room = state.room.write().await;
            movement::apply_movement(&mut room, session_id, &delta)
                .map(|_| ())
                .or_else(|e| reject_or_drop(req, session_id, &e))
        }
        op => Err(req.error(format!("unknown presence op: {op}"))),
    }
}

// =============================================================================
// INVITATION HANDLERS
// =============================================================================

async fn handle_invite(state: &AppState, session_id: SessionId, req: &Frame) -> Result<(), Frame> {
    let config = &state.config;
    match req.op() {
        "send" => {
            let Some(to) = req.data.get("toId").and_then(|v| v.as_str()) else {
                return Err(req.error_from(&InvitationError::MalformedPayload("toId required".into())));
            };
            let minutes = invitation::parse_duration(&req.data, config.max_focus_minutes).map_err(|e| req.error_from(&e))?;
            let mut room = state.room.write().await;
            invitation::send(&mut room, session_id, to, minutes, config)
                .map(|_| ())
                .or_else(|e| reject_or_drop(req, session_id, &e))
        }
        "accept" => {
            let from = invitation::parse_session_id(&req.data, "fromId").map_err(|e| req.error_from(&e))?;
            let mut room = state.room.write().await;
            invitation::accept(&mut room, from, session_id, config)
                .map(|_| ())
                .or_else(|e| reject_or_drop(req, session_id, &e))
        }
        "reject" => {
            let from = invitation::parse_session_id(&req.data, "fromId").map_err(|e| req.error_from(&e))?;
            let mut room = state.room.write().await;
            invitation::reject(&mut room, from, session_id, config)
                .map(|_| ())
                .or_else(|e| reject_or_drop(req, session_id, &e))
        }
        op => Err(req.error(format!("unknown invite op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Unknown-session errors are dropped without a reply; anything else is
/// answered with a structured error frame to the sender only.
fn reject_or_drop(req: &Frame, session_id: SessionId, err: &impl ErrorCode) -> Result<(), Frame> {
    if err.error_code() == E_UNKNOWN_SESSION {
        debug!(%session_id, syscall = %req.syscall, "ws: dropping frame from unknown session");
        return Ok(());
    }
    Err(req.error_from(err))
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.syscall != "presence:moved" {
        debug!(id = %frame.id, syscall = %frame.syscall, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
