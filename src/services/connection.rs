//! Connection service: session lifecycle (connect, identify, disconnect).
//!
//! DESIGN
//! ======
//! A session gets a registry entry and an outbound channel at connect, but
//! stays invisible to peers until it identifies. The first identify answers
//! with a snapshot of everyone else and announces the newcomer. Disconnect
//! is idempotent: only the call that actually removes the entry announces
//! the departure.

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::frame::{Data, Frame};
use crate::services::invitation;
use crate::services::registry::{Identified, PresenceState, SessionId};
use crate::state::Room;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IdentifyError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl crate::frame::ErrorCode for IdentifyError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => super::E_UNKNOWN_SESSION,
            Self::MalformedPayload(_) => super::E_MALFORMED_PAYLOAD,
        }
    }
}

// =============================================================================
// CONNECT
// =============================================================================

/// Register a new connection and return its initial presence.
pub fn connect(room: &mut Room, tx: mpsc::Sender<Frame>, config: &ServerConfig) -> PresenceState {
    let session_id = Uuid::new_v4();
    let presence = PresenceState::spawn(session_id, placeholder_nickname(), config.spawn);

    room.registry.insert(presence.clone());
    room.clients.insert(session_id, tx);

    info!(%session_id, nickname = %presence.nickname, online = room.registry.len(), "session connected");
    presence
}

/// Server-chosen nickname used until the client identifies.
#[must_use]
pub fn placeholder_nickname() -> String {
    let n: u32 = rand::rng().random_range(0..1000);
    format!("Guest_{n}")
}

// =============================================================================
// IDENTIFY
// =============================================================================

/// Set the session's nickname. The first identify sends the session a
/// `presence:snapshot` and broadcasts `presence:joined` to everyone else;
/// repeats change nothing.
///
/// # Errors
///
/// `MalformedPayload` for an empty or over-long nickname, `UnknownSession`
/// if the session is no longer registered.
pub fn identify(
    room: &mut Room,
    session_id: SessionId,
    nickname: &str,
    config: &ServerConfig,
) -> Result<Identified, IdentifyError> {
    let nickname = validate_nickname(nickname, config.max_nickname_len)?;

    match room.registry.identify(&session_id, &nickname) {
        None => Err(IdentifyError::UnknownSession(session_id)),
        Some(Identified::Repeat) => {
            debug!(%session_id, "identify repeated; ignoring");
            Ok(Identified::Repeat)
        }
        Some(Identified::First) => {
            let snapshot = room.registry.snapshot_excluding(&session_id);
            let peers = snapshot.len();
            let frame = Frame::request("presence:snapshot", Data::new())
                .with_data("players", serde_json::to_value(&snapshot).unwrap_or_default());
            room.send_to(&session_id, frame);

            if let Some(presence) = room.registry.get(&session_id) {
                let joined = Frame::request("presence:joined", presence_to_data(presence)).with_from(session_id.to_string());
                room.broadcast(&joined, Some(session_id));
            }

            info!(%session_id, %nickname, peers, identified = room.registry.identified_len(), "session identified");
            Ok(Identified::First)
        }
    }
}

fn validate_nickname(raw: &str, max_len: usize) -> Result<String, IdentifyError> {
    let nickname = raw.trim();
    if nickname.is_empty() {
        return Err(IdentifyError::MalformedPayload("nickname required".into()));
    }
    if nickname.chars().count() > max_len {
        return Err(IdentifyError::MalformedPayload(format!("nickname longer than {max_len} characters")));
    }
    Ok(nickname.to_string())
}

// =============================================================================
// DISCONNECT
// =============================================================================

/// Tear down a session: drop its channel and registry entry, abandon its
/// pending invitations, and broadcast `presence:left` to the remaining
/// sessions. Returns `false` if the session was already gone.
pub fn disconnect(room: &mut Room, session_id: SessionId) -> bool {
    room.clients.remove(&session_id);

    let Some(presence) = room.registry.remove(&session_id) else {
        debug!(%session_id, "disconnect for absent session; ignoring");
        return false;
    };

    invitation::abandon(room, session_id);

    let left = Frame::request("presence:left", Data::new())
        .with_data("id", session_id.to_string())
        .with_from(session_id.to_string());
    room.broadcast(&left, None);

    info!(
        %session_id,
        nickname = %presence.nickname,
        online = room.registry.len(),
        identified = room.registry.identified_len(),
        "session disconnected"
    );
    if room.registry.is_empty() {
        debug!("cafe is empty");
    }
    true
}

// =============================================================================
// HELPERS
// =============================================================================

/// Flatten a presence record into frame data.
pub(crate) fn presence_to_data(presence: &PresenceState) -> Data {
    match serde_json::to_value(presence) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => Data::new(),
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
