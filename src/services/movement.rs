//! Movement service: merge presence deltas and relay them to peers.
//!
//! DESIGN
//! ======
//! A movement frame carries any subset of position, direction, walking flag
//! and animation frame. The delta is merged into the registry and the full
//! resulting state is broadcast as `presence:moved` to every other session.
//! The sender never receives its own update.
//!
//! TRADE-OFFS
//! ==========
//! No dedup or throttling: a client sending at frame rate produces
//! broadcasts at frame rate. The room is small enough for that.

use crate::frame::{Data, Frame};
use crate::services::connection::presence_to_data;
use crate::services::registry::{Position, PresenceDelta, SessionId};
use crate::state::Room;

#[derive(Debug, thiserror::Error)]
pub enum MovementError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl crate::frame::ErrorCode for MovementError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => super::E_UNKNOWN_SESSION,
            Self::MalformedPayload(_) => super::E_MALFORMED_PAYLOAD,
        }
    }
}

/// Parse a movement payload. Absent or `null` fields are left out of the
/// delta; present fields of the wrong shape reject the whole message.
///
/// # Errors
///
/// `MalformedPayload` naming the first invalid field.
pub fn parse_delta(data: &Data) -> Result<PresenceDelta, MovementError> {
    let field = |key: &str| data.get(key).filter(|v| !v.is_null());
    let malformed = |key: &str| MovementError::MalformedPayload(format!("invalid {key}"));

    let position = field("position")
        .map(|v| serde_json::from_value::<Position>(v.clone()).map_err(|_| malformed("position")))
        .transpose()?;

    let direction = field("direction")
        .map(|v| {
            v.as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| malformed("direction"))
        })
        .transpose()?;

    let is_walking = field("isWalking")
        .map(|v| v.as_bool().ok_or_else(|| malformed("isWalking")))
        .transpose()?;

    let animation_frame = field("animationFrame")
        .or_else(|| field("frame"))
        .map(|v| {
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| malformed("animationFrame"))
        })
        .transpose()?;

    Ok(PresenceDelta { position, direction, is_walking, animation_frame })
}

/// Merge `delta` into the sender's presence and broadcast the full state to
/// every other session. Returns how many peers the update was queued for;
/// an empty delta changes nothing and reaches nobody.
///
/// # Errors
///
/// `UnknownSession` if the sender is gone or has not identified yet.
pub fn apply_movement(room: &mut Room, session_id: SessionId, delta: &PresenceDelta) -> Result<usize, MovementError> {
    if !room.registry.is_identified(&session_id) {
        return Err(MovementError::UnknownSession(session_id));
    }
    if delta.is_empty() {
        return Ok(0);
    }

    let Some(presence) = room.registry.upsert(&session_id, delta) else {
        return Err(MovementError::UnknownSession(session_id));
    };
    let frame = Frame::request("presence:moved", presence_to_data(presence)).with_from(session_id.to_string());

    Ok(room.broadcast(&frame, Some(session_id)))
}

#[cfg(test)]
#[path = "movement_test.rs"]
mod tests;
