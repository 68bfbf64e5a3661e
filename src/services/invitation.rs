//! Invitation service: paired focus-session handshake.
//!
//! DESIGN
//! ======
//! State machine per `(from, to)` pair:
//!
//! ```text
//! SENT ──accept──▶ ACCEPTED   (focus:start to both)
//!   │ ──reject──▶ REJECTED   (invite:rejected to sender)
//!   │ ──re-send─▶ SUPERSEDED (replaced by the newer invitation)
//!   │ ──cross───▶ SUPERSEDED (reverse pair accepted first)
//!   │ ──ttl─────▶ EXPIRED    (checked lazily, invite:expired to accepter)
//!   └ ──leave───▶ ABANDONED  (invite:cancelled to target if sender left)
//! ```
//!
//! Pending invitations live in the room only while both endpoints are
//! connected; disconnect purges every invitation involving the session, so
//! a stale accept can never start a session with a departed partner.
//!
//! TRADE-OFFS
//! ==========
//! Accept notifies the inviter best-effort but always starts the accepter's
//! session: if the inviter's channel is already closed or full, the accepter
//! has still committed to focus.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::frame::{Data, Frame};
use crate::services::registry::SessionId;
use crate::state::Room;

/// Advisory text for `invite:offline`.
pub const TARGET_OFFLINE_MESSAGE: &str = "The player is no longer online.";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl crate::frame::ErrorCode for InvitationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => super::E_UNKNOWN_SESSION,
            Self::MalformedPayload(_) => super::E_MALFORMED_PAYLOAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvitation {
    pub from_nickname: String,
    pub duration_minutes: u32,
    pub sent_at: Instant,
}

impl PendingInvitation {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.sent_at) > ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered to the target. `superseded` if it replaced a pending one.
    Delivered { superseded: bool },
    /// Target not connected; sender got `invite:offline`.
    TargetOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Both `focus:start` signals emitted; `inviter_notified` is false if
    /// the inviter's channel refused the frame.
    Started { inviter_notified: bool },
    /// Invitation outlived its TTL; accepter got `invite:expired`.
    Expired,
    /// No pending invitation (never sent, already resolved, or abandoned).
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectOutcome {
    /// `invite:rejected` queued for the inviter.
    Notified,
    /// Inviter unreachable; rejection discarded.
    Discarded,
    /// No live pending invitation.
    Stale,
}

// =============================================================================
// PENDING TABLE
// =============================================================================

/// Transient invitations keyed by `(from, to)`.
#[derive(Debug, Default)]
pub struct PendingInvitations {
    pending: HashMap<(SessionId, SessionId), PendingInvitation>,
}

impl PendingInvitations {
    /// Record an invitation, returning the one it supersedes.
    pub fn insert(&mut self, from: SessionId, to: SessionId, invitation: PendingInvitation) -> Option<PendingInvitation> {
        self.pending.insert((from, to), invitation)
    }

    #[cfg(test)]
    #[must_use]
    pub fn get(&self, from: SessionId, to: SessionId) -> Option<&PendingInvitation> {
        self.pending.get(&(from, to))
    }

    pub fn take(&mut self, from: SessionId, to: SessionId) -> Option<PendingInvitation> {
        self.pending.remove(&(from, to))
    }

    /// Remove every invitation sent by or to `session_id`.
    pub fn remove_involving(&mut self, session_id: SessionId) -> Vec<(SessionId, SessionId)> {
        let keys: Vec<_> = self
            .pending
            .keys()
            .filter(|(from, to)| *from == session_id || *to == session_id)
            .copied()
            .collect();
        for key in &keys {
            self.pending.remove(key);
        }
        keys
    }

    /// Drop invitations older than `ttl`. Returns how many were dropped.
    pub fn prune_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, inv| !inv.is_expired(now, ttl));
        before - self.pending.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// PAYLOAD PARSING
// =============================================================================

/// Read `durationMinutes` (or legacy `duration`) and check it lies in
/// `1..=max_minutes`.
///
/// # Errors
///
/// `MalformedPayload` if missing, not an integer, or out of range.
pub fn parse_duration(data: &Data, max_minutes: u32) -> Result<u32, InvitationError> {
    let Some(raw) = data
        .get("durationMinutes")
        .or_else(|| data.get("duration"))
        .and_then(serde_json::Value::as_u64)
    else {
        return Err(InvitationError::MalformedPayload("durationMinutes required".into()));
    };
    match u32::try_from(raw) {
        Ok(minutes) if (1..=max_minutes).contains(&minutes) => Ok(minutes),
        _ => Err(InvitationError::MalformedPayload(format!(
            "durationMinutes must be between 1 and {max_minutes}"
        ))),
    }
}

/// Read a session id field.
///
/// # Errors
///
/// `MalformedPayload` if the field is missing or not a UUID.
pub fn parse_session_id(data: &Data, key: &str) -> Result<SessionId, InvitationError> {
    data.get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Uuid>().ok())
        .ok_or_else(|| InvitationError::MalformedPayload(format!("{key} required")))
}

// =============================================================================
// SEND
// =============================================================================

/// Deliver an invitation from `from` to the session named by `to`.
///
/// `to` is kept raw: an id that does not parse can never be online, so it
/// gets the same `invite:offline` advisory as a departed session.
///
/// # Errors
///
/// `UnknownSession` if the sender has not identified, `MalformedPayload`
/// for a self-invitation.
pub fn send(
    room: &mut Room,
    from: SessionId,
    to: &str,
    duration_minutes: u32,
    config: &ServerConfig,
) -> Result<SendOutcome, InvitationError> {
    let Some(from_nickname) = room
        .registry
        .get(&from)
        .filter(|_| room.registry.is_identified(&from))
        .map(|p| p.nickname.clone())
    else {
        return Err(InvitationError::UnknownSession(from));
    };

    let target = to.parse::<Uuid>().ok().filter(|id| room.is_online(id));
    let Some(to_id) = target else {
        let notice = Frame::request("invite:offline", Data::new())
            .with_data("toId", to)
            .with_data("message", TARGET_OFFLINE_MESSAGE);
        room.send_to(&from, notice);
        info!(from = %from, to, "invitation target offline");
        return Ok(SendOutcome::TargetOffline);
    };
    if to_id == from {
        return Err(InvitationError::MalformedPayload("cannot invite yourself".into()));
    }

    let now = Instant::now();
    room.invitations.prune_expired(now, config.invite_ttl);
    let superseded = room
        .invitations
        .insert(
            from,
            to_id,
            PendingInvitation { from_nickname: from_nickname.clone(), duration_minutes, sent_at: now },
        )
        .is_some();

    let frame = Frame::request("invite:received", Data::new())
        .with_from(from.to_string())
        .with_data("fromId", from.to_string())
        .with_data("fromNickname", from_nickname)
        .with_data("durationMinutes", duration_minutes);
    room.send_to(&to_id, frame);

    info!(%from, to = %to_id, duration_minutes, superseded, pending = room.invitations.len(), "invitation sent");
    Ok(SendOutcome::Delivered { superseded })
}

// =============================================================================
// ACCEPT / REJECT
// =============================================================================

/// Resolve the pending `from -> accepter` invitation as accepted and start
/// the paired focus session.
///
/// # Errors
///
/// `UnknownSession` if the accepter has not identified.
pub fn accept(
    room: &mut Room,
    from: SessionId,
    accepter: SessionId,
    config: &ServerConfig,
) -> Result<AcceptOutcome, InvitationError> {
    if !room.registry.is_identified(&accepter) {
        return Err(InvitationError::UnknownSession(accepter));
    }

    let Some(invitation) = room.invitations.take(from, accepter) else {
        debug!(%from, %accepter, "accept without pending invitation; dropping");
        return Ok(AcceptOutcome::Stale);
    };

    if invitation.is_expired(Instant::now(), config.invite_ttl) {
        let notice = Frame::request("invite:expired", Data::new()).with_data("fromId", from.to_string());
        room.send_to(&accepter, notice);
        info!(%from, %accepter, "accepted invitation had expired");
        return Ok(AcceptOutcome::Expired);
    }

    // A crossed invitation between the same pair would start them twice.
    let crossed = room.invitations.take(accepter, from).is_some();

    let minutes = invitation.duration_minutes;
    let inviter_notified = room.send_to(&from, focus_start(minutes, accepter));
    room.send_to(&accepter, focus_start(minutes, from));

    info!(%from, %accepter, duration_minutes = minutes, inviter_notified, crossed, "invitation accepted");
    Ok(AcceptOutcome::Started { inviter_notified })
}

/// Resolve the pending `from -> rejecter` invitation as rejected. The
/// notice carries the rejecter's registered nickname.
///
/// # Errors
///
/// `UnknownSession` if the rejecter has not identified.
pub fn reject(
    room: &mut Room,
    from: SessionId,
    rejecter: SessionId,
    config: &ServerConfig,
) -> Result<RejectOutcome, InvitationError> {
    let Some(by_nickname) = room
        .registry
        .get(&rejecter)
        .filter(|_| room.registry.is_identified(&rejecter))
        .map(|p| p.nickname.clone())
    else {
        return Err(InvitationError::UnknownSession(rejecter));
    };

    let live = room
        .invitations
        .take(from, rejecter)
        .filter(|inv| !inv.is_expired(Instant::now(), config.invite_ttl));
    if live.is_none() {
        debug!(%from, %rejecter, "reject without live invitation; dropping");
        return Ok(RejectOutcome::Stale);
    }

    let notice = Frame::request("invite:rejected", Data::new()).with_data("byNickname", by_nickname.clone());
    if room.send_to(&from, notice) {
        info!(%from, %rejecter, by = %by_nickname, "invitation rejected");
        Ok(RejectOutcome::Notified)
    } else {
        debug!(%from, %rejecter, "inviter unreachable; rejection discarded");
        Ok(RejectOutcome::Discarded)
    }
}

// =============================================================================
// ABANDON
// =============================================================================

/// Purge every pending invitation involving a departing session. Targets
/// of invitations the session sent get `invite:cancelled`.
pub fn abandon(room: &mut Room, session_id: SessionId) {
    if room.invitations.is_empty() {
        return;
    }
    for (from, to) in room.invitations.remove_involving(session_id) {
        if from == session_id {
            let notice = Frame::request("invite:cancelled", Data::new()).with_data("fromId", from.to_string());
            room.send_to(&to, notice);
        }
        info!(%from, %to, "invitation abandoned");
    }
}

fn focus_start(duration_minutes: u32, partner: SessionId) -> Frame {
    Frame::request("focus:start", Data::new())
        .with_data("durationMinutes", duration_minutes)
        .with_data("partnerId", partner.to_string())
}

#[cfg(test)]
#[path = "invitation_test.rs"]
mod tests;
