//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the server config and the single `Room`: the presence registry,
//! the outbound sender of every live connection, and the pending
//! invitation table.
//!
//! CONCURRENCY
//! ===========
//! The room sits behind one coarse `RwLock`. Every mutation takes the write
//! guard, applies a synchronous service function, and fans frames out with
//! `try_send` before releasing it. Nothing awaits while the guard is held.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

use crate::config::ServerConfig;
use crate::frame::Frame;
use crate::services::invitation::PendingInvitations;
use crate::services::registry::{Registry, SessionId};

// =============================================================================
// ROOM
// =============================================================================

/// The one shared space every connection lives in.
#[derive(Default)]
pub struct Room {
    pub registry: Registry,
    /// Connected clients: `session_id` -> sender for outgoing frames.
    pub clients: HashMap<SessionId, mpsc::Sender<Frame>>,
    pub invitations: PendingInvitations,
}

impl Room {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a frame to every connected client except `exclude`.
    /// Returns the number of clients the frame was queued for.
    pub fn broadcast(&self, frame: &Frame, exclude: Option<SessionId>) -> usize {
        let mut queued = 0;
        for (session_id, tx) in &self.clients {
            if exclude == Some(*session_id) {
                continue;
            }
            // Best-effort: a full or closed channel drops the frame.
            if tx.try_send(frame.clone()).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    /// Send a frame to one client. Returns `false` if the client is gone
    /// or its queue is full.
    pub fn send_to(&self, session_id: &SessionId, frame: Frame) -> bool {
        let Some(tx) = self.clients.get(session_id) else {
            return false;
        };
        tx.try_send(frame).is_ok()
    }

    /// A session is online while its connection is registered.
    #[must_use]
    pub fn is_online(&self, session_id: &SessionId) -> bool {
        self.clients.contains_key(session_id) && self.registry.contains(session_id)
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub room: Arc<RwLock<Room>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { room: Arc::new(RwLock::new(Room::new())), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::services;
    use tokio::time::{Duration, timeout};

    /// Create a test `AppState` with default config.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(ServerConfig::default())
    }

    /// Register a connection the way the websocket handler does.
    pub async fn connect(state: &AppState) -> (SessionId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(64);
        let mut room = state.room.write().await;
        let presence = services::connection::connect(&mut room, tx, &state.config);
        (presence.id, rx)
    }

    /// Connect and identify, then discard the frames produced along the way.
    pub async fn connect_identified(state: &AppState, nickname: &str) -> (SessionId, mpsc::Receiver<Frame>) {
        let (id, mut rx) = connect(state).await;
        {
            let mut room = state.room.write().await;
            services::connection::identify(&mut room, id, nickname, &state.config)
                .expect("identify should succeed");
        }
        drain(&mut rx);
        (id, rx)
    }

    pub async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("frame receive timed out")
            .expect("channel closed")
    }

    pub async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
        assert!(
            timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
            "expected channel to remain empty"
        );
    }

    /// Pop everything currently queued.
    pub fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
