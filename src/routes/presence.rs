//! Presence listing: read-only view of who is in the cafe.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::services::registry::PresenceState;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PresenceList {
    pub count: usize,
    pub players: Vec<PresenceState>,
}

/// `GET /api/presence`: identified participants, sorted by nickname.
pub async fn list_presence(State(state): State<AppState>) -> Json<PresenceList> {
    let mut players = state.room.read().await.registry.identified();
    players.sort_by(|a, b| a.nickname.cmp(&b.nickname).then(a.id.cmp(&b.id)));
    Json(PresenceList { count: players.len(), players })
}
