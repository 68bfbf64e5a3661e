//! Player registry: authoritative in-memory presence map.
//!
//! DESIGN
//! ======
//! Pure data owner: no channels, no frames, no locking. The `Room` owns the
//! only instance and every mutation goes through the operations below, so
//! clients only ever see copies (snapshots and events).
//!
//! An entry exists from connect to disconnect. It becomes visible to peers
//! (snapshots, `identified()`) only once the session has identified.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-connection identifier.
pub type SessionId = Uuid;

// =============================================================================
// PRESENCE STATE
// =============================================================================

/// Pixel coordinates of an avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub top: i32,
    pub left: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        };
        f.write_str(s)
    }
}

/// Position, animation and identity of one connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub id: SessionId,
    pub nickname: String,
    pub position: Position,
    pub direction: Direction,
    pub is_walking: bool,
    #[serde(alias = "frame")]
    pub animation_frame: u32,
}

impl PresenceState {
    /// Fresh state at `spawn` with idle animation fields.
    #[must_use]
    pub fn spawn(id: SessionId, nickname: impl Into<String>, spawn: Position) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            position: spawn,
            direction: Direction::default(),
            is_walking: false,
            animation_frame: 0,
        }
    }
}

/// Subset of presence fields carried by a movement message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceDelta {
    pub position: Option<Position>,
    pub direction: Option<Direction>,
    pub is_walking: Option<bool>,
    pub animation_frame: Option<u32>,
}

impl PresenceDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.direction.is_none() && self.is_walking.is_none() && self.animation_frame.is_none()
    }

    fn apply_to(&self, state: &mut PresenceState) {
        if let Some(position) = self.position {
            state.position = position;
        }
        if let Some(direction) = self.direction {
            state.direction = direction;
        }
        if let Some(is_walking) = self.is_walking {
            state.is_walking = is_walking;
        }
        if let Some(frame) = self.animation_frame {
            state.animation_frame = frame;
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Result of a successful `identify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identified {
    /// First identify for the session; nickname was set.
    First,
    /// Session already identified; nothing changed.
    Repeat,
}

#[derive(Debug)]
struct Entry {
    state: PresenceState,
    identified: bool,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<SessionId, Entry>,
}

impl Registry {
    #[cfg(test)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly connected, not yet identified session.
    /// Replaces any stale entry with the same id.
    pub fn insert(&mut self, state: PresenceState) {
        self.entries.insert(state.id, Entry { state, identified: false });
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&PresenceState> {
        self.entries.get(id).map(|e| &e.state)
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn is_identified(&self, id: &SessionId) -> bool {
        self.entries.get(id).is_some_and(|e| e.identified)
    }

    /// Set the nickname once. Returns `None` for an unknown session.
    pub fn identify(&mut self, id: &SessionId, nickname: &str) -> Option<Identified> {
        let entry = self.entries.get_mut(id)?;
        if entry.identified {
            return Some(Identified::Repeat);
        }
        entry.state.nickname = nickname.to_string();
        entry.identified = true;
        Some(Identified::First)
    }

    /// Merge `delta` into an existing entry and return the full result.
    /// Unspecified fields are left untouched. Returns `None` for an unknown session.
    pub fn upsert(&mut self, id: &SessionId, delta: &PresenceDelta) -> Option<&PresenceState> {
        let entry = self.entries.get_mut(id)?;
        delta.apply_to(&mut entry.state);
        Some(&entry.state)
    }

    /// Remove an entry. Removing an absent id is a no-op returning `None`.
    pub fn remove(&mut self, id: &SessionId) -> Option<PresenceState> {
        self.entries.remove(id).map(|e| e.state)
    }

    /// Copies of every identified entry except `exclude`.
    #[must_use]
    pub fn snapshot_excluding(&self, exclude: &SessionId) -> HashMap<SessionId, PresenceState> {
        self.entries
            .iter()
            .filter(|(id, e)| e.identified && *id != exclude)
            .map(|(id, e)| (*id, e.state.clone()))
            .collect()
    }

    /// Copies of every identified entry.
    #[must_use]
    pub fn identified(&self) -> Vec<PresenceState> {
        self.entries
            .values()
            .filter(|e| e.identified)
            .map(|e| e.state.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn identified_len(&self) -> usize {
        self.entries.values().filter(|e| e.identified).count()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
