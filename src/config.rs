//! Server configuration parsed from environment variables.

use std::time::Duration;

use crate::services::registry::Position;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_INVITE_TTL_SECS: u64 = 120;
pub const DEFAULT_MAX_FOCUS_MINUTES: u32 = 180;
pub const DEFAULT_MAX_NICKNAME_LEN: usize = 32;
pub const DEFAULT_SPAWN: Position = Position { top: 300, left: 400 };

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Outbound frame queue per connection. Frames beyond this are dropped.
    pub client_channel_capacity: usize,
    pub invite_ttl: Duration,
    pub max_focus_minutes: u32,
    pub max_nickname_len: usize,
    pub spawn: Position,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            invite_ttl: Duration::from_secs(DEFAULT_INVITE_TTL_SECS),
            max_focus_minutes: DEFAULT_MAX_FOCUS_MINUTES,
            max_nickname_len: DEFAULT_MAX_NICKNAME_LEN,
            spawn: DEFAULT_SPAWN,
        }
    }
}

impl ServerConfig {
    /// Build typed server config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3001 (an unparseable value is an error)
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    /// - `INVITE_TTL_SECS`: default 120
    /// - `MAX_FOCUS_MINUTES`: default 180
    /// - `MAX_NICKNAME_LEN`: default 32
    /// - `SPAWN_TOP` / `SPAWN_LEFT`: default 300 / 400
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is set but is not a valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is present but unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { var: "PORT", value: raw })?,
            None => DEFAULT_PORT,
        };

        let capacity = parse_or(&lookup, "CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY).max(1);

        Ok(Self {
            port,
            client_channel_capacity: capacity,
            invite_ttl: Duration::from_secs(parse_or(&lookup, "INVITE_TTL_SECS", DEFAULT_INVITE_TTL_SECS)),
            max_focus_minutes: parse_or(&lookup, "MAX_FOCUS_MINUTES", DEFAULT_MAX_FOCUS_MINUTES).max(1),
            max_nickname_len: parse_or(&lookup, "MAX_NICKNAME_LEN", DEFAULT_MAX_NICKNAME_LEN).max(1),
            spawn: Position {
                top: parse_or(&lookup, "SPAWN_TOP", DEFAULT_SPAWN.top),
                left: parse_or(&lookup, "SPAWN_LEFT", DEFAULT_SPAWN.left),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
