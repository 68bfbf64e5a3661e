//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service functions are synchronous over `&mut Room`: the caller holds the
//! room write guard, the service mutates state and queues outbound frames.
//! Route handlers stay focused on payload parsing and error replies.

pub mod connection;
pub mod invitation;
pub mod movement;
pub mod registry;

/// Error code for messages from sessions that are gone or never identified.
/// Frames failing with this code are dropped without a reply.
pub const E_UNKNOWN_SESSION: &str = "E_UNKNOWN_SESSION";

/// Error code for missing or invalid payload fields.
pub const E_MALFORMED_PAYLOAD: &str = "E_MALFORMED_PAYLOAD";
