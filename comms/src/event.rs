//! Typed events forwarded to the external observer system.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of a `DirectoryEvent`; the wire carries the integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// A worker was discovered and added to the directory.
    UpdateDirectory = 1,
    /// The roster of workers chosen for a round.
    Roster = 2,
    /// A worker-originated event passed through unchanged.
    Direct = 3,
}

/// One self-contained message for the downstream observer.
///
/// Wire shape: `{"sender_id", "message_type", "message", "time_ms"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEvent {
    pub sender_id: String,
    pub message_type: u8,
    pub message: Value,
    pub time_ms: u64,
}

impl DirectoryEvent {
    /// Builds an event stamped with the current unix time in millis.
    pub fn now(sender_id: &str, message_type: MessageType, message: Value) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            message_type: message_type as u8,
            message,
            time_ms: unix_millis(),
        }
    }
}

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds since the unix epoch, fractional.
pub fn unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
