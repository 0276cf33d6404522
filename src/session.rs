//! Session struct definition
//!
//! Represents one connected client for the lifetime of its connection:
//! identity, username, outbound update channel and moderation state.

use std::collections::HashSet;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SendError;
use crate::protocol::Update;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe session identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a default guest username, e.g. `Guest-X4TZ`.
pub fn generate_username() -> String {
    use rand::Rng;
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("Guest-{}", suffix)
}

/// Connected session information
///
/// Holds all per-connection state: the unique ID, the current username,
/// the update sender channel, and the report/ban bookkeeping.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Current username (generated at connect, mutable via rename)
    pub username: String,
    /// Server → Client update channel
    pub sender: mpsc::Sender<Update>,
    /// Whether the session is currently banned from sending
    pub is_banned: bool,
    /// Sessions that reported this one since the last unban
    pub reported_by: HashSet<SessionId>,
}

impl Session {
    /// Create a new session with the given ID, username and sender channel
    pub fn new(id: SessionId, username: String, sender: mpsc::Sender<Update>) -> Self {
        Self {
            id,
            username,
            sender,
            is_banned: false,
            reported_by: HashSet::new(),
        }
    }

    /// Send an update to this session
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, update: Update) -> Result<(), SendError> {
        self.sender
            .send(update)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }
}
