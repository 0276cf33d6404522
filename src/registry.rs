//! Session registry
//!
//! The live set of sessions, keyed by id with a username index on the side.
//! Username uniqueness is enforced here and nowhere else. The registry is an
//! owned value inside the engine actor, so all access is already serialized.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AppError;
use crate::protocol::Update;
use crate::session::{self, Session, SessionId};

/// Attempts at drawing an unused generated username before giving up
const NAME_POOL_ATTEMPTS: usize = 16;

/// Registry of all live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// All connected sessions: SessionId -> Session
    sessions: HashMap<SessionId, Session>,
    /// Username index for O(1) lookup: username -> SessionId
    by_username: HashMap<String, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session with a generated unique username and insert it.
    ///
    /// Fails only if the generated-name pool is exhausted, which the caller
    /// treats as fatal for the connection.
    pub fn create(
        &mut self,
        id: SessionId,
        sender: mpsc::Sender<Update>,
    ) -> Result<&Session, AppError> {
        let username = self.draw_username()?;
        self.by_username.insert(username.clone(), id);
        self.sessions.insert(id, Session::new(id, username, sender));
        debug!("Total sessions: {}", self.sessions.len());
        Ok(&self.sessions[&id])
    }

    /// Look up a session by username.
    pub fn get(&self, username: &str) -> Result<&Session, AppError> {
        self.by_username
            .get(username)
            .and_then(|id| self.sessions.get(id))
            .ok_or_else(|| AppError::UserDoesNotExist(username.to_string()))
    }

    /// Look up a session by id.
    pub fn get_by_id(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Mutable lookup by id.
    pub fn get_by_id_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Iterate over all live sessions.
    pub fn all(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Atomically change a session's username.
    ///
    /// Fails with `UsernameAlreadyTaken` if any live session (including the
    /// renaming one) already carries `new_username`; the registry is left
    /// untouched on failure.
    pub fn rename(&mut self, id: SessionId, new_username: &str) -> Result<(), AppError> {
        if self.by_username.contains_key(new_username) {
            return Err(AppError::UsernameAlreadyTaken(new_username.to_string()));
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return Err(AppError::UserDoesNotExist(new_username.to_string()));
        };
        self.by_username.remove(&session.username);
        session.username = new_username.to_string();
        self.by_username.insert(new_username.to_string(), id);
        Ok(())
    }

    /// Remove a session. Idempotent: removing an absent session is a no-op.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.by_username.remove(&session.username);
        debug!("Total sessions: {}", self.sessions.len());
        Some(session)
    }

    fn draw_username(&self) -> Result<String, AppError> {
        for _ in 0..NAME_POOL_ATTEMPTS {
            let candidate = session::generate_username();
            if !self.by_username.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(AppError::UsernameAlreadyTaken(
            "generated username pool exhausted".to_string(),
        ))
    }
}
