//! Room struct definition
//!
//! Represents a named broadcast scope holding non-owning references to its
//! member sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tracing::warn;

use crate::message::Payload;
use crate::session::Session;
use crate::types::SessionId;

/// Chat room
///
/// Membership is guarded by a lock that is only held for the duration of a
/// single add, remove or delivery pass. Sessions are referenced weakly: a
/// session's lifetime belongs to its connection, not to the room.
#[derive(Debug)]
pub struct Room {
    /// Room name, the directory key
    pub name: String,
    /// Room creation time
    pub created_at: Instant,
    /// Current members
    members: Mutex<HashMap<SessionId, Weak<Session>>>,
}

impl Room {
    /// Create a new empty room
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Instant::now(),
            members: Mutex::new(HashMap::new()),
        }
    }

    fn members(&self) -> MutexGuard<'_, HashMap<SessionId, Weak<Session>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session to the room
    ///
    /// Returns the member count after adding.
    pub fn add(&self, session: &Arc<Session>) -> usize {
        let mut members = self.members();
        members.insert(session.id, Arc::downgrade(session));
        members.len()
    }

    /// Remove a session from the room
    ///
    /// Returns false if the session was not a member.
    pub fn remove(&self, id: SessionId) -> bool {
        self.members().remove(&id).is_some()
    }

    /// Check if a session is in this room
    pub fn contains(&self, id: SessionId) -> bool {
        self.members().contains_key(&id)
    }

    /// Number of current members
    pub fn len(&self) -> usize {
        self.members().len()
    }

    /// Check if the room has no members
    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    /// Usernames of live members, sorted
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members()
            .values()
            .filter_map(Weak::upgrade)
            .map(|s| s.username.clone())
            .collect();
        names.sort();
        names
    }

    /// Best-effort delivery of a payload to every member
    ///
    /// Never waits on a member. A member whose queue is full or closed, or
    /// whose session is gone, is evicted: removed from the room with its
    /// queue closed. Returns the number of members evicted.
    pub fn deliver(&self, payload: &Payload) -> usize {
        let mut members = self.members();
        let before = members.len();

        members.retain(|id, member| {
            let Some(session) = member.upgrade() else {
                return false;
            };
            match session.offer(payload.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "Evicting {} ({}) from room {}: {}",
                        session.username, id, self.name, e
                    );
                    session.close_outbound();
                    false
                }
            }
        });

        before - members.len()
    }
}
