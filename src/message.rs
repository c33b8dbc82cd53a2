//! Message protocol definitions
//!
//! A single JSON envelope is used for everything the server sends.
//! Clients only need to send `{"text": ...}`; the server fills in the rest.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A serialized message, shared between every queue it is delivered to
pub type Payload = Arc<str>;

/// Prefix marking inbound text as a command instead of chat
pub const COMMAND_PREFIX: char = '/';

/// Envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Chat relayed from a room member
    Chat,
    /// Join/leave notices and command errors
    System,
    /// Reply to `/users`
    UserList,
    /// Reply to `/stats`
    Stats,
    /// Reply to `/rooms`
    Room,
}

/// Server → Client envelope
///
/// Built fresh for every send and never mutated after serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub time: String,
}

impl Message {
    /// Build a message stamped with the current local time
    pub fn new(
        kind: MessageKind,
        room: impl Into<String>,
        username: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            room: room.into(),
            username: username.into(),
            text: text.into(),
            time: timestamp(),
        }
    }

    /// Chat line from `username` in `room`
    pub fn chat(room: &str, username: &str, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Chat, room, username, text)
    }

    /// System notice scoped to `room`
    pub fn system(room: &str, text: impl Into<String>) -> Self {
        Self::new(MessageKind::System, room, "", text)
    }

    /// Serialize once into a shareable payload
    pub fn encode(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_string(self).map(Payload::from)
    }
}

/// Client → Server frame
///
/// Only `text` is read; any other field a client sends is ignored.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub text: String,
}

impl ClientFrame {
    /// Returns the command text if this frame is a command
    pub fn as_command(&self) -> Option<&str> {
        self.text
            .starts_with(COMMAND_PREFIX)
            .then_some(self.text.as_str())
    }
}

/// Body of the `/stats` reply, carried as JSON inside `text`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub total_users: usize,
    pub total_rooms: usize,
    pub room_details: std::collections::BTreeMap<String, usize>,
}

/// Wall-clock `HH:MM:SS` in local time
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
