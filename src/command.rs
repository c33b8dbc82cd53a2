//! Command processing
//!
//! Stateless evaluation of `/`-prefixed client text against a read-only view
//! of the room directory. Every reply goes to the requester only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::message::{Message, MessageKind, StatsReport};
use crate::room::Room;
use crate::session::Session;

/// Room directory: room name -> Room
pub type Directory = HashMap<String, Arc<Room>>;

/// Reply text for unrecognized commands
pub const HELP_TEXT: &str = "Unknown command. Available commands: /users, /stats, /rooms";

/// Reply text when the requester's room is no longer in the directory
pub const MISSING_ROOM_TEXT: &str = "Room does not exist.";

/// Recognized commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// List usernames in the requester's room
    Users,
    /// Totals across all rooms
    Stats,
    /// Member count per room
    Rooms,
    /// Anything else
    Unknown,
}

impl Command {
    /// Parse command text such as `/users`
    pub fn parse(text: &str) -> Self {
        match text {
            "/users" => Self::Users,
            "/stats" => Self::Stats,
            "/rooms" => Self::Rooms,
            _ => Self::Unknown,
        }
    }
}

/// Evaluate a command for `requester` and build the single reply
pub fn process(
    requester: &Session,
    directory: &Directory,
    text: &str,
) -> Result<Message, serde_json::Error> {
    let Some(room) = directory.get(&requester.room) else {
        return Ok(Message::new(
            MessageKind::System,
            "",
            "",
            MISSING_ROOM_TEXT,
        ));
    };

    let reply = |kind, text: String| Message::new(kind, &room.name, &requester.username, text);

    let message = match Command::parse(text) {
        Command::Users => reply(MessageKind::UserList, room.usernames().join(", ")),
        Command::Stats => {
            let room_details = room_counts(directory);
            let stats = StatsReport {
                total_users: room_details.values().sum(),
                total_rooms: directory.len(),
                room_details,
            };
            reply(MessageKind::Stats, serde_json::to_string(&stats)?)
        }
        Command::Rooms => reply(
            MessageKind::Room,
            serde_json::to_string(&room_counts(directory))?,
        ),
        Command::Unknown => Message::new(MessageKind::System, &room.name, "", HELP_TEXT),
    };

    Ok(message)
}

fn room_counts(directory: &Directory) -> BTreeMap<String, usize> {
    directory
        .iter()
        .map(|(name, room)| (name.clone(), room.len()))
        .collect()
}
