//! Room fan-out
//!
//! Serializes a message once and hands the shared payload to the room.
//! Chat relay and join/leave notices both go through here.

use tracing::debug;

use crate::message::Message;
use crate::room::Room;

/// Broadcast a message to every member of `room`
///
/// Returns the number of members evicted during delivery.
pub fn broadcast(room: &Room, message: &Message) -> Result<usize, serde_json::Error> {
    let payload = message.encode()?;
    let evicted = room.deliver(&payload);
    debug!(
        "Broadcast {:?} to room {} ({} evicted)",
        message.kind, room.name, evicted
    );
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::session::Session;
    use crate::types::SessionId;

    #[tokio::test]
    async fn test_broadcast_same_bytes_to_members() {
        let room = Room::new("general");
        let (alice, mut a_rx) = Session::new(SessionId::new(), "alice", "general", 4);
        let (bob, mut b_rx) = Session::new(SessionId::new(), "bob", "general", 4);
        room.add(&alice);
        room.add(&bob);

        let msg = Message::chat("general", "alice", "hi");
        broadcast(&room, &msg).unwrap();

        let a = a_rx.recv().await.unwrap();
        let b = b_rx.recv().await.unwrap();
        assert_eq!(a, b);

        let decoded: Message = serde_json::from_str(&a).unwrap();
        assert_eq!(decoded.kind, MessageKind::Chat);
        assert_eq!(decoded.text, "hi");
    }
}
