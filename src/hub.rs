//! Hub actor implementation
//!
//! The single writer of the room directory. Sessions reach it only through
//! its command channel, so join, leave and command evaluation are totally
//! ordered without a directory-wide lock.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::broadcast;
use crate::command::{self, Directory};
use crate::error::{AppError, EnqueueError};
use crate::message::Message;
use crate::room::Room;
use crate::session::Session;

/// Commands sent from sessions to the Hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// Session finished its handshake and joins its room
    Register {
        session: Arc<Session>,
        responder: oneshot::Sender<Arc<Room>>,
    },
    /// Session is gone; safe to send more than once
    Unregister { session: Arc<Session> },
    /// `/`-prefixed text from a session
    Command { session: Arc<Session>, text: String },
    /// A broadcast evicted members of this room
    Prune { room: Arc<Room> },
}

/// The Hub actor
///
/// Owns the directory and processes commands from session tasks. Nothing in
/// here ever waits on a session: all delivery is non-blocking.
pub struct Hub {
    /// All live rooms: name -> Room
    rooms: Directory,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a new Hub with the given command receiver
    pub fn new(receiver: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            rooms: Directory::new(),
            receiver,
        }
    }

    /// Create a Hub with an intake of `capacity` commands and spawn it
    pub fn start(capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(Self::new(rx).run());
        (HubHandle::new(tx), task)
    }

    /// Run the Hub event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Hub shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { session, responder } => {
                let room = self.register(&session);
                if responder.send(room).is_err() {
                    // Connection gave up before the reply arrived
                    self.unregister(&session);
                }
            }
            HubCommand::Unregister { session } => {
                self.unregister(&session);
            }
            HubCommand::Command { session, text } => {
                self.dispatch(&session, &text);
            }
            HubCommand::Prune { room } => {
                self.prune(&room);
            }
        }
    }

    /// Add a session to its room, creating the room on first join
    pub fn register(&mut self, session: &Arc<Session>) -> Arc<Room> {
        let room = self
            .rooms
            .entry(session.room.clone())
            .or_insert_with(|| {
                info!("Created new room: {}", session.room);
                Arc::new(Room::new(session.room.clone()))
            })
            .clone();

        let total = room.add(session);
        session.bind_room(&room);
        info!(
            "Client {} ({}) joined room {} (Total: {})",
            session.username, session.id, room.name, total
        );

        self.notify(&room, format!("{} joined the room", session.username));
        self.prune(&room);
        room
    }

    /// Remove a session from its room and close its queue
    ///
    /// Idempotent. The leave notice is sent once per session even if the
    /// session was already evicted from the room, but only while the room it
    /// joined is still listed; an emptied room is always pruned.
    pub fn unregister(&mut self, session: &Session) {
        let first = session.mark_departed();
        let room = self.joined_room(session);

        if let Some(room) = &room {
            room.remove(session.id);
        }
        session.close_outbound();

        let Some(room) = room else {
            debug!("Unregister for {}: room {} already gone", session.id, session.room);
            return;
        };

        if first {
            info!(
                "Client {} ({}) left room {} (Remaining: {})",
                session.username,
                session.id,
                room.name,
                room.len()
            );
            self.notify(&room, format!("{} left the room", session.username));
        }

        self.prune(&room);
    }

    /// Evaluate a command and reply to the requester only
    pub fn dispatch(&mut self, session: &Session, text: &str) {
        debug!("Command from {}: {}", session.username, text);

        // Rooms emptied by eviction must not show up in replies
        self.prune_all();

        let reply = match command::process(session, &self.rooms, text) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to build reply for {}: {}", session.id, e);
                return;
            }
        };

        let payload = match reply.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize reply for {}: {}", session.id, e);
                return;
            }
        };

        match session.offer(payload) {
            Ok(()) => {}
            Err(EnqueueError::Full) => {
                warn!("Evicting {} ({}): outbound queue full", session.username, session.id);
                self.evict(session);
            }
            Err(EnqueueError::Closed) => {
                debug!("Reply dropped, {} already closed", session.id);
            }
        }
    }

    /// Broadcast a system notice to a room
    fn notify(&self, room: &Room, text: String) {
        if let Err(e) = broadcast(room, &Message::system(&room.name, text)) {
            error!("Failed to serialize notice for room {}: {}", room.name, e);
        }
    }

    /// Drop a session from its room and close its queue without a notice
    ///
    /// The notice follows when the session's own unregister arrives.
    fn evict(&mut self, session: &Session) {
        session.close_outbound();
        if let Some(room) = self.joined_room(session) {
            room.remove(session.id);
            self.prune(&room);
        }
    }

    /// The listed room if it is the instance `session` joined
    fn joined_room(&self, session: &Session) -> Option<Arc<Room>> {
        self.rooms
            .get(&session.room)
            .filter(|room| session.belongs_to(room))
            .cloned()
    }

    /// Delete a room from the directory once it has no members
    ///
    /// Does nothing if the listed room of that name is a different instance.
    fn prune(&mut self, room: &Arc<Room>) {
        let listed = self
            .rooms
            .get(&room.name)
            .is_some_and(|current| Arc::ptr_eq(current, room));
        if listed && room.is_empty() {
            self.rooms.remove(&room.name);
            info!(
                "Deleted empty room: {} (lived {:?})",
                room.name,
                room.created_at.elapsed()
            );
        }
    }

    /// Delete every listed room that has no members
    fn prune_all(&mut self) {
        self.rooms.retain(|name, room| {
            let keep = !room.is_empty();
            if !keep {
                info!("Deleted empty room: {}", name);
            }
            keep
        });
    }
}

/// Cloneable sending side of the Hub's intake
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Wrap a command sender
    pub fn new(sender: mpsc::Sender<HubCommand>) -> Self {
        Self { sender }
    }

    /// Register a session and wait for the room it joined
    pub async fn register(&self, session: Arc<Session>) -> Result<Arc<Room>, AppError> {
        let (responder, reply) = oneshot::channel();
        self.sender
            .send(HubCommand::Register { session, responder })
            .await
            .map_err(|_| AppError::HubClosed)?;
        reply.await.map_err(|_| AppError::HubClosed)
    }

    /// Unregister a session
    ///
    /// Always succeeds from the caller's point of view. If the Hub is gone,
    /// the session's queue is closed here so its write loop still ends.
    pub async fn unregister(&self, session: Arc<Session>) {
        if let Err(mpsc::error::SendError(cmd)) =
            self.sender.send(HubCommand::Unregister { session }).await
        {
            if let HubCommand::Unregister { session } = cmd {
                warn!("Hub closed, closing {} locally", session.id);
                session.close_outbound();
            }
        }
    }

    /// Route command text to the Hub
    pub async fn command(&self, session: Arc<Session>, text: String) -> Result<(), AppError> {
        self.sender
            .send(HubCommand::Command { session, text })
            .await
            .map_err(|_| AppError::HubClosed)
    }

    /// Ask the Hub to delete `room` if eviction left it empty
    pub async fn prune(&self, room: Arc<Room>) -> Result<(), AppError> {
        self.sender
            .send(HubCommand::Prune { room })
            .await
            .map_err(|_| AppError::HubClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, Payload};
    use crate::types::SessionId;

    fn hub() -> Hub {
        let (_tx, rx) = mpsc::channel(1);
        Hub::new(rx)
    }

    fn session(name: &str, room: &str) -> (Arc<Session>, mpsc::Receiver<Payload>) {
        Session::new(SessionId::new(), name, room, 16)
    }

    fn next(rx: &mut mpsc::Receiver<Payload>) -> Option<Message> {
        rx.try_recv()
            .ok()
            .map(|p| serde_json::from_str(&p).unwrap())
    }

    /// Directory contains a room iff it has members
    fn assert_directory_consistent(hub: &Hub) {
        for (name, room) in &hub.rooms {
            assert!(!room.is_empty(), "room {} is empty but listed", name);
        }
    }

    #[test]
    fn test_register_creates_room_and_notifies_joiner() {
        let mut hub = hub();
        let (alice, mut rx) = session("alice", "general");

        hub.register(&alice);

        assert!(hub.rooms.contains_key("general"));
        let notice = next(&mut rx).unwrap();
        assert_eq!(notice.kind, MessageKind::System);
        assert_eq!(notice.text, "alice joined the room");
        assert!(next(&mut rx).is_none());
    }

    #[test]
    fn test_join_notice_is_room_scoped() {
        let mut hub = hub();
        let (alice, mut a_rx) = session("alice", "general");
        let (bob, mut b_rx) = session("bob", "general");
        let (carol, mut c_rx) = session("carol", "other");

        hub.register(&alice);
        hub.register(&carol);
        next(&mut a_rx);
        next(&mut c_rx);

        hub.register(&bob);

        assert_eq!(next(&mut a_rx).unwrap().text, "bob joined the room");
        assert_eq!(next(&mut b_rx).unwrap().text, "bob joined the room");
        assert!(next(&mut c_rx).is_none());
    }

    #[test]
    fn test_unregister_last_member_deletes_room() {
        let mut hub = hub();
        let (alice, _a_rx) = session("alice", "general");
        let (bob, mut b_rx) = session("bob", "general");

        hub.register(&alice);
        hub.register(&bob);
        while next(&mut b_rx).is_some() {}

        hub.unregister(&alice);
        assert!(alice.is_closed());
        assert_eq!(next(&mut b_rx).unwrap().text, "alice left the room");
        assert!(hub.rooms.contains_key("general"));

        hub.unregister(&bob);
        assert!(!hub.rooms.contains_key("general"));
        assert_directory_consistent(&hub);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut hub = hub();
        let (alice, _a_rx) = session("alice", "general");
        let (bob, mut b_rx) = session("bob", "general");

        hub.register(&alice);
        hub.register(&bob);
        while next(&mut b_rx).is_some() {}

        hub.unregister(&alice);
        hub.unregister(&alice);

        assert_eq!(next(&mut b_rx).unwrap().text, "alice left the room");
        assert!(next(&mut b_rx).is_none());
        assert_eq!(hub.rooms["general"].len(), 1);
    }

    #[test]
    fn test_unregister_after_eviction_prunes_room() {
        let mut hub = hub();
        let (alice, _a_rx) = session("alice", "general");

        let room = hub.register(&alice);
        // Eviction by delivery removes the member outside the Hub
        room.remove(alice.id);
        alice.close_outbound();

        hub.handle_command(HubCommand::Prune { room });
        assert!(!hub.rooms.contains_key("general"));

        hub.unregister(&alice);
        assert!(hub.rooms.is_empty());
    }

    #[test]
    fn test_evicted_room_hidden_from_commands() {
        let mut hub = hub();
        let (alice, _a_rx) = Session::new(SessionId::new(), "alice", "A", 1);
        let (bob, mut b_rx) = session("bob", "B");
        let room_a = hub.register(&alice);
        hub.register(&bob);
        while next(&mut b_rx).is_some() {}

        // Join notice already fills alice's queue
        assert_eq!(room_a.deliver(&Payload::from("more")), 1);

        hub.dispatch(&bob, "/rooms");
        let rooms = next(&mut b_rx).unwrap();
        assert_eq!(rooms.text, r#"{"B":1}"#);

        hub.dispatch(&bob, "/stats");
        let stats: crate::message::StatsReport =
            serde_json::from_str(&next(&mut b_rx).unwrap().text).unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.total_rooms, 1);
        assert_directory_consistent(&hub);
    }

    #[test]
    fn test_late_unregister_skips_namesake_room() {
        let mut hub = hub();
        let (alice, _a_rx) = Session::new(SessionId::new(), "alice", "A", 1);
        hub.register(&alice);

        // Full queue on the reply evicts alice and deletes "A"
        hub.dispatch(&alice, "/users");
        assert!(!hub.rooms.contains_key("A"));

        let (carol, mut c_rx) = session("carol", "A");
        hub.register(&carol);
        while next(&mut c_rx).is_some() {}

        hub.unregister(&alice);

        assert!(next(&mut c_rx).is_none());
        assert_eq!(hub.rooms["A"].len(), 1);
    }

    #[test]
    fn test_prune_ignores_namesake_room() {
        let mut hub = hub();
        let stale = Arc::new(Room::new("general"));
        let (alice, _rx) = session("alice", "general");
        hub.register(&alice);

        hub.handle_command(HubCommand::Prune { room: stale });

        assert!(hub.rooms.contains_key("general"));
    }

    #[test]
    fn test_directory_invariant_over_sequence() {
        let mut hub = hub();
        let members: Vec<_> = [
            ("a", "r1"),
            ("b", "r1"),
            ("c", "r2"),
            ("d", "r3"),
            ("e", "r2"),
        ]
        .iter()
        .map(|(u, r)| session(u, r))
        .collect();

        for (s, _) in &members {
            hub.register(s);
            assert_directory_consistent(&hub);
        }
        assert_eq!(hub.rooms.len(), 3);

        for (i, (s, _)) in members.iter().enumerate().rev() {
            hub.unregister(s);
            assert_directory_consistent(&hub);
            if i == 0 {
                assert!(hub.rooms.is_empty());
            }
        }
    }

    #[test]
    fn test_dispatch_replies_to_requester_only() {
        let mut hub = hub();
        let (alice, mut a_rx) = session("alice", "general");
        let (bob, mut b_rx) = session("bob", "general");
        hub.register(&alice);
        hub.register(&bob);
        while next(&mut a_rx).is_some() {}
        while next(&mut b_rx).is_some() {}

        hub.dispatch(&alice, "/unknowncmd");

        let reply = next(&mut a_rx).unwrap();
        assert_eq!(reply.kind, MessageKind::System);
        assert_eq!(reply.text, command::HELP_TEXT);
        assert!(next(&mut a_rx).is_none());
        assert!(next(&mut b_rx).is_none());
    }

    #[test]
    fn test_dispatch_missing_room() {
        let mut hub = hub();
        let (ghost, mut rx) = session("ghost", "nowhere");

        hub.dispatch(&ghost, "/users");

        let reply = next(&mut rx).unwrap();
        assert_eq!(reply.kind, MessageKind::System);
        assert_eq!(reply.text, command::MISSING_ROOM_TEXT);
    }

    #[test]
    fn test_dispatch_full_queue_evicts() {
        let mut hub = hub();
        let (alice, _rx) = Session::new(SessionId::new(), "alice", "general", 1);
        hub.register(&alice);

        // Join notice fills the only slot
        hub.dispatch(&alice, "/users");

        assert!(alice.is_closed());
        assert!(!hub.rooms.contains_key("general"));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (handle, task) = Hub::start(8);
        let (alice, mut rx) = session("alice", "general");

        let room = handle.register(alice.clone()).await.unwrap();
        assert_eq!(room.name, "general");
        assert!(room.contains(alice.id));

        handle
            .command(alice.clone(), "/rooms".to_string())
            .await
            .unwrap();
        handle.unregister(alice.clone()).await;

        let mut kinds = Vec::new();
        while let Some(payload) = rx.recv().await {
            let msg: Message = serde_json::from_str(&payload).unwrap();
            kinds.push(msg.kind);
        }
        assert_eq!(kinds, vec![MessageKind::System, MessageKind::Room]);
        assert!(room.is_empty());

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_with_hub_gone_closes_locally() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = HubHandle::new(tx);
        let (alice, _rx) = session("alice", "general");

        handle.unregister(alice.clone()).await;

        assert!(alice.is_closed());
    }
}
