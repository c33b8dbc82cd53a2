//! Room-scoped WebSocket Text Relay Library
//!
//! A WebSocket relay built with tokio-tungstenite where clients join a named
//! room and exchange text with everyone currently in it.
//!
//! # Features
//! - Rooms created on first join and deleted when the last member leaves
//! - Chat fan-out to every member of the sender's room
//! - Join/leave notices
//! - `/users`, `/stats` and `/rooms` commands
//! - Ping/pong keepalive with read and write deadlines
//! - Eviction of members whose outbound queue is full
//!
//! # Architecture
//! - `Hub` is the single writer of the room directory, driven by an `mpsc` channel
//! - Each `Room` guards its own membership with a short-lived lock
//! - Each connection runs a read task and a write task; broadcasts never wait
//!   on a slow member
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use room_relay::{serve, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     serve(listener, RelayConfig::default()).await;
//! }
//! ```

pub mod broadcast;
pub mod command;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod room;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use broadcast::broadcast;
pub use command::{Command, Directory};
pub use config::RelayConfig;
pub use error::{AppError, EnqueueError, Rejection};
pub use handler::{handle_connection, register_client, serve, ConnectParams};
pub use hub::{Hub, HubCommand, HubHandle};
pub use message::{ClientFrame, Message, MessageKind, Payload, StatsReport};
pub use room::Room;
pub use session::Session;
pub use types::SessionId;
