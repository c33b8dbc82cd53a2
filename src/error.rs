//! Error types for the relay
//!
//! Defines connection-level errors and outbound enqueue errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Every variant is fatal for the connection it occurred on and
/// for nothing else.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol or handshake error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The hub actor is no longer running
    #[error("Hub closed")]
    HubClosed,

    /// Upgrade request refused
    #[error("Upgrade rejected: {0}")]
    Rejected(#[from] Rejection),

    /// A frame could not be written before its deadline
    #[error("Write deadline exceeded")]
    WriteTimeout,
}

/// Reasons an upgrade request is refused before the WebSocket handshake
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    /// Request path is not the WebSocket endpoint
    #[error("Not found: {0}")]
    NotFound(String),

    /// `username` or `room` missing or empty
    #[error("username and room required")]
    MissingParams,
}

/// Outbound enqueue errors
///
/// Returned by the non-blocking enqueue onto a session's outbound queue.
/// Both variants are eviction triggers for room delivery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity
    #[error("Outbound queue full")]
    Full,

    /// The queue has already been closed
    #[error("Outbound queue closed")]
    Closed,
}
