//! Session struct definition
//!
//! Server-side state for one connected client: identity, assigned room,
//! and the sending half of its bounded outbound queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::EnqueueError;
use crate::message::Payload;
use crate::room::Room;
use crate::types::SessionId;

/// Connected session information
///
/// The room name is fixed for the session's lifetime. The outbound queue
/// can be written by any broadcaster but is closed at most once, by
/// whichever of eviction or unregistration gets there first.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Username given at connect time
    pub username: String,
    /// Room joined at connect time
    pub room: String,
    /// Server → Client queue, `None` once closed
    outbound: Mutex<Option<mpsc::Sender<Payload>>>,
    /// Room instance joined at registration
    joined: OnceLock<Weak<Room>>,
    /// Set by the first unregistration
    departed: AtomicBool,
}

impl Session {
    /// Create a new session with an outbound queue of `capacity` messages
    ///
    /// Returns the shared session and the receiving half for its write loop.
    pub fn new(
        id: SessionId,
        username: impl Into<String>,
        room: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Self {
            id,
            username: username.into(),
            room: room.into(),
            outbound: Mutex::new(Some(tx)),
            joined: OnceLock::new(),
            departed: AtomicBool::new(false),
        };
        (Arc::new(session), rx)
    }

    /// Enqueue a payload without waiting
    pub fn offer(&self, payload: Payload) -> Result<(), EnqueueError> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = outbound.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue
    ///
    /// Returns true only for the call that actually closed it. Messages
    /// already queued are still drained by the write loop before it sees
    /// the close.
    pub fn close_outbound(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Check whether the outbound queue has been closed
    pub fn is_closed(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Remember the room instance this session was added to
    pub(crate) fn bind_room(&self, room: &Arc<Room>) {
        let _ = self.joined.set(Arc::downgrade(room));
    }

    /// Check whether `room` is the instance this session joined
    ///
    /// A room of the same name created after ours was deleted does not count.
    pub fn belongs_to(&self, room: &Arc<Room>) -> bool {
        self.joined
            .get()
            .is_some_and(|joined| std::ptr::eq(joined.as_ptr(), Arc::as_ptr(room)))
    }

    /// Record that this session has been unregistered
    ///
    /// Returns true the first time only.
    pub(crate) fn mark_departed(&self) -> bool {
        !self.departed.swap(true, Ordering::AcqRel)
    }
}
