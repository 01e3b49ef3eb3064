//! Session handle
//!
//! A cheap, cloneable address for one live WebSocket connection. Frames are
//! pushed into an unbounded channel that the connection's writer task drains,
//! so sending never waits on the network and never holds a lock.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Errors that can occur when writing to a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} is closed")]
    Closed(Uuid),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Channel sender feeding a connection's writer task
pub type FrameSender = mpsc::UnboundedSender<Message>;

/// Channel receiver drained by a connection's writer task
pub type FrameReceiver = mpsc::UnboundedReceiver<Message>;

/// Opaque handle to a connected session
///
/// Equality and hashing use the session id only.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    peer_addr: Option<SocketAddr>,
    tx: FrameSender,
}

impl SessionHandle {
    /// Create a handle and the receiver its writer task should drain
    pub fn new(peer_addr: Option<SocketAddr>) -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            peer_addr,
            tx,
        };
        (handle, rx)
    }

    /// Unique session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a text frame for delivery
    pub fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        self.send(Message::Text(text.into()))
    }

    /// Queue an arbitrary frame for delivery
    pub fn send(&self, message: Message) -> SessionResult<()> {
        self.tx
            .send(message)
            .map_err(|_| SessionError::Closed(self.id))
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl std::hash::Hash for SessionHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer_addr {
            Some(addr) => write!(f, "{} ({})", self.id, addr),
            None => write!(f, "{}", self.id),
        }
    }
}
