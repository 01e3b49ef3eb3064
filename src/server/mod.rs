//! WebSocket server module
//!
//! Accepts client and dashboard connections, classifies their frames and
//! routes them between sessions.

mod context;
mod handler;
mod protocol;
mod websocket;

pub use protocol::*;
pub use websocket::*;
