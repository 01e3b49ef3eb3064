//! Shared relay services
//!
//! Everything a connection handler needs, created once and handed to each
//! connection task behind an `Arc`.

use std::sync::Arc;

use super::protocol::{ProtocolError, ProtocolResult};
use crate::actions::ActionRegistry;
use crate::broadcast::{BroadcastController, BroadcastSettings};
use crate::config::{BroadcastDefaults, MockConfig};
use crate::session::{CorrelationTable, SessionRegistry};

/// Services shared by all connections
pub struct RelayContext {
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Requests awaiting a response
    pub pending: CorrelationTable,
    /// Periodic UDP broadcaster
    pub broadcaster: BroadcastController,
    /// Local answers for named actions
    pub actions: ActionRegistry,
    /// Fallbacks for `start` fields left null
    pub broadcast_defaults: BroadcastDefaults,
    /// Answer requests locally when no peer can relay them
    pub auto_reply: bool,
}

impl RelayContext {
    /// Build the services described by `config`
    pub fn new(config: &MockConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster =
            BroadcastController::new(Arc::clone(&registry), BroadcastSettings::from(&config.broadcast));

        Self {
            registry,
            pending: CorrelationTable::new(),
            broadcaster,
            actions: ActionRegistry::with_builtins(),
            broadcast_defaults: config.broadcast.clone(),
            auto_reply: config.mock.auto_reply,
        }
    }

    /// Settings for a `start` request, filling nulls from the defaults.
    ///
    /// Negative or too short intervals are clamped to the minimum. A port
    /// outside 1..=65535 is rejected.
    pub fn broadcast_settings(
        &self,
        interval_ms: Option<i64>,
        message: Option<String>,
        port: Option<i64>,
    ) -> ProtocolResult<BroadcastSettings> {
        let port = match port {
            None => self.broadcast_defaults.port,
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| ProtocolError::InvalidMessage(format!("port {} is out of range", port)))?,
        };
        let interval_ms = match interval_ms {
            None => self.broadcast_defaults.interval_ms,
            Some(ms) => u64::try_from(ms).unwrap_or(0),
        };

        Ok(BroadcastSettings::new(
            interval_ms,
            message.unwrap_or_else(|| self.broadcast_defaults.message.clone()),
            port,
            self.broadcast_defaults.address,
        ))
    }
}
