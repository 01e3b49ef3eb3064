//! Pending request correlation
//!
//! Remembers which session issued a request so the asynchronous answer can
//! be routed back to it exactly once.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use super::SessionHandle;

/// Maps request ids to the session awaiting the response
///
/// All operations take a single short-lived lock, so `track`, `resolve`
/// and `purge` are linearizable per request id. The lock is never held
/// while a frame is sent.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, SessionHandle>>,
}

impl CorrelationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `owner` as the destination for `request_id`.
    ///
    /// Empty or absent ids are ignored. A repeated id replaces the previous owner.
    pub fn track(&self, request_id: Option<&str>, owner: &SessionHandle) {
        let Some(request_id) = request_id.filter(|id| !id.is_empty()) else {
            return;
        };
        let mut pending = self.lock();
        if let Some(previous) = pending.insert(request_id.to_string(), owner.clone()) {
            if previous != *owner {
                debug!(
                    "Request {} re-tracked from session {} to {}",
                    request_id, previous, owner
                );
            }
        }
        debug!("Tracked request {} for session {}", request_id, owner);
    }

    /// Take the owner of `request_id`, removing the entry
    pub fn resolve(&self, request_id: &str) -> Option<SessionHandle> {
        self.lock().remove(request_id)
    }

    /// Drop every entry owned by `owner`. Returns how many were removed.
    pub fn purge(&self, owner: &SessionHandle) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, session| session != owner);
        let removed = before - pending.len();
        if removed > 0 {
            debug!("Purged {} pending requests for session {}", removed, owner);
        }
        removed
    }

    /// Number of requests awaiting a response
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        // A poisoned map is still structurally valid
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
