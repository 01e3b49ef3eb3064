//! Named action handlers
//!
//! Maps action names, case-insensitively, to handlers that answer an
//! [`ApiRequest`] locally. Unregistered actions get a synthetic response
//! chosen by keyword.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use crate::server::{ApiRequest, ApiResponse};

/// Errors a handler may report
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Missing field '{0}'")]
    MissingField(String),
}

/// Result type for action handlers
pub type ActionResult<T> = Result<T, ActionError>;

/// Something that can answer a request
pub trait ActionHandler: Send + Sync {
    fn handle(&self, request: &ApiRequest) -> ActionResult<ApiResponse>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ApiRequest) -> ActionResult<ApiResponse> + Send + Sync,
{
    fn handle(&self, request: &ApiRequest) -> ActionResult<ApiResponse> {
        self(request)
    }
}

/// Registry of named action handlers
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `ping` and `echo` handlers
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("ping", ping);
        registry.register("echo", echo);
        registry
    }

    /// Register `handler` for `action`, replacing any previous one
    pub fn register(&self, action: &str, handler: impl ActionHandler + 'static) {
        let key = action.to_lowercase();
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(key, Arc::new(handler)).is_some() {
            debug!("Replaced handler for action '{}'", action);
        }
    }

    /// Whether a handler is registered for `action`
    pub fn contains(&self, action: &str) -> bool {
        self.lookup(action).is_some()
    }

    /// Answer `request`. Never fails: handler errors and panics become a
    /// `success: false` response.
    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let Some(handler) = self.lookup(&request.action) else {
            return dynamic_response(request);
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler.handle(request)
        }));

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Handler for '{}' failed: {}", request.action, e);
                ApiResponse::failure(request, format!("Error handling action: {}", e))
            }
            Err(_) => {
                warn!("Handler for '{}' panicked", request.action);
                ApiResponse::failure(request, "Error handling action: handler panicked")
            }
        }
    }

    fn lookup(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&action.to_lowercase())
            .cloned()
    }
}

fn now_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Health check
fn ping(request: &ApiRequest) -> ActionResult<ApiResponse> {
    let data = BTreeMap::from([("timestamp".to_string(), now_millis())]);
    Ok(ApiResponse::ok(request, data, "Pong!"))
}

/// Returns `data.message` as the response message, along with the request data
fn echo(request: &ApiRequest) -> ActionResult<ApiResponse> {
    let message = request
        .data
        .get("message")
        .cloned()
        .ok_or_else(|| ActionError::MissingField("message".to_string()))?;
    Ok(ApiResponse::ok(request, request.data.clone(), message))
}

/// Synthetic answer for an action nobody registered
fn dynamic_response(request: &ApiRequest) -> ApiResponse {
    let action = request.action.to_lowercase();
    let entries: Vec<(&str, String)>;
    let message;

    if action.contains("get") {
        entries = vec![
            ("timestamp", now_millis()),
            ("action_type", "get".to_string()),
            ("dynamic_response", "true".to_string()),
            ("requested_action", request.action.clone()),
        ];
        message = "Dynamic GET action handled successfully";
    } else if action.contains("unsubscribe") {
        // Must precede the "subscribe" check, which would also match
        entries = vec![
            ("status", "unsubscribed".to_string()),
            ("dynamic_response", "true".to_string()),
        ];
        message = "Dynamic unsubscription completed";
    } else if action.contains("subscribe") {
        entries = vec![
            ("subscription_id", format!("sub_{}", now_millis())),
            ("status", "subscribed".to_string()),
            ("dynamic_response", "true".to_string()),
        ];
        message = "Dynamic subscription created successfully";
    } else {
        entries = vec![
            ("timestamp", now_millis()),
            ("dynamic_response", "true".to_string()),
            ("unknown_action", request.action.clone()),
        ];
        message = "Unknown action handled dynamically";
    }

    let data = entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    ApiResponse::ok(request, data, message)
}
