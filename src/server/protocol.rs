//! Protocol message definitions
//!
//! Defines the frames exchanged between mobile clients, dashboards and the
//! mock server, and the ordered classifier that decides what an inbound
//! text frame is. JSON payloads use `action` as the operation field name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// Plain-text tokens
// ============================================================================

/// Sent to peers when a session connects
pub const EVENT_CLIENT_CONNECTED: &str = "CLIENT_CONNECTED:Client";
/// Sent to peers when a session disconnects
pub const EVENT_CLIENT_DISCONNECTED: &str = "CLIENT_DISCONNECTED:Client";
/// Prefix of the participant count notice
pub const CLIENT_COUNT_PREFIX: &str = "CLIENT_COUNT:";
/// Prefix of a relayed API request
pub const API_REQUEST_PREFIX: &str = "API_REQUEST:";
/// Prefix of the server address reply
pub const SERVER_IP_PREFIX: &str = "SERVER_IP:";
/// Request for the server address
pub const GET_SERVER_IP_COMMAND: &str = "GET_SERVER_IP";
/// Prefix of a broadcast tick mirrored to dashboards
pub const UDP_BROADCAST_PREFIX: &str = "UDP_BROADCAST:";
/// Prefix of the server-address discovery datagram
pub const WEBSOCKET_SERVER_PREFIX: &str = "WEBSOCKET_SERVER:";

/// Broadcast control actions
pub const ACTION_START: &str = "start";
pub const ACTION_STOP: &str = "stop";
pub const ACTION_STATUS: &str = "status";

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// API Messages
// ============================================================================

/// Request relayed from a client to its peers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    /// Operation name
    pub action: String,
    /// Free-form string parameters
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Correlation id echoed by the eventual response
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ApiRequest {
    /// Frame forwarded to peers
    pub fn to_relay_frame(&self) -> ProtocolResult<String> {
        Ok(format!("{}{}", API_REQUEST_PREFIX, serde_json::to_string(self)?))
    }
}

/// Response to an [`ApiRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub action: String,
    pub success: bool,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ApiResponse {
    /// Successful response answering `request`
    pub fn ok(
        request: &ApiRequest,
        data: BTreeMap<String, String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action: request.action.clone(),
            success: true,
            data,
            message: message.into(),
            request_id: request.request_id.clone(),
        }
    }

    /// Failed response answering `request`
    pub fn failure(request: &ApiRequest, message: impl Into<String>) -> Self {
        Self {
            action: request.action.clone(),
            success: false,
            data: BTreeMap::new(),
            message: message.into(),
            request_id: request.request_id.clone(),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Broadcast Control Messages
// ============================================================================

/// Control request for the periodic broadcaster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastControlRequest {
    /// One of `start`, `stop`, `status`
    pub action: String,
    /// Tick interval in milliseconds; values below the minimum are clamped
    #[serde(default)]
    pub interval: Option<i64>,
    /// Message template
    #[serde(default)]
    pub message: Option<String>,
    /// UDP port, validated when the broadcast starts
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl BroadcastControlRequest {
    /// The parsed control action
    pub fn kind(&self) -> Option<ControlAction> {
        ControlAction::parse(&self.action)
    }
}

/// Broadcast control verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Status,
}

impl ControlAction {
    /// Parse an action name, ignoring case
    pub fn parse(action: &str) -> Option<Self> {
        match action.to_ascii_lowercase().as_str() {
            ACTION_START => Some(ControlAction::Start),
            ACTION_STOP => Some(ControlAction::Stop),
            ACTION_STATUS => Some(ControlAction::Status),
            _ => None,
        }
    }

    /// Canonical action name
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Start => ACTION_START,
            ControlAction::Stop => ACTION_STOP,
            ControlAction::Status => ACTION_STATUS,
        }
    }
}

/// Snapshot of the broadcaster state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatus {
    pub is_active: bool,
    pub interval: u64,
    pub message_template: String,
    pub clients_connected: usize,
    pub messages_sent: u64,
    pub port: u16,
}

/// Reply to a [`BroadcastControlRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastControlResponse {
    pub action: String,
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
    /// Present only for `status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BroadcastStatus>,
}

impl BroadcastControlResponse {
    /// Successful reply without status
    pub fn ok(action: ControlAction, message: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            action: action.as_str().to_string(),
            success: true,
            message: message.into(),
            request_id,
            status: None,
        }
    }

    /// Rejected request
    pub fn failure(
        action: ControlAction,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            success: false,
            ..Self::ok(action, message, request_id)
        }
    }

    /// Attach a status snapshot
    pub fn with_status(mut self, status: BroadcastStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Outbound Token Builders
// ============================================================================

/// `CLIENT_COUNT:<n>`
pub fn client_count_frame(count: usize) -> String {
    format!("{}{}", CLIENT_COUNT_PREFIX, count)
}

/// `SERVER_IP:<addr>`
pub fn server_ip_frame(addr: impl std::fmt::Display) -> String {
    format!("{}{}", SERVER_IP_PREFIX, addr)
}

/// `UDP_BROADCAST:<payload>`
pub fn broadcast_mirror_frame(payload: &str) -> String {
    format!("{}{}", UDP_BROADCAST_PREFIX, payload)
}

// ============================================================================
// Inbound Classification
// ============================================================================

/// What an inbound text frame turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    BroadcastControl(BroadcastControlRequest),
    /// A control action whose other fields have the wrong shape
    MalformedControl {
        action: ControlAction,
        request_id: Option<String>,
        reason: String,
    },
    ApiRequest(ApiRequest),
    ApiResponse(ApiResponse),
    GetServerIp,
    /// Anything else, relayed verbatim to peers
    Relay(String),
}

/// One structural parse attempt
type Matcher = fn(&str, Option<&Map<String, Value>>) -> ProtocolResult<InboundFrame>;

/// Parse attempts in priority order; the first structural match wins
const MATCHERS: [(&str, Matcher); 4] = [
    ("broadcast control", match_broadcast_control as Matcher),
    ("api request", match_api_request as Matcher),
    ("api response", match_api_response as Matcher),
    ("control string", match_control_string as Matcher),
];

impl InboundFrame {
    /// Classify a text frame.
    ///
    /// Never fails: a frame that matches none of the structured kinds is a relay.
    pub fn classify(text: &str) -> Self {
        let parsed: Option<Map<String, Value>> = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        };

        for (kind, matcher) in MATCHERS {
            match matcher(text, parsed.as_ref()) {
                Ok(frame) => return frame,
                Err(e) => tracing::trace!("Not a {}: {}", kind, e),
            }
        }

        InboundFrame::Relay(text.to_string())
    }
}

fn require_object(object: Option<&Map<String, Value>>) -> ProtocolResult<&Map<String, Value>> {
    object.ok_or_else(|| ProtocolError::InvalidMessage("not a JSON object".to_string()))
}

fn require_action(object: &Map<String, Value>) -> ProtocolResult<&str> {
    object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidMessage("missing string field 'action'".to_string()))
}

fn match_broadcast_control(
    _text: &str,
    object: Option<&Map<String, Value>>,
) -> ProtocolResult<InboundFrame> {
    let object = require_object(object)?;
    let action = require_action(object)?;
    let Some(kind) = ControlAction::parse(action) else {
        return Err(ProtocolError::InvalidMessage(format!(
            "'{}' is not a broadcast control action",
            action
        )));
    };

    // The action alone decides the kind; bad fields are reported to the sender
    match serde_json::from_value(Value::Object(object.clone())) {
        Ok(request) => Ok(InboundFrame::BroadcastControl(request)),
        Err(e) => Ok(InboundFrame::MalformedControl {
            action: kind,
            request_id: object
                .get("requestId")
                .and_then(Value::as_str)
                .map(str::to_string),
            reason: e.to_string(),
        }),
    }
}

fn match_api_request(
    _text: &str,
    object: Option<&Map<String, Value>>,
) -> ProtocolResult<InboundFrame> {
    let object = require_object(object)?;
    require_action(object)?;
    if object.contains_key("success") {
        return Err(ProtocolError::InvalidMessage(
            "has a 'success' field".to_string(),
        ));
    }
    let request = serde_json::from_value(Value::Object(object.clone()))?;
    Ok(InboundFrame::ApiRequest(request))
}

fn match_api_response(
    _text: &str,
    object: Option<&Map<String, Value>>,
) -> ProtocolResult<InboundFrame> {
    let object = require_object(object)?;
    require_action(object)?;
    if !object.get("success").is_some_and(Value::is_boolean) {
        return Err(ProtocolError::InvalidMessage(
            "missing boolean field 'success'".to_string(),
        ));
    }
    let response = serde_json::from_value(Value::Object(object.clone()))?;
    Ok(InboundFrame::ApiResponse(response))
}

fn match_control_string(
    text: &str,
    _object: Option<&Map<String, Value>>,
) -> ProtocolResult<InboundFrame> {
    if text == GET_SERVER_IP_COMMAND {
        Ok(InboundFrame::GetServerIp)
    } else {
        Err(ProtocolError::InvalidMessage(
            "not a known control string".to_string(),
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
impl ApiRequest {
    /// Create a request without data
    pub fn new(action: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            action: action.into(),
            data: BTreeMap::new(),
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Classification Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_classify_broadcast_start() {
        let frame = InboundFrame::classify(
            r#"{"action":"start","interval":500,"message":"hi","port":3000,"requestId":"b1"}"#,
        );
        match frame {
            InboundFrame::BroadcastControl(req) => {
                assert_eq!(req.kind(), Some(ControlAction::Start));
                assert_eq!(req.interval, Some(500));
                assert_eq!(req.message.as_deref(), Some("hi"));
                assert_eq!(req.port, Some(3000));
                assert_eq!(req.request_id.as_deref(), Some("b1"));
            }
            other => panic!("Expected BroadcastControl, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_broadcast_action_case_insensitive() {
        let frame = InboundFrame::classify(r#"{"action":"STATUS"}"#);
        assert!(matches!(frame, InboundFrame::BroadcastControl(ref r) if r.kind() == Some(ControlAction::Status)));
    }

    #[test]
    fn test_classify_other_action_is_api_request() {
        let frame = InboundFrame::classify(r#"{"action":"getData","requestId":"x"}"#);
        assert_eq!(
            frame,
            InboundFrame::ApiRequest(ApiRequest::new("getData", Some("x".to_string())))
        );
    }

    #[test]
    fn test_classify_api_request_with_data() {
        let frame = InboundFrame::classify(
            r#"{"action":"subscribe","data":{"topic":"news"},"requestId":null}"#,
        );
        match frame {
            InboundFrame::ApiRequest(req) => {
                assert_eq!(req.data.get("topic").map(String::as_str), Some("news"));
                assert_eq!(req.request_id, None);
            }
            other => panic!("Expected ApiRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_api_response() {
        let frame = InboundFrame::classify(
            r#"{"action":"getData","success":true,"data":{},"message":"ok","requestId":"x"}"#,
        );
        match frame {
            InboundFrame::ApiResponse(resp) => {
                assert!(resp.success);
                assert_eq!(resp.message, "ok");
                assert_eq!(resp.request_id.as_deref(), Some("x"));
            }
            other => panic!("Expected ApiResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_response_is_never_shadowed_by_request() {
        let frame = InboundFrame::classify(r#"{"action":"getData","success":false}"#);
        assert!(matches!(frame, InboundFrame::ApiResponse(_)));
    }

    #[test]
    fn test_non_boolean_success_falls_through_to_relay() {
        let text = r#"{"action":"getData","success":"yes"}"#;
        assert_eq!(
            InboundFrame::classify(text),
            InboundFrame::Relay(text.to_string())
        );
    }

    #[test]
    fn test_out_of_range_numbers_stay_broadcast_control() {
        let frame = InboundFrame::classify(r#"{"action":"start","interval":-1,"port":70000}"#);
        match frame {
            InboundFrame::BroadcastControl(req) => {
                assert_eq!(req.interval, Some(-1));
                assert_eq!(req.port, Some(70000));
            }
            other => panic!("Expected BroadcastControl, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_control_fields_are_not_relayed() {
        let frame = InboundFrame::classify(r#"{"action":"start","interval":"soon","requestId":"m1"}"#);
        match frame {
            InboundFrame::MalformedControl {
                action,
                request_id,
                reason,
            } => {
                assert_eq!(action, ControlAction::Start);
                assert_eq!(request_id.as_deref(), Some("m1"));
                assert!(!reason.is_empty());
            }
            other => panic!("Expected MalformedControl, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_control_response() {
        let json = BroadcastControlResponse::failure(ControlAction::Start, "bad port", Some("f1".to_string()))
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["action"], "start");
        assert_eq!(value["success"], false);
        assert_eq!(value["message"], "bad port");
        assert_eq!(value["requestId"], "f1");
    }

    #[test]
    fn test_classify_get_server_ip() {
        assert_eq!(
            InboundFrame::classify(GET_SERVER_IP_COMMAND),
            InboundFrame::GetServerIp
        );
    }

    #[test]
    fn test_classify_fallback_relay() {
        for text in ["hello there", "{not json", r#"{"foo":1}"#, "[1,2,3]", "get_server_ip"] {
            assert_eq!(
                InboundFrame::classify(text),
                InboundFrame::Relay(text.to_string()),
                "frame {:?}",
                text
            );
        }
    }

    // -------------------------------------------------------------------------
    // Serialization Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_api_request_relay_frame() {
        let req = ApiRequest::new("getData", Some("x".to_string()));
        assert_eq!(
            req.to_relay_frame().unwrap(),
            r#"API_REQUEST:{"action":"getData","data":{},"requestId":"x"}"#
        );
    }

    #[test]
    fn test_api_response_reserializes_identically() {
        let text = r#"{"action":"getData","success":true,"data":{},"message":"ok","requestId":"x"}"#;
        let resp: ApiResponse = serde_json::from_str(text).unwrap();
        assert_eq!(resp.to_json().unwrap(), text);
    }

    #[test]
    fn test_status_response_embeds_status() {
        let status = BroadcastStatus {
            is_active: true,
            interval: 1000,
            message_template: "t".to_string(),
            clients_connected: 2,
            messages_sent: 7,
            port: 2505,
        };
        let json = BroadcastControlResponse::ok(ControlAction::Status, "Broadcast status retrieved", None)
            .with_status(status)
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["action"], "status");
        assert_eq!(value["success"], true);
        assert_eq!(value["status"]["isActive"], true);
        assert_eq!(value["status"]["messageTemplate"], "t");
        assert_eq!(value["status"]["clientsConnected"], 2);
        assert_eq!(value["status"]["messagesSent"], 7);
        assert_eq!(value["status"]["port"], 2505);
    }

    #[test]
    fn test_stop_response_omits_status() {
        let json = BroadcastControlResponse::ok(ControlAction::Stop, "Broadcast stopped", None)
            .to_json()
            .unwrap();
        assert!(!json.contains("status\":{"));
        assert!(json.contains("\"action\":\"stop\""));
    }

    #[test]
    fn test_token_builders() {
        assert_eq!(client_count_frame(3), "CLIENT_COUNT:3");
        assert_eq!(server_ip_frame("10.0.0.2"), "SERVER_IP:10.0.0.2");
        assert_eq!(broadcast_mirror_frame("x"), "UDP_BROADCAST:x");
    }
}
