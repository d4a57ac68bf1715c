//! Message model for daemon requests, responses, and events.
//!
//! Every frame payload is one of three JSON shapes:
//!
//! - [`Request`] (client to server): `{"command", "id", "params", "timestamp"?}`
//! - [`Response`] (server to client): `{"type":"response", "status", "id", "data"?, "error"?, "timestamp"}`
//! - [`EventMessage`] (server to client, unsolicited): `{"type":"event", "event", "id", "data"?, "timestamp"}`
//!
//! Server-to-client payloads share the [`ServerMessage`] envelope so clients
//! can split responses from broadcast events on the `type` tag.
//!
//! # Invariants
//!
//! - Every message carries a non-empty `id`; a response echoes the id of the
//!   request it answers, or a freshly generated one when the request was
//!   unparseable and no id could be trusted.
//! - A response is either fully success (`data` set, `error` absent) or
//!   fully error (`error` set, `data` absent), never both and never neither.
//! - Timestamps are UTC RFC 3339, stamped at creation. Clients use them for
//!   latency measurement; they carry no protocol meaning.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON object type used for request params and response/event data.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Generate a fresh unique message id.
#[must_use]
pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC time as an RFC 3339 string.
#[must_use]
pub fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A command request from a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Command name to dispatch on.
    pub command: String,

    /// Client-chosen correlation id, echoed in the response.
    pub id: String,

    /// Command parameters.
    #[serde(default)]
    pub params: JsonMap,

    /// Optional client-side send time, echoed by `ping`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Request {
    /// Create a request with a freshly generated id.
    #[must_use]
    pub fn new(command: impl Into<String>, params: JsonMap) -> Self {
        Self {
            command: command.into(),
            id: fresh_id(),
            params,
            timestamp: Some(utc_timestamp()),
        }
    }

    /// Returns `true` if this is a keepalive ping.
    ///
    /// Keepalives are intercepted before normal dispatch: they refresh the
    /// connection's idle clock without producing request-level log noise.
    #[must_use]
    pub fn is_keepalive(&self) -> bool {
        self.command == "ping"
            && self
                .params
                .get("keepalive")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
    }
}

/// Parse and validate a request payload, failing closed.
///
/// Returns `None` on invalid UTF-8, invalid JSON, a missing or non-string
/// `command`/`id`, or an empty `command`/`id`. The caller must then respond
/// with an error response carrying a freshly generated id, since nothing in
/// the payload can be trusted.
#[must_use]
pub fn parse_request(payload: &[u8]) -> Option<Request> {
    serde_json::from_slice::<Request>(payload)
        .ok()
        .filter(|request| !request.command.is_empty() && !request.id.is_empty())
}

/// Response status discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The command completed and `data` holds its result.
    Success,
    /// The command failed and `error` holds the reason.
    Error,
}

/// A direct reply to one [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Outcome discriminant.
    pub status: ResponseStatus,

    /// Correlation id echoing the originating request.
    pub id: String,

    /// Result payload, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonMap>,

    /// Failure reason, present only on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Server-side creation time, UTC RFC 3339.
    pub timestamp: String,
}

impl Response {
    /// Create a success response carrying `data`.
    #[must_use]
    pub fn success(request_id: impl Into<String>, data: JsonMap) -> Self {
        Self {
            status: ResponseStatus::Success,
            id: request_id.into(),
            data: Some(data),
            error: None,
            timestamp: utc_timestamp(),
        }
    }

    /// Create an error response.
    ///
    /// When `request_id` is `None` (the request could not be parsed, so its
    /// id cannot be trusted) a fresh id is generated.
    #[must_use]
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            id: request_id.unwrap_or_else(fresh_id),
            data: None,
            error: Some(message.into()),
            timestamp: utc_timestamp(),
        }
    }

    /// Returns `true` if the response reports success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, ResponseStatus::Success)
    }
}

/// An unsolicited event pushed to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessage {
    /// Event type name, e.g. `playlist_item_downloaded`.
    pub event: String,

    /// Unique event id.
    pub id: String,

    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonMap>,

    /// Server-side creation time, UTC RFC 3339.
    pub timestamp: String,
}

impl EventMessage {
    /// Create an event with a fresh id and current timestamp.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Option<JsonMap>) -> Self {
        Self {
            event: event_type.into(),
            id: fresh_id(),
            data,
            timestamp: utc_timestamp(),
        }
    }
}

/// Envelope for everything the server writes to a client.
///
/// Serialized with a `type` tag so clients can route responses to pending
/// requests and events to their broadcast listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Direct reply to a request.
    Response(Response),

    /// Broadcast event.
    Event(EventMessage),
}

impl ServerMessage {
    /// Serialize to frame payload bytes.
    ///
    /// # Errors
    ///
    /// Returns a malformed-payload error if serialization fails (only
    /// possible with non-string-keyed data smuggled into a `data` map).
    pub fn to_payload(&self) -> Result<bytes::Bytes, crate::error::ProtocolError> {
        serde_json::to_vec(self)
            .map(bytes::Bytes::from)
            .map_err(|error| crate::error::ProtocolError::MalformedPayload(error.to_string()))
    }
}

impl From<Response> for ServerMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<EventMessage> for ServerMessage {
    fn from(event: EventMessage) -> Self {
        Self::Event(event)
    }
}
