//! Protocol messages exchanged between client and server sessions.
//!
//! A [`Message`] is the sole unit of exchange: a discriminated kind, an action
//! identifier, a key-value payload and success/error metadata.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::contract::keys;
use crate::error::Result;

/// Message kinds in the session protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// Client-initiated request
    Request,
    /// Server reply to a request
    Response,
    /// Unsolicited server message
    Notification,
}

/// Protocol message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Operation selector, e.g. `LOGIN`
    pub action: String,
    /// Key-value payload
    #[serde(rename = "data", default)]
    pub payload: HashMap<String, Value>,
    /// Outcome flag (responses and notifications)
    #[serde(default)]
    pub success: bool,
    /// Human-readable text (responses and notifications)
    #[serde(default)]
    pub message: String,
    /// Creation time (Unix millis), non-decreasing per process; 0 when absent on the wire
    #[serde(default)]
    pub timestamp: u64,
}

impl Message {
    fn new(kind: MessageKind, action: &str, success: bool, text: &str) -> Self {
        Self {
            kind,
            action: action.to_string(),
            payload: HashMap::new(),
            success,
            message: text.to_string(),
            timestamp: current_timestamp(),
        }
    }

    /// Create a REQUEST message
    pub fn request(action: &str) -> Self {
        Self::new(MessageKind::Request, action, false, "")
    }

    /// Create a RESPONSE message
    pub fn response(action: &str, success: bool, text: &str) -> Self {
        Self::new(MessageKind::Response, action, success, text)
    }

    /// Create a successful RESPONSE
    pub fn success_response(action: &str, text: &str) -> Self {
        Self::response(action, true, text)
    }

    /// Create a failed RESPONSE
    pub fn error_response(action: &str, text: &str) -> Self {
        Self::response(action, false, text)
    }

    /// Create a NOTIFICATION message
    pub fn notification(action: &str, text: &str) -> Self {
        Self::new(MessageKind::Notification, action, true, text)
    }

    /// Builder-style payload insertion
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Insert a raw JSON value
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.payload.insert(key.to_string(), value.into());
    }

    /// Serialize `value` and store it under `key`
    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.payload
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Raw payload value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Typed payload value.
    ///
    /// A missing key or a value of the wrong shape reads as `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.payload
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// String payload value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Integer payload value
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }

    /// Whether the payload contains `key`
    pub fn has(&self, key: &str) -> bool {
        self.payload.contains_key(key)
    }

    /// Correlation identifier carried in the payload, if any
    pub fn correlation_id(&self) -> Option<&str> {
        self.get_str(keys::CORRELATION_ID)
    }

    /// Set the correlation identifier
    pub fn set_correlation_id(&mut self, id: &str) {
        self.insert(keys::CORRELATION_ID, id);
    }

    /// Builder-style correlation identifier
    pub fn with_correlation_id(mut self, id: &str) -> Self {
        self.set_correlation_id(id);
        self
    }

    /// Check if this is a request
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Check if this is a response
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// Check if this is a notification
    pub fn is_notification(&self) -> bool {
        self.kind == MessageKind::Notification
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Encode as a frame body
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a frame body
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message{{kind={:?}, action='{}', success={}, message='{}', timestamp={}, data={} items}}",
            self.kind,
            self.action,
            self.success,
            self.message,
            self.timestamp,
            self.payload.len()
        )
    }
}

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Current time in milliseconds, never lower than a previously issued value.
fn current_timestamp() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let previous = LAST_TIMESTAMP.fetch_max(now, Ordering::Relaxed);
    previous.max(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_request_message() {
        let msg = Message::request("LOGIN")
            .with_data("username", "alice")
            .with_data("password", "secret");

        assert_eq!(msg.kind, MessageKind::Request);
        assert_eq!(msg.action, "LOGIN");
        assert_eq!(msg.get_str("username"), Some("alice"));
        assert!(msg.is_request());
    }

    #[test]
    fn test_response_factories() {
        let ok = Message::success_response("GET_ALL_COURSES", "done");
        assert!(ok.is_response());
        assert!(ok.success);
        assert_eq!(ok.message, "done");

        let err = Message::error_response("GET_ALL_COURSES", "nope");
        assert!(!err.success);

        let note = Message::notification("BROADCAST", "maintenance at noon");
        assert!(note.is_notification());
        assert!(note.success);
    }

    #[test]
    fn test_missing_key_is_absent() {
        let msg = Message::request("GET_COURSE_INFO").with_data("courseId", "not-a-number");

        assert_eq!(msg.get_as::<i64>("courseId"), None);
        assert_eq!(msg.get_i64("missing"), None);
        assert!(msg.get("missing").is_none());
        assert!(!msg.has("missing"));
    }

    #[test]
    fn test_put_structured_value() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Record {
            id: i64,
            name: String,
        }

        let mut msg = Message::success_response("X", "ok");
        let records = vec![
            Record { id: 1, name: "a".into() },
            Record { id: 2, name: "b".into() },
        ];
        msg.put("records", &records).unwrap();

        let back: Vec<Record> = msg.get_as("records").unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_correlation_id() {
        let msg = Message::request("LOGOUT").with_correlation_id("abc-123");
        assert_eq!(msg.correlation_id(), Some("abc-123"));
        assert_eq!(Message::request("LOGOUT").correlation_id(), None);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut last = 0;
        for _ in 0..1000 {
            let msg = Message::request("PING");
            assert!(msg.timestamp >= last);
            last = msg.timestamp;
        }
    }

    #[test]
    fn test_wire_field_names() {
        let msg = Message::success_response("LOGIN", "Login successful").with_data("user", json!({"username": "alice"}));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "RESPONSE");
        assert_eq!(value["action"], "LOGIN");
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["user"]["username"], "alice");
    }

    #[test]
    fn test_decode_tolerates_missing_metadata() {
        let msg = Message::from_json(r#"{"type":"REQUEST","action":"LOGOUT","timestamp":1}"#).unwrap();
        assert!(msg.payload.is_empty());
        assert!(!msg.success);
        assert_eq!(msg.message, "");
    }

    #[test]
    fn test_decode_without_timestamp() {
        let msg = Message::from_json(r#"{"type":"RESPONSE","action":"LOGIN","success":true}"#).unwrap();
        assert_eq!(msg.timestamp, 0);
        assert!(msg.success);
        assert_eq!(msg.action, "LOGIN");
    }

    #[test]
    fn test_display() {
        let msg = Message::request("LOGIN").with_data("username", "alice");
        let shown = msg.to_string();
        assert!(shown.contains("action='LOGIN'"));
        assert!(shown.contains("data=1 items"));
    }

    fn kind_strategy() -> impl Strategy<Value = MessageKind> {
        prop_oneof![
            Just(MessageKind::Request),
            Just(MessageKind::Response),
            Just(MessageKind::Notification),
        ]
    }

    proptest! {
        #[test]
        fn prop_encode_decode_preserves_message(
            kind in kind_strategy(),
            action in "[A-Z_]{1,24}",
            success in any::<bool>(),
            text in ".{0,40}",
            entries in proptest::collection::hash_map("[a-zA-Z]{1,12}", any::<i64>(), 0..8),
        ) {
            let mut msg = Message::response(&action, success, &text);
            msg.kind = kind;
            for (k, v) in &entries {
                msg.insert(k, *v);
            }

            let decoded = Message::from_slice(&msg.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(decoded, msg);
        }
    }
}
