use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ProtoError, Result};
use crate::event_class::{namespaced, sender_of, BROADCAST};

/// Default maximum encoded envelope size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// The data-channel wire envelope.
///
/// Wire format (JSON text, one envelope per data-channel message):
/// ```text
/// {"id":"<uuid>","destination":"*","requestId":"<uuid>","eventClass":"app.EVENT","event":{...}}
/// ```
/// `requestId` is present only on responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuppetMessage {
    /// Unique per message.
    pub id: String,
    /// Application name, or `*` for everyone.
    pub destination: String,
    /// `id` of the request this message answers.
    #[serde(
        rename = "requestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
    /// Namespaced event class.
    #[serde(rename = "eventClass")]
    pub event_class: String,
    /// Opaque application payload.
    #[serde(default)]
    pub event: Value,
}

impl MuppetMessage {
    /// True if this message answers a request.
    pub fn is_response(&self) -> bool {
        self.request_id.is_some()
    }

    /// Dedup key used by the outbound queue.
    pub fn queue_key(&self) -> (&str, &str) {
        (&self.event_class, &self.destination)
    }
}

/// Builds envelopes on behalf of one client.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    client_name: String,
}

impl MessageBuilder {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Build an envelope with a fresh id, namespacing `event_class` to this client.
    pub fn build(
        &self,
        event_class: &str,
        event: Value,
        destination: &str,
        request_id: Option<&str>,
    ) -> MuppetMessage {
        MuppetMessage {
            id: Uuid::new_v4().to_string(),
            destination: destination.to_string(),
            request_id: request_id.map(str::to_string),
            event_class: namespaced(&self.client_name, event_class),
            event,
        }
    }

    /// Build a broadcast envelope.
    pub fn broadcast(&self, event_class: &str, event: Value) -> MuppetMessage {
        self.build(event_class, event, BROADCAST, None)
    }

    /// Build a response to `request`, addressed to the client that asked.
    ///
    /// Falls back to [`BROADCAST`] when the request's event class carries no
    /// client prefix.
    pub fn response(&self, request: &MuppetMessage, event_class: &str, event: Value) -> MuppetMessage {
        let asker = sender_of(&request.event_class).unwrap_or(BROADCAST);
        self.build(event_class, event, asker, Some(&request.id))
    }
}

/// Envelope codec limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeConfig {
    /// Maximum encoded size in bytes. Default: 16 MiB.
    pub max_message_size: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Encode an envelope to its JSON text form.
pub fn encode_message(message: &MuppetMessage, max_size: usize) -> Result<String> {
    let text = serde_json::to_string(message)?;
    if text.len() > max_size {
        return Err(ProtoError::MessageTooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    Ok(text)
}

/// Decode an envelope from a data-channel frame.
pub fn decode_message(data: &[u8], max_size: usize) -> Result<MuppetMessage> {
    if data.len() > max_size {
        return Err(ProtoError::MessageTooLarge {
            size: data.len(),
            max: max_size,
        });
    }
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_build_namespaces_and_generates_ids() {
        let builder = MessageBuilder::new("viewer");
        let a = builder.broadcast("CLICK", json!({"x": 1}));
        let b = builder.broadcast("CLICK", json!({"x": 1}));

        assert_eq!(a.event_class, "viewer.CLICK");
        assert_eq!(a.destination, "*");
        assert!(a.request_id.is_none());
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_response_references_request_id() {
        let asker = MessageBuilder::new("editor");
        let answerer = MessageBuilder::new("viewer");
        let request = asker.build("GET_STATE", json!({}), "viewer", None);
        let response = answerer.response(&request, "STATE", json!({"zoom": 2}));

        assert_eq!(response.request_id.as_deref(), Some(request.id.as_str()));
        assert!(response.is_response());
        assert_eq!(response.event_class, "viewer.STATE");
        assert_eq!(response.destination, "editor");
    }

    #[test]
    fn test_response_to_unprefixed_request_is_broadcast() {
        let answerer = MessageBuilder::new("viewer");
        let request = MuppetMessage {
            id: "r1".to_string(),
            destination: "*".to_string(),
            request_id: None,
            event_class: "GET_STATE".to_string(),
            event: Value::Null,
        };
        let response = answerer.response(&request, "STATE", Value::Null);
        assert_eq!(response.destination, BROADCAST);
    }

    #[test]
    fn test_wire_field_names() {
        let builder = MessageBuilder::new("viewer");
        let msg = builder.build("A", json!({"k": "v"}), "editor", Some("req-1"));
        let value: Value =
            serde_json::from_str(&encode_message(&msg, DEFAULT_MAX_MESSAGE_SIZE).unwrap()).unwrap();

        assert_eq!(value["eventClass"], "viewer.A");
        assert_eq!(value["requestId"], "req-1");
        assert_eq!(value["destination"], "editor");
        assert_eq!(value["event"]["k"], "v");
    }

    #[test]
    fn test_request_id_omitted_when_absent() {
        let msg = MessageBuilder::new("viewer").broadcast("A", json!({}));
        let text = encode_message(&msg, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert!(!text.contains("requestId"));
    }

    #[test]
    fn test_decode_foreign_envelope() {
        let frame = br#"{"id":"1","destination":"*","eventClass":"other.PING","event":{"n":3}}"#;
        let msg = decode_message(frame, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(msg.id, "1");
        assert_eq!(msg.event_class, "other.PING");
        assert_eq!(msg.event["n"], 3);
        assert!(msg.request_id.is_none());
    }

    #[test]
    fn test_decode_missing_event_defaults_to_null() {
        let frame = br#"{"id":"1","destination":"*","eventClass":"x.Y"}"#;
        let msg = decode_message(frame, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert!(msg.event.is_null());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_message(b"not json", DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, ProtoError::Json(_)));
    }

    #[test]
    fn test_size_limit_enforced_both_ways() {
        let msg = MessageBuilder::new("viewer").broadcast("BIG", json!("x".repeat(256)));
        let err = encode_message(&msg, 64).unwrap_err();
        assert!(matches!(err, ProtoError::MessageTooLarge { max: 64, .. }));

        let err = decode_message(&[b' '; 65], 64).unwrap_err();
        assert!(matches!(err, ProtoError::MessageTooLarge { size: 65, .. }));
    }
}
