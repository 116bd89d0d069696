//! # Messages
//!
//! Data that crosses a boundary: the payload published on the broker, the
//! request handed to an actor, the buffered operations of one transaction
//! and the checkpoint record persisted by the actor runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Session used for notifications that do not belong to a client session.
pub const DEFAULT_SESSION: &str = "default";

/// Wire payload published on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub to: String,
    pub from: String,
    pub session_id: String,
    #[serde(default)]
    pub token: Option<String>,
    pub topic: String,
    pub value: Value,
}

impl TopicMessage {
    pub fn new(topic: impl Into<String>, from: impl Into<String>, value: Value) -> Self {
        let topic = topic.into();
        Self {
            to: topic.clone(),
            from: from.into(),
            session_id: DEFAULT_SESSION.to_string(),
            token: None,
            topic,
            value,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// The actor runtime's standard inbound request, built from a [`TopicMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRequest {
    /// Identity of the receiving actor.
    pub to: String,
    pub from: String,
    pub session_id: String,
    pub token: Option<String>,
    /// Handler name resolved from the receiver's subscription map.
    pub method: String,
    pub topic: String,
    pub value: Value,
}

impl InboundRequest {
    pub fn from_message(to: impl Into<String>, method: impl Into<String>, message: TopicMessage) -> Self {
        Self {
            to: to.into(),
            from: message.from,
            session_id: message.session_id,
            token: message.token,
            method: method.into(),
            topic: message.topic,
            value: message.value,
        }
    }
}

/// One operation buffered inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PendingOperation {
    Publish { topic: String, value: Value },
    Subscribe { topic: String, handler: String },
    /// `None` means every topic committed at replay time.
    Unsubscribe { topic: Option<String> },
}

/// Persisted state of a pub/sub plug.
///
/// Serialized as `{ "subscribed": {topic: handler}, "pendingLog": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub subscribed: BTreeMap<String, String>,
    pub pending_log: Vec<PendingOperation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_record_shape() {
        let checkpoint = Checkpoint {
            subscribed: BTreeMap::from([("forum-topic1".to_string(), "handler1".to_string())]),
            pending_log: vec![
                PendingOperation::Publish {
                    topic: "forum-topic1".into(),
                    value: json!("hello1"),
                },
                PendingOperation::Unsubscribe { topic: None },
            ],
        };

        let value = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(
            value,
            json!({
                "subscribed": { "forum-topic1": "handler1" },
                "pendingLog": [
                    { "op": "publish", "topic": "forum-topic1", "value": "hello1" },
                    { "op": "unsubscribe", "topic": null }
                ]
            })
        );
    }

    #[test]
    fn test_inbound_request_keeps_origin_metadata() {
        let mut message = TopicMessage::new("forum-topic1", "carol-c", json!("hello1"));
        message.session_id = "s42".into();
        message.token = Some("tok".into());

        let raw = message.encode().unwrap();
        let request = InboundRequest::from_message("alice-a", "handler1", TopicMessage::decode(&raw).unwrap());

        assert_eq!(request.to, "alice-a");
        assert_eq!(request.from, "carol-c");
        assert_eq!(request.session_id, "s42");
        assert_eq!(request.token.as_deref(), Some("tok"));
        assert_eq!(request.method, "handler1");
        assert_eq!(request.value, json!("hello1"));
    }

    #[test]
    fn test_missing_token_defaults_to_none() {
        let raw = r#"{"to":"t","from":"f","sessionId":"default","topic":"t","value":1}"#;
        let message = TopicMessage::decode(raw).unwrap();
        assert!(message.token.is_none());
    }
}
