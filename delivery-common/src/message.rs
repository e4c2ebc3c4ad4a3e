use std::collections::HashMap;
use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A message event as produced on the inbound topic.
///
/// Decoding is lenient: the ingestion API owns validation, so every field falls back to a default
/// when missing or `null`. A missing `message_id` decodes as an empty string and is rejected by
/// the worker.
///
/// The event is kept exactly as received next to the typed fields, and serializing a `Message`
/// writes that event back out unchanged, including fields this worker does not know about.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    fields: MessageFields,
    raw: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct MessageFields {
    #[serde(default, deserialize_with = "null_as_default")]
    message_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    conversation_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    sender_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    recipient_ids: Vec<String>,
    #[serde(default)]
    channel_hint: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    payload_type: PayloadType,
    #[serde(default)]
    payload_ref: Option<PayloadRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: HashMap<String, Value>,
    #[serde(default)]
    created_at: Option<f64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let fields = MessageFields::deserialize(&raw).map_err(de::Error::custom)?;

        Ok(Message { fields, raw })
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.raw.serialize(serializer)
    }
}

impl Message {
    pub fn message_id(&self) -> &str {
        &self.fields.message_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.fields.conversation_id
    }

    pub fn sender_id(&self) -> &str {
        &self.fields.sender_id
    }

    /// Delivery is attempted in this order.
    pub fn recipient_ids(&self) -> &[String] {
        &self.fields.recipient_ids
    }

    pub fn channel_hint(&self) -> Option<&str> {
        self.fields.channel_hint.as_deref()
    }

    pub fn payload_type(&self) -> PayloadType {
        self.fields.payload_type
    }

    pub fn payload_ref(&self) -> Option<&PayloadRef> {
        self.fields.payload_ref.as_ref()
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.fields.metadata
    }

    /// Unix seconds, as assigned by the producer.
    pub fn created_at(&self) -> Option<f64> {
        self.fields.created_at
    }

    /// The event as it was received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The recipients to deliver to, in order, with repeated identifiers removed.
    pub fn unique_recipients(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::with_capacity(self.fields.recipient_ids.len());
        self.fields
            .recipient_ids
            .iter()
            .map(String::as_str)
            .filter(|recipient| seen.insert(*recipient))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    #[default]
    Text,
    Image,
    Video,
    File,
    Document,
}

/// Either inline text or a reference to uploaded media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadRef {
    Text(String),
    Media {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

/// Lifecycle of a message as recorded in the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_state")]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageState {
    Sent,
    Processing,
    Delivered,
    Partial,
    Failed,
}

impl MessageState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageState::Delivered | MessageState::Partial | MessageState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Sent => "SENT",
            MessageState::Processing => "PROCESSING",
            MessageState::Delivered => "DELIVERED",
            MessageState::Partial => "PARTIAL",
            MessageState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recipient that could not be reached after exhausting its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientFailure {
    #[serde(rename = "recipient")]
    pub recipient_id: String,
    pub error: String,
}

impl RecipientFailure {
    pub fn new(recipient_id: &str, error: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.to_owned(),
            error: error.into(),
        }
    }
}

/// Per-recipient outcome of processing one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered_to: Vec<String>,
    pub failed_to: Vec<RecipientFailure>,
}

impl DeliveryReport {
    pub fn record_success(&mut self, recipient_id: &str) {
        self.delivered_to.push(recipient_id.to_owned());
    }

    pub fn record_failure(&mut self, recipient_id: &str, error: impl Into<String>) {
        self.failed_to
            .push(RecipientFailure::new(recipient_id, error));
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_to.is_empty()
    }

    /// The terminal state this report maps to. A message with no successful recipient is FAILED,
    /// including one that had no recipients at all.
    pub fn state(&self) -> MessageState {
        match (self.delivered_to.is_empty(), self.failed_to.is_empty()) {
            (true, _) => MessageState::Failed,
            (false, true) => MessageState::Delivered,
            (false, false) => MessageState::Partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_deserialization() {
        let message: Message = serde_json::from_value(json!({
            "message_id": "m1",
            "conversation_id": "conv:alice:bob",
            "sender_id": "alice",
            "recipient_ids": ["tg_1", "wa_2"],
            "channel_hint": null,
            "payload_type": "text",
            "payload_ref": "hello",
            "metadata": {"source": "api"},
            "created_at": 1700000000.25
        }))
        .unwrap();

        assert_eq!(message.message_id(), "m1");
        assert_eq!(message.recipient_ids(), ["tg_1", "wa_2"]);
        assert_eq!(message.channel_hint(), None);
        assert_eq!(message.payload_type(), PayloadType::Text);
        assert_eq!(
            message.payload_ref(),
            Some(&PayloadRef::Text("hello".to_owned()))
        );
        assert_eq!(message.metadata().get("source"), Some(&json!("api")));
        assert_eq!(message.created_at(), Some(1700000000.25));
    }

    #[test]
    fn test_media_payload_ref() {
        let message: Message = serde_json::from_value(json!({
            "message_id": "m2",
            "recipient_ids": ["ig_9"],
            "payload_type": "image",
            "payload_ref": {"url": "https://cdn.example.com/cat.png", "mime": "image/png"}
        }))
        .unwrap();

        assert_eq!(message.payload_type(), PayloadType::Image);
        assert_eq!(
            message.payload_ref(),
            Some(&PayloadRef::Media {
                url: "https://cdn.example.com/cat.png".to_owned(),
                mime: Some("image/png".to_owned()),
                caption: None,
            })
        );
    }

    #[test]
    fn test_missing_message_id_decodes_as_empty() {
        let message: Message =
            serde_json::from_value(json!({"conversation_id": "c1", "recipient_ids": ["tg_1"]}))
                .unwrap();

        assert!(message.message_id().is_empty());
        assert_eq!(message.payload_type(), PayloadType::Text);
    }

    #[test]
    fn test_null_fields_decode_as_defaults() {
        let message: Message = serde_json::from_value(json!({
            "message_id": "m1",
            "conversation_id": null,
            "sender_id": null,
            "recipient_ids": null,
            "payload_type": null,
            "metadata": null
        }))
        .unwrap();

        assert_eq!(message.message_id(), "m1");
        assert!(message.conversation_id().is_empty());
        assert!(message.sender_id().is_empty());
        assert!(message.recipient_ids().is_empty());
        assert_eq!(message.payload_type(), PayloadType::Text);
        assert!(message.metadata().is_empty());
    }

    #[test]
    fn test_serializes_as_received() {
        let raw = json!({
            "message_id": "m1",
            "recipient_ids": ["tg_1"],
            "created_at": 1700000000,
            "state": "SENT",
            "trace_id": "abc"
        });

        let message: Message = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(message.created_at(), Some(1700000000.0));
        assert_eq!(serde_json::to_value(&message).unwrap(), raw);
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        assert!(serde_json::from_value::<Message>(json!(["m1"])).is_err());
        assert!(serde_json::from_value::<Message>(json!({"recipient_ids": "tg_1"})).is_err());
    }

    #[test]
    fn test_unique_recipients_keeps_first_occurrence() {
        let message: Message = serde_json::from_value(json!({
            "message_id": "m1",
            "recipient_ids": ["tg_1", "wa_2", "tg_1", "ig_3"]
        }))
        .unwrap();

        assert_eq!(message.unique_recipients(), vec!["tg_1", "wa_2", "ig_3"]);
    }

    #[test]
    fn test_report_state_aggregation() {
        let mut report = DeliveryReport::default();
        assert_eq!(report.state(), MessageState::Failed);

        report.record_success("tg_1");
        assert_eq!(report.state(), MessageState::Delivered);

        report.record_failure("wa_2", "Adapter returned 500");
        assert_eq!(report.state(), MessageState::Partial);

        let only_failures = DeliveryReport {
            delivered_to: vec![],
            failed_to: vec![RecipientFailure::new("wa_2", "boom")],
        };
        assert_eq!(only_failures.state(), MessageState::Failed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MessageState::Sent.is_terminal());
        assert!(!MessageState::Processing.is_terminal());
        assert!(MessageState::Delivered.is_terminal());
        assert!(MessageState::Partial.is_terminal());
        assert!(MessageState::Failed.is_terminal());
    }

    #[test]
    fn test_recipient_failure_serializes_recipient_key() {
        let failure = RecipientFailure::new("wa_2", "timed out");
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"recipient": "wa_2", "error": "timed out"})
        );
    }
}
