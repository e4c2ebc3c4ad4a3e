use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{deserialize_unix_seconds, serialize_unix_seconds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
}

/// Emitted on the outgoing topic once per recipient that accepted a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredEvent {
    pub message_id: String,
    pub recipient_id: String,
    pub status: DeliveryStatus,
    #[serde(
        serialize_with = "serialize_unix_seconds",
        deserialize_with = "deserialize_unix_seconds"
    )]
    pub timestamp: DateTime<Utc>,
}

impl DeliveredEvent {
    pub fn new(message_id: &str, recipient_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.to_owned(),
            recipient_id: recipient_id.to_owned(),
            status: DeliveryStatus::Delivered,
            timestamp,
        }
    }

    /// Partition key, so that every event for one message lands on the same partition.
    pub fn key(&self) -> &str {
        &self.message_id
    }
}
