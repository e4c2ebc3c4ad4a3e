use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{deserialize_unix_seconds, serialize_unix_seconds};
use crate::message::{Message, RecipientFailure};

/// Emitted once per message that had at least one recipient fail permanently. Carries the
/// original message untouched so it can be replayed or inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    pub message_id: String,
    pub failures: Vec<RecipientFailure>,
    pub original: Message,
    #[serde(
        serialize_with = "serialize_unix_seconds",
        deserialize_with = "deserialize_unix_seconds"
    )]
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEvent {
    pub fn new(original: &Message, failures: &[RecipientFailure], timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id: original.message_id().to_owned(),
            failures: failures.to_vec(),
            original: original.clone(),
            timestamp,
        }
    }

    pub fn key(&self) -> &str {
        &self.message_id
    }
}
