use std::time;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_DEDUP_KEY_PREFIX: &str = "worker:dedup:";
pub const DEFAULT_DEDUP_TTL: time::Duration = time::Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("dedup store request failed: {0}")]
    Redis(#[from] RedisError),
    #[error("invalid dedup store configuration: {0}")]
    InvalidConfiguration(String),
}

/// Cross-replica guard ensuring a message id is processed by at most one worker at a time.
///
/// `acquire` is an atomic create-if-absent with an expiry, so a worker that dies mid-message
/// blocks reprocessing of that message for at most the TTL.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Returns `true` if the caller now holds the record for `message_id`.
    async fn acquire(&self, message_id: &str) -> Result<bool, DedupError>;

    /// Drop the record for `message_id`, whoever holds it.
    async fn release(&self, message_id: &str) -> Result<(), DedupError>;
}

#[derive(Clone)]
pub struct RedisDedupStore {
    connection: MultiplexedConnection,
    key_prefix: String,
    ttl: time::Duration,
}

impl RedisDedupStore {
    pub async fn new(
        redis_url: &str,
        key_prefix: &str,
        ttl: time::Duration,
    ) -> Result<Self, DedupError> {
        if ttl.as_secs() == 0 {
            return Err(DedupError::InvalidConfiguration(
                "dedup TTL must be at least one second".to_owned(),
            ));
        }

        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("connected to dedup store");

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_owned(),
            ttl,
        })
    }

    pub fn key(&self, message_id: &str) -> String {
        dedup_key(&self.key_prefix, message_id)
    }
}

pub fn dedup_key(prefix: &str, message_id: &str) -> String {
    format!("{}{}", prefix, message_id)
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn acquire(&self, message_id: &str) -> Result<bool, DedupError> {
        let mut conn = self.connection.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(self.key(message_id))
            .arg("1")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        // SET NX replies nil when the key already exists.
        Ok(result.is_some())
    }

    async fn release(&self, message_id: &str) -> Result<(), DedupError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(message_id)).await?;
        Ok(())
    }
}
