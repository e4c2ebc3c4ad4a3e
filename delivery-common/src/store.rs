use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use thiserror::Error;

use crate::message::{DeliveryReport, MessageState};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

/// Persistent record of a message's lifecycle, keyed by message id.
///
/// The worker is the only writer while it holds the dedup record for a message; the store itself
/// does not lock rows.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Upsert the record into PROCESSING.
    async fn mark_processing(
        &self,
        message_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record the terminal state along with who received the message and who did not.
    async fn complete(
        &self,
        message_id: &str,
        state: MessageState,
        report: &DeliveryReport,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// A `MessageStore` backed by the `messages` table in Postgres.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    /// Build a store with a lazily connected pool: the first query opens the connection.
    pub fn new(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|error| StoreError::PoolCreationError { error })?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn mark_processing(
        &self,
        message_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let base_query = r#"
INSERT INTO messages (message_id, state, updated_at)
VALUES ($1, $2, $3)
ON CONFLICT (message_id) DO UPDATE
SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
        "#;

        sqlx::query(base_query)
            .bind(message_id)
            .bind(MessageState::Processing)
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPSERT".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn complete(
        &self,
        message_id: &str,
        state: MessageState,
        report: &DeliveryReport,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let base_query = r#"
INSERT INTO messages (message_id, state, delivered_to, failed_to, updated_at)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (message_id) DO UPDATE
SET
    state = EXCLUDED.state,
    delivered_to = EXCLUDED.delivered_to,
    failed_to = EXCLUDED.failed_to,
    updated_at = EXCLUDED.updated_at
        "#;

        sqlx::query(base_query)
            .bind(message_id)
            .bind(state)
            .bind(&report.delivered_to)
            .bind(Json(&report.failed_to))
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPSERT".to_owned(),
                error,
            })?;

        Ok(())
    }
}
