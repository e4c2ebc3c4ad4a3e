pub mod config;
pub mod dedup;
pub mod health;
pub mod kafka_consumer;
pub mod kafka_messages;
pub mod kafka_producer;
pub mod message;
pub mod metrics;
pub mod retry;
pub mod store;
