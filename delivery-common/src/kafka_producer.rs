use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use serde::Serialize;
use serde_json::error::Error as SerdeError;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::health::HealthHandle;

/// Client context shared by the worker's producer and consumer.
pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        metrics::gauge!("delivery_kafka_callback_queue_depth", "client" => stats.client_type)
            .set(stats.replyq as f64);
    }
}

impl ConsumerContext for KafkaContext {}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> = client_config.create_with_context(liveness.into())?;

    // "Ping" the Kafka brokers by requesting metadata
    match api.client().fetch_metadata(None, Duration::from_secs(15)) {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: SerdeError },
    #[error("failed to produce to {topic}: {error}")]
    KafkaProduceError { topic: String, error: KafkaError },
    #[error("failed to produce to {topic} (timeout)")]
    KafkaProduceCanceled { topic: String },
}

/// The write side of the event stream: a keyed record per call, acknowledged before returning.
#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn produce(&self, topic: &str, key: &str, payload: String) -> Result<(), ProduceError>;
}

/// Serialize `event` as JSON and produce it under `key`.
pub async fn produce_json<T, P>(
    producer: &P,
    topic: &str,
    key: &str,
    event: &T,
) -> Result<(), ProduceError>
where
    T: Serialize,
    P: EventProducer + ?Sized,
{
    let payload = serde_json::to_string(event)
        .map_err(|error| ProduceError::SerializationError { error })?;

    producer.produce(topic, key, payload).await?;
    metrics::counter!("delivery_events_produced_total", "topic" => topic.to_owned()).increment(1);

    Ok(())
}

#[async_trait]
impl EventProducer for FutureProducer<KafkaContext> {
    async fn produce(&self, topic: &str, key: &str, payload: String) -> Result<(), ProduceError> {
        let record = FutureRecord {
            topic,
            payload: Some(&payload),
            partition: None,
            key: Some(key),
            timestamp: None,
            headers: None,
        };

        let delivery = self
            .send_result(record)
            .map_err(|(error, _)| ProduceError::KafkaProduceError {
                topic: topic.to_owned(),
                error,
            })?;

        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((error, _))) => Err(ProduceError::KafkaProduceError {
                topic: topic.to_owned(),
                error,
            }),
            // Cancelled due to timeout while retrying
            Err(_) => Err(ProduceError::KafkaProduceCanceled {
                topic: topic.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRegistry;
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::Message;
    use serde_json::{json, Value};

    async fn create_mock_kafka() -> (
        MockCluster<'static, DefaultProducerContext>,
        FutureProducer<KafkaContext>,
    ) {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("producer", time::Duration::seconds(30));
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");

        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_tls: false,
        };

        (
            cluster,
            create_kafka_producer(&config, handle)
                .await
                .expect("failed to create mocked kafka producer"),
        )
    }

    #[tokio::test]
    async fn test_produce_json_is_keyed() {
        let (cluster, producer) = create_mock_kafka().await;
        let topic = "outgoing.messages";

        produce_json(&producer, topic, "m1", &json!({"message_id": "m1"}))
            .await
            .expect("failed to produce");

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", cluster.bootstrap_servers())
            .set("group.id", "mock")
            .set("auto.offset.reset", "earliest")
            .create()
            .expect("failed to create mock consumer");
        consumer.subscribe(&[topic]).unwrap();

        let kafka_msg = consumer.recv().await.unwrap();
        assert_eq!(kafka_msg.key(), Some("m1".as_bytes()));

        let received: Value = serde_json::from_slice(kafka_msg.payload().unwrap()).unwrap();
        assert_eq!(received, json!({"message_id": "m1"}));
    }
}
