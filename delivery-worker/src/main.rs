//! Consume messages from the inbound topic and deliver them to every recipient through the
//! channel adapters.
use std::sync::Arc;

use envconfig::Envconfig;
use rdkafka::producer::Producer;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use delivery_common::dedup::RedisDedupStore;
use delivery_common::health::HealthRegistry;
use delivery_common::kafka_consumer::SingleTopicConsumer;
use delivery_common::kafka_producer::create_kafka_producer;
use delivery_common::metrics::{serve, setup_metrics_recorder};
use delivery_common::store::PgMessageStore;
use delivery_worker::adapter::AdapterClient;
use delivery_worker::config::Config;
use delivery_worker::context::WorkerContext;
use delivery_worker::error::WorkerError;
use delivery_worker::handlers::app;
use delivery_worker::resolver::AdapterResolver;
use delivery_worker::worker::DeliveryWorker;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    setup_tracing();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");

    let producer = create_kafka_producer(
        &config.kafka,
        liveness.register("rdkafka_producer", time::Duration::seconds(30)),
    )
    .await?;
    let producer = Arc::new(producer);

    let consumer = SingleTopicConsumer::new(
        config.kafka.clone(),
        config.consumer_config(),
        liveness.register("rdkafka_consumer", time::Duration::seconds(30)),
    )?;

    let dedup = RedisDedupStore::new(
        &config.redis_url,
        config.dedup_key_prefix.as_str(),
        config.dedup_ttl(),
    )
    .await
    .expect("failed to connect to the dedup store");

    let store = PgMessageStore::new(&config.database_url, config.max_pg_connections)
        .expect("failed to initialize the message store");

    let adapter = AdapterClient::new(config.request_timeout_ms.0)
        .expect("failed to construct reqwest client for adapter requests");

    let context = Arc::new(WorkerContext {
        dedup: Arc::new(dedup),
        store: Arc::new(store),
        producer: producer.clone(),
        adapter,
        resolver: AdapterResolver::new((&config.adapters).into()),
        retry_policy: config.retry_policy(),
        outgoing_topic: config.outgoing_topic.0.clone(),
        dlq_topic: config.dlq_topic.0.clone(),
    });

    let worker = DeliveryWorker::new(
        consumer,
        context,
        config.max_concurrent_messages,
        liveness.register("worker", time::Duration::seconds(60)),
    );

    let recorder_handle = setup_metrics_recorder().expect("failed to install metrics recorder");
    let router = app(liveness, Some(recorder_handle));
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let result = worker.run(shutdown_signal()).await;

    info!("flushing producer");
    if let Err(error) = producer.flush(std::time::Duration::from_millis(u64::from(
        config.kafka.kafka_message_timeout_ms,
    ))) {
        error!("failed to flush producer: {}", error);
    }

    result
}
