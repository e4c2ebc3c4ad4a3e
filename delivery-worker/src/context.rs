use std::sync::Arc;

use delivery_common::dedup::DedupStore;
use delivery_common::kafka_producer::EventProducer;
use delivery_common::retry::RetryPolicy;
use delivery_common::store::MessageStore;

use crate::adapter::AdapterClient;
use crate::resolver::AdapterResolver;

/// Everything a processing task needs, built once at startup and shared by every task.
pub struct WorkerContext {
    pub dedup: Arc<dyn DedupStore>,
    pub store: Arc<dyn MessageStore>,
    pub producer: Arc<dyn EventProducer>,
    pub adapter: AdapterClient,
    pub resolver: AdapterResolver,
    pub retry_policy: RetryPolicy,
    /// Topic for per-recipient success events.
    pub outgoing_topic: String,
    /// Topic for dead-letter events.
    pub dlq_topic: String,
}
