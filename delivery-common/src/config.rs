use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

/// Settings for the single-topic consumer. Built by the worker from its own config, since the
/// topic and group are worker specific.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,
    pub kafka_consumer_offset_reset: String, // earliest, latest
    pub kafka_consumer_auto_commit_interval_ms: u32,
}

impl ConsumerConfig {
    pub fn new(group: &str, topic: &str) -> Self {
        Self {
            kafka_consumer_group: group.to_owned(),
            kafka_consumer_topic: topic.to_owned(),
            kafka_consumer_offset_reset: "earliest".to_owned(),
            kafka_consumer_auto_commit_interval_ms: 5000,
        }
    }

    pub fn offset_reset(mut self, offset_reset: &str) -> Self {
        self.kafka_consumer_offset_reset = offset_reset.to_owned();
        self
    }
}
