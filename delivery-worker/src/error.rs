use delivery_common::dedup::DedupError;
use delivery_common::kafka_consumer::RecvErr;
use delivery_common::kafka_producer::ProduceError;
use delivery_common::store::StoreError;
use thiserror::Error;

/// Why a single adapter call did not deliver.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("{0}")]
    Retryable(RetryableError),
    #[error("{0}")]
    InvalidRequest(InvalidRequestError),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Retryable(_))
    }
}

/// Faults that may clear up by themselves: the adapter was unreachable or refused the message.
#[derive(Error, Debug)]
pub enum RetryableError {
    #[error("Adapter request failed: {0}")]
    Transport(reqwest::Error),
    #[error("Adapter returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Faults in what we are sending, which no amount of retrying will fix.
#[derive(Error, Debug)]
pub enum InvalidRequestError {
    #[error("invalid adapter url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to encode adapter request: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<RetryableError> for AdapterError {
    fn from(error: RetryableError) -> Self {
        AdapterError::Retryable(error)
    }
}

impl From<InvalidRequestError> for AdapterError {
    fn from(error: InvalidRequestError) -> Self {
        AdapterError::InvalidRequest(error)
    }
}

/// Infrastructure faults. Any of these stops the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("dedup store error: {0}")]
    DedupError(#[from] DedupError),
    #[error("message store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("failed to emit event: {0}")]
    ProduceError(#[from] ProduceError),
    #[error("failed to consume from the inbound topic: {0}")]
    ConsumeError(#[from] RecvErr),
    #[error("failed to create kafka client: {0}")]
    KafkaError(#[from] rdkafka::error::KafkaError),
    #[error("a processing task panicked or was cancelled: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}
