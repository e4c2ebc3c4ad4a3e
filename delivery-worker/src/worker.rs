use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time;

use chrono::Utc;
use delivery_common::health::HealthHandle;
use delivery_common::kafka_consumer::{Offset, RecvErr, SingleTopicConsumer};
use delivery_common::kafka_messages::dead_letter::DeadLetterEvent;
use delivery_common::kafka_messages::delivered::DeliveredEvent;
use delivery_common::kafka_producer::produce_json;
use delivery_common::message::{DeliveryReport, Message, MessageState};
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::WorkerContext;
use crate::error::{AdapterError, WorkerError};

/// How often the run loop reports liveness while it waits for messages.
const HEARTBEAT_INTERVAL: time::Duration = time::Duration::from_secs(10);

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Rejected before any side effect, e.g. for lacking a `message_id`.
    Dropped,
    /// Another execution holds, or recently held, the dedup record.
    Duplicate,
    Completed(MessageState),
}

/// Pulls messages off the inbound topic and processes each one in its own task.
pub struct DeliveryWorker {
    consumer: SingleTopicConsumer,
    context: Arc<WorkerContext>,
    /// Maximum number of messages being processed at once.
    max_concurrent_messages: NonZeroUsize,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl DeliveryWorker {
    pub fn new(
        consumer: SingleTopicConsumer,
        context: Arc<WorkerContext>,
        max_concurrent_messages: NonZeroUsize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            consumer,
            context,
            max_concurrent_messages,
            liveness,
        }
    }

    /// Consume until `shutdown` resolves or an infrastructure fault occurs, then wait for every
    /// in-flight message to finish.
    ///
    /// The first fatal error from the stream or from any processing task is returned.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        let max_concurrent_messages = self.max_concurrent_messages.get();
        let semaphore = Arc::new(Semaphore::new(max_concurrent_messages));
        let report_semaphore_utilization = || {
            metrics::gauge!("delivery_worker_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / max_concurrent_messages as f64,
            );
        };

        let mut tasks = JoinSet::new();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        tokio::pin!(shutdown);

        info!(topic = self.consumer.topic(), "consuming messages");

        let mut result = loop {
            report_semaphore_utilization();
            self.liveness.report_healthy();

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown requested, no longer consuming");
                    break Ok(());
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(error) = task_result(joined) {
                        break Err(error);
                    }
                }
                _ = heartbeat.tick() => {}
                received = self.next_message(&semaphore) => {
                    match received {
                        Ok((message, offset, permit)) => {
                            if let Err(error) = self.dispatch(&mut tasks, message, offset, permit) {
                                break Err(error);
                            }
                        }
                        Err(error) if error.is_poison_pill() => {
                            warn!("dropping undecodable message: {}", error);
                            metrics::counter!("delivery_messages_dropped_total", "reason" => "malformed")
                                .increment(1);
                        }
                        Err(error) => break Err(error.into()),
                    }
                }
            }
        };

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "waiting for in-flight messages");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = task_result(joined) {
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        report_semaphore_utilization();

        result
    }

    /// Wait for a free processing slot, then for the next message.
    async fn next_message(
        &self,
        semaphore: &Arc<Semaphore>,
    ) -> Result<(Message, Offset, OwnedSemaphorePermit), RecvErr> {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore has been closed");

        let (message, offset) = self.consumer.json_recv::<Message>().await?;
        Ok((message, offset, permit))
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<Result<ProcessOutcome, WorkerError>>,
        message: Message,
        offset: Offset,
        permit: OwnedSemaphorePermit,
    ) -> Result<(), WorkerError> {
        metrics::counter!("delivery_messages_consumed_total").increment(1);
        debug!(
            partition = offset.partition(),
            offset = offset.offset(),
            message_id = %message.message_id(),
            "dispatching message"
        );

        offset.store().map_err(RecvErr::from)?;

        let context = self.context.clone();
        tasks.spawn(async move {
            let result = process_message(&context, message).await;
            drop(permit);
            result
        });

        Ok(())
    }
}

fn task_result(
    joined: Result<Result<ProcessOutcome, WorkerError>, tokio::task::JoinError>,
) -> Result<ProcessOutcome, WorkerError> {
    match joined {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(error)) => {
            error!("failed to process message: {}", error);
            Err(error)
        }
        Err(join_error) => {
            error!("processing task failed: {}", join_error);
            Err(join_error.into())
        }
    }
}

/// Deliver one message to all of its recipients and record the result.
///
/// The dedup record is acquired first and released last. The store is updated to PROCESSING
/// before any delivery and to the terminal state before events are emitted: one success event
/// per delivered recipient, and a single dead-letter event if anyone failed.
///
/// Errors are infrastructure faults only. Adapter failures end up in the report instead.
pub async fn process_message(
    context: &WorkerContext,
    message: Message,
) -> Result<ProcessOutcome, WorkerError> {
    let message_id = message.message_id();
    if message_id.is_empty() {
        warn!(
            conversation_id = %message.conversation_id(),
            "dropping message without message_id"
        );
        metrics::counter!("delivery_messages_dropped_total", "reason" => "missing_message_id")
            .increment(1);
        return Ok(ProcessOutcome::Dropped);
    }

    let start = tokio::time::Instant::now();

    if !context.dedup.acquire(message_id).await? {
        info!(message_id, "message already processed or in flight, skipping");
        metrics::counter!("delivery_dedup_hits_total").increment(1);
        return Ok(ProcessOutcome::Duplicate);
    }

    context.store.mark_processing(message_id, Utc::now()).await?;

    let mut report = DeliveryReport::default();
    for recipient_id in message.unique_recipients() {
        match deliver_to_recipient(context, &message, recipient_id).await {
            Ok(_) => report.record_success(recipient_id),
            Err(error) => report.record_failure(recipient_id, error.to_string()),
        }
    }

    let state = report.state();
    context
        .store
        .complete(message_id, state, &report, Utc::now())
        .await?;

    let now = Utc::now();
    for recipient_id in &report.delivered_to {
        let event = DeliveredEvent::new(message_id, recipient_id, now);
        produce_json(
            context.producer.as_ref(),
            &context.outgoing_topic,
            event.key(),
            &event,
        )
        .await?;
    }

    if report.has_failures() {
        let event = DeadLetterEvent::new(&message, &report.failed_to, now);
        produce_json(
            context.producer.as_ref(),
            &context.dlq_topic,
            event.key(),
            &event,
        )
        .await?;
    }

    context.dedup.release(message_id).await?;

    let labels = [("state", state.as_str())];
    metrics::counter!("delivery_messages_completed_total", &labels).increment(1);
    metrics::histogram!("delivery_processing_duration_seconds")
        .record(start.elapsed().as_secs_f64());

    info!(
        message_id,
        %state,
        delivered = report.delivered_to.len(),
        failed = report.failed_to.len(),
        "message processed"
    );

    Ok(ProcessOutcome::Completed(state))
}

/// Deliver to one recipient, retrying retryable failures with exponential backoff until the
/// retry policy runs out.
async fn deliver_to_recipient(
    context: &WorkerContext,
    message: &Message,
    recipient_id: &str,
) -> Result<Value, AdapterError> {
    let (channel, endpoint) = context
        .resolver
        .resolve(message.channel_hint(), recipient_id);

    let mut attempt: u32 = 1;
    loop {
        let result = context.adapter.send(endpoint, message, recipient_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(error) if error.is_retryable() => "failure",
            Err(_) => "invalid",
        };
        metrics::counter!(
            "delivery_attempts_total",
            "channel" => channel.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        let error = match result {
            Ok(response) => {
                debug!(
                    message_id = %message.message_id(),
                    recipient_id,
                    %channel,
                    attempt,
                    "delivered"
                );
                return Ok(response);
            }
            Err(error) => error,
        };

        if !error.is_retryable() || !context.retry_policy.should_retry(attempt) {
            warn!(
                message_id = %message.message_id(),
                recipient_id,
                %channel,
                attempt,
                "giving up on recipient: {}",
                error
            );
            return Err(error);
        }

        let backoff = context.retry_policy.backoff(attempt);
        debug!(
            message_id = %message.message_id(),
            recipient_id,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            "delivery attempt failed, retrying: {}",
            error
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}
