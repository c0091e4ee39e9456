use crate::config::SqsConfig;
use crate::error::{GalleryError, Result};
use crate::moderation::ModerationWorker;
use async_trait::async_trait;
use aws_sdk_sqs::config::Builder as SqsConfigBuilder;
use aws_sdk_sqs::Client as SqsClient;
use aws_types::SdkConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause after a failed receive before polling again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A delivered queue message
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Queue-assigned delivery id
    pub message_id: String,
    /// Token used to acknowledge this delivery
    pub receipt_handle: String,
    /// Raw message body
    pub body: String,
}

/// At-least-once notification queue
///
/// Messages that are received but never acknowledged become visible again
/// once the queue's visibility timeout lapses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Wait for the next batch; may return an empty batch
    async fn receive(&self) -> Result<Vec<QueueMessage>>;

    /// Remove a processed batch from the queue
    async fn acknowledge(&self, batch: &[QueueMessage]) -> Result<()>;
}

/// SQS-backed event queue
pub struct SqsEventQueue {
    client: SqsClient,
    queue_url: String,
    max_messages: i32,
    wait_time_secs: i32,
    visibility_timeout_secs: Option<i32>,
}

impl SqsEventQueue {
    pub fn new(sdk_config: &SdkConfig, config: &SqsConfig) -> Result<Self> {
        let queue_url = config
            .queue_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| GalleryError::InvalidArgument("sqs.queue_url is required".to_string()))?;

        let mut builder = SqsConfigBuilder::from(sdk_config);
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(queue_url = %queue_url, "SQS event queue initialized");

        Ok(Self {
            client: SqsClient::from_conf(builder.build()),
            queue_url,
            max_messages: config.max_messages.clamp(1, 10),
            wait_time_secs: config.wait_time_secs.clamp(0, 20),
            visibility_timeout_secs: config.visibility_timeout_secs,
        })
    }
}

#[async_trait]
impl EventQueue for SqsEventQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_time_secs)
            .set_visibility_timeout(self.visibility_timeout_secs)
            .send()
            .await
            .map_err(|e| GalleryError::unavailable("Failed to receive messages", e))?;

        let messages = response
            .messages()
            .iter()
            .filter_map(|m| {
                let receipt_handle = m.receipt_handle()?.to_string();
                Some(QueueMessage {
                    message_id: m.message_id().unwrap_or_default().to_string(),
                    receipt_handle,
                    body: m.body().unwrap_or_default().to_string(),
                })
            })
            .collect();

        Ok(messages)
    }

    #[instrument(skip(self, batch), fields(batch_size = batch.len()))]
    async fn acknowledge(&self, batch: &[QueueMessage]) -> Result<()> {
        for message in batch {
            self.client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(&message.receipt_handle)
                .send()
                .await
                .map_err(|e| GalleryError::unavailable("Failed to delete message", e))?;
        }
        Ok(())
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was delivered
    Idle,
    /// The batch was moderated and acknowledged
    Processed,
    /// The batch failed and was left for redelivery
    Failed,
}

/// Feeds delivered batches to the moderation worker
pub struct QueueConsumer {
    queue: Arc<dyn EventQueue>,
    worker: Arc<ModerationWorker>,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn EventQueue>, worker: Arc<ModerationWorker>) -> Self {
        Self { queue, worker }
    }

    /// Poll until cancelled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting moderation queue consumer");

        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Queue receive error");
                    metrics::counter!("gallery.queue.errors").increment(1);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Moderation queue consumer stopped");
        Ok(())
    }

    /// Receive one batch and run it through the worker as a single invocation
    ///
    /// Only receive failures are returned as errors. A failed invocation is
    /// reported as [`PollOutcome::Failed`]; its messages stay unacknowledged.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let batch = self.queue.receive().await?;
        if batch.is_empty() {
            return Ok(PollOutcome::Idle);
        }

        debug!(batch_size = batch.len(), "Received notification batch");
        let timer = std::time::Instant::now();

        match self.worker.process_batch(&batch).await {
            Ok(_) => {
                metrics::histogram!("gallery.moderation.batch_duration_seconds")
                    .record(timer.elapsed().as_secs_f64());

                if let Err(e) = self.queue.acknowledge(&batch).await {
                    // Unacknowledged messages are redelivered and moderated again
                    warn!(error = %e, "Failed to acknowledge batch");
                }
                metrics::counter!("gallery.queue.batches.processed").increment(1);
                Ok(PollOutcome::Processed)
            }
            Err(e) => {
                let ids: Vec<&str> = batch.iter().map(|m| m.message_id.as_str()).collect();
                error!(
                    error = %e,
                    message_ids = ?ids,
                    "Batch failed, leaving messages for redelivery"
                );
                metrics::counter!("gallery.queue.batches.failed").increment(1);
                Ok(PollOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModerationConfig;
    use crate::content_analysis::{MockContentAnalyzer, ModerationFinding};
    use crate::object_store::MockObjectStore;

    fn message(id: &str, key: &str) -> QueueMessage {
        QueueMessage {
            message_id: id.to_string(),
            receipt_handle: format!("receipt-{id}"),
            body: format!(
                r#"{{"Records":[{{"s3":{{"bucket":{{"name":"gallery-images"}},"object":{{"key":"{key}"}}}}}}]}}"#
            ),
        }
    }

    fn clean_worker() -> Arc<ModerationWorker> {
        let mut analyzer = MockContentAnalyzer::new();
        analyzer.expect_analyze().returning(|object, _| {
            if object.key.contains("poison") {
                Err(GalleryError::Unavailable("analysis failed".to_string()))
            } else {
                Ok(vec![ModerationFinding::new("Suggestive", 55.0)])
            }
        });
        Arc::new(ModerationWorker::new(
            Arc::new(MockObjectStore::new()),
            Arc::new(analyzer),
            &ModerationConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_successful_batch_is_acknowledged() {
        let mut queue = MockEventQueue::new();
        queue
            .expect_receive()
            .times(1)
            .returning(|| Ok(vec![message("m1", "uploads/1.png"), message("m2", "uploads/2.png")]));
        queue
            .expect_acknowledge()
            .withf(|batch| batch.len() == 2 && batch[0].receipt_handle == "receipt-m1")
            .times(1)
            .returning(|_| Ok(()));

        let consumer = QueueConsumer::new(Arc::new(queue), clean_worker());
        assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Processed);
    }

    #[tokio::test]
    async fn test_failed_batch_is_not_acknowledged() {
        let mut queue = MockEventQueue::new();
        queue.expect_receive().returning(|| {
            Ok(vec![
                message("m1", "uploads/1.png"),
                message("m2", "uploads/poison.png"),
                message("m3", "uploads/3.png"),
            ])
        });
        queue.expect_acknowledge().never();

        let consumer = QueueConsumer::new(Arc::new(queue), clean_worker());
        assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Failed);
    }

    #[tokio::test]
    async fn test_empty_receive_is_idle() {
        let mut queue = MockEventQueue::new();
        queue.expect_receive().returning(|| Ok(vec![]));
        queue.expect_acknowledge().never();

        let consumer = QueueConsumer::new(Arc::new(queue), clean_worker());
        assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Idle);
    }

    #[tokio::test]
    async fn test_receive_error_is_returned() {
        let mut queue = MockEventQueue::new();
        queue
            .expect_receive()
            .returning(|| Err(GalleryError::Unavailable("no route".to_string())));

        let consumer = QueueConsumer::new(Arc::new(queue), clean_worker());
        assert!(consumer.poll_once().await.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let mut queue = MockEventQueue::new();
        queue.expect_receive().returning(|| Ok(vec![]));

        let consumer = QueueConsumer::new(Arc::new(queue), clean_worker());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        consumer.run(shutdown).await.unwrap();
    }
}
