//! Tests for queue-triggered processing.

use super::*;
use crate::client::QueueClientFactory;
use crate::clock::{ManualClock, SequentialIdGenerator};
use crate::message::{EnqueueOptions, Lease, MessageId};
use crate::provider::{QueueConfig, QueueOptions};
use bytes::Bytes;
use std::sync::Mutex;

/// Records bodies and fails on any body equal to `bad`
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<(String, u32)>>,
}

impl RecordingHandler {
    fn seen(&self) -> Vec<(String, u32)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let body = message.body_as_str()?.to_string();
        self.seen
            .lock()
            .unwrap()
            .push((body.clone(), message.dequeue_count));

        if body == "bad" {
            anyhow::bail!("cannot process {}", body);
        }
        Ok(())
    }
}

/// Lets the lease lapse and hands the message to another consumer mid-handling
struct StealingHandler {
    client: Arc<dyn QueueClient>,
    clock: ManualClock,
    queue: QueueName,
}

#[async_trait]
impl MessageHandler for StealingHandler {
    async fn handle(&self, _message: &Message) -> anyhow::Result<()> {
        self.clock.advance(Duration::minutes(10));
        self.client.dequeue(&self.queue, None).await?;
        Ok(())
    }
}

/// Delegates to a real client but fails deletes of one body with a store error
struct FailingDeleteClient {
    inner: Arc<dyn QueueClient>,
    fail_body: &'static str,
}

#[async_trait]
impl QueueClient for FailingDeleteClient {
    async fn create_queue_if_not_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        self.inner.create_queue_if_not_exists(queue).await
    }

    async fn create_queue_with_options(
        &self,
        queue: &QueueName,
        options: QueueOptions,
    ) -> Result<bool, QueueError> {
        self.inner.create_queue_with_options(queue, options).await
    }

    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        self.inner.delete_queue(queue).await
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        self.inner.list_queues().await
    }

    async fn queue_options(&self, queue: &QueueName) -> Result<QueueOptions, QueueError> {
        self.inner.queue_options(queue).await
    }

    async fn enqueue_with_options(
        &self,
        queue: &QueueName,
        body: Bytes,
        options: EnqueueOptions,
    ) -> Result<MessageId, QueueError> {
        self.inner.enqueue_with_options(queue, body, options).await
    }

    async fn peek_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
    ) -> Result<Vec<Message>, QueueError> {
        self.inner.peek_batch(queue, max_messages).await
    }

    async fn dequeue_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<Lease>, QueueError> {
        self.inner
            .dequeue_batch(queue, max_messages, visibility_timeout)
            .await
    }

    async fn dequeue_and_delete(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        self.inner.dequeue_and_delete(queue).await
    }

    async fn delete(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        if lease.message().body == Bytes::from(self.fail_body) {
            return Err(QueueError::ProviderError {
                provider: "test".to_string(),
                code: "ServerBusy".to_string(),
                message: "delete rejected".to_string(),
            });
        }
        self.inner.delete(queue, lease).await
    }

    async fn update(
        &self,
        queue: &QueueName,
        lease: &Lease,
        new_body: Option<Bytes>,
        visibility_timeout: Duration,
    ) -> Result<Lease, QueueError> {
        self.inner
            .update(queue, lease, new_body, visibility_timeout)
            .await
    }

    async fn abandon(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        self.inner.abandon(queue, lease).await
    }

    async fn approximate_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        self.inner.approximate_count(queue).await
    }
}

async fn setup(max_delivery_attempts: u32) -> (Arc<dyn QueueClient>, ManualClock, QueueName) {
    let clock = ManualClock::starting_now();
    let client: Arc<dyn QueueClient> = Arc::from(
        QueueClientFactory::create_client_with(
            QueueConfig::default(),
            Arc::new(clock.clone()),
            Arc::new(SequentialIdGenerator::new()),
        )
        .unwrap(),
    );
    let queue: QueueName = "orders".parse().unwrap();
    client
        .create_queue_with_options(
            &queue,
            QueueOptions::default().with_max_delivery_attempts(max_delivery_attempts),
        )
        .await
        .unwrap();
    (client, clock, queue)
}

async fn enqueue_all(client: &Arc<dyn QueueClient>, queue: &QueueName, bodies: &[&str]) {
    for body in bodies {
        client
            .enqueue(queue, Bytes::from(body.to_string()))
            .await
            .unwrap();
    }
}

mod processing {
    use super::*;

    /// Verify that successful messages are deleted and failures stay leased.
    #[tokio::test]
    async fn test_success_deletes_failure_keeps_lease() {
        // Arrange
        let (client, _clock, queue) = setup(5).await;
        enqueue_all(&client, &queue, &["one", "bad", "two"]).await;
        let handler = Arc::new(RecordingHandler::default());
        let processor = QueueProcessor::new(client.clone(), queue.clone(), handler.clone());

        // Act
        let summary = processor.process_batch().await.unwrap();

        // Assert
        assert_eq!(
            summary,
            ProcessingSummary {
                succeeded: 2,
                failed: 1,
                settle_errors: 0
            }
        );
        assert_eq!(handler.seen().len(), 3);
        assert_eq!(client.approximate_count(&queue).await.unwrap(), 1);
        assert!(client.peek(&queue).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_size_limits_dequeue() {
        let (client, _clock, queue) = setup(5).await;
        enqueue_all(&client, &queue, &["a", "b", "c"]).await;
        let handler = Arc::new(RecordingHandler::default());
        let processor =
            QueueProcessor::new(client.clone(), queue.clone(), handler).with_batch_size(2);

        let summary = processor.process_batch().await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(client.approximate_count(&queue).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_yields_empty_summary() {
        let (client, _clock, queue) = setup(5).await;
        let processor =
            QueueProcessor::new(client, queue, Arc::new(RecordingHandler::default()));

        let summary = processor.process_batch().await.unwrap();

        assert!(summary.is_empty());
    }

    /// Verify that a rejected delete after successful handling is counted, not raised.
    #[tokio::test]
    async fn test_stale_lease_counted_as_settle_error() {
        let (client, clock, queue) = setup(5).await;
        enqueue_all(&client, &queue, &["slow"]).await;
        let handler = Arc::new(StealingHandler {
            client: client.clone(),
            clock: clock.clone(),
            queue: queue.clone(),
        });
        let processor = QueueProcessor::new(client.clone(), queue.clone(), handler)
            .with_visibility_timeout(Duration::seconds(30));

        let summary = processor.process_batch().await.unwrap();

        assert_eq!(summary.settle_errors, 1);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(client.approximate_count(&queue).await.unwrap(), 1);
    }

    /// Verify that a store error on one delete still lets the rest of the batch run.
    #[tokio::test]
    async fn test_delete_failure_finishes_batch_before_returning() {
        // Arrange
        let (client, _clock, queue) = setup(5).await;
        enqueue_all(&client, &queue, &["one", "stuck", "two", "three"]).await;
        let failing: Arc<dyn QueueClient> = Arc::new(FailingDeleteClient {
            inner: client.clone(),
            fail_body: "stuck",
        });
        let handler = Arc::new(RecordingHandler::default());
        let processor = QueueProcessor::new(failing, queue.clone(), handler.clone());

        // Act
        let result = processor.process_batch().await;

        // Assert
        assert!(matches!(result, Err(QueueError::ProviderError { .. })));
        let bodies: Vec<String> = handler.seen().into_iter().map(|(body, _)| body).collect();
        assert_eq!(bodies, vec!["one", "stuck", "two", "three"]);
        assert_eq!(client.approximate_count(&queue).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_queue_is_an_error() {
        let (client, _clock, _queue) = setup(5).await;
        let processor = QueueProcessor::new(
            client,
            "missing".parse().unwrap(),
            Arc::new(RecordingHandler::default()),
        );

        assert!(matches!(
            processor.process_batch().await,
            Err(QueueError::QueueNotFound { .. })
        ));
    }
}

mod draining {
    use super::*;

    #[tokio::test]
    async fn test_drain_processes_everything_visible() {
        let (client, _clock, queue) = setup(5).await;
        let bodies: Vec<String> = (0..40).map(|n| format!("m{}", n)).collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        enqueue_all(&client, &queue, &refs).await;
        let handler = Arc::new(RecordingHandler::default());
        let processor = QueueProcessor::new(client.clone(), queue.clone(), handler.clone());

        let summary = processor.drain().await.unwrap();

        assert_eq!(summary.succeeded, 40);
        assert_eq!(client.approximate_count(&queue).await.unwrap(), 0);
        assert_eq!(processor.queue(), &queue);
    }

    /// Verify that a failing message is retried after its lease lapses and ends up poisoned.
    #[tokio::test]
    async fn test_failing_message_reaches_poison_queue() {
        // Arrange
        let (client, clock, queue) = setup(2).await;
        enqueue_all(&client, &queue, &["bad"]).await;
        let handler = Arc::new(RecordingHandler::default());
        let processor = QueueProcessor::new(client.clone(), queue.clone(), handler.clone())
            .with_visibility_timeout(Duration::seconds(5));

        // Act
        let mut failed = 0;
        for _ in 0..3 {
            failed += processor.drain().await.unwrap().failed;
            clock.advance(Duration::seconds(5));
        }

        // Assert
        assert_eq!(failed, 2);
        let attempts: Vec<u32> = handler.seen().iter().map(|(_, count)| *count).collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(client.approximate_count(&queue).await.unwrap(), 0);
        let poison: QueueName = "orders-poison".parse().unwrap();
        assert_eq!(client.approximate_count(&poison).await.unwrap(), 1);
    }
}
