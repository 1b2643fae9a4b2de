//! Queue-triggered message processing.
//!
//! A [`QueueProcessor`] binds an application-provided [`MessageHandler`] to a
//! single queue. Each leased message is passed to the handler; on success the
//! message is deleted, on failure the lease is left to lapse so the message is
//! delivered again once its visibility timeout passes. A message that keeps
//! failing is eventually moved to the poison queue by the normal delivery
//! limit, so handlers can inspect [`Message::dequeue_count`] to spot retries.
//!
//! # Examples
//!
//! ```rust,no_run
//! use lease_queue::{Message, MessageHandler, QueueClientFactory, QueueName, QueueProcessor};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl MessageHandler for PrintHandler {
//!     async fn handle(&self, message: &Message) -> anyhow::Result<()> {
//!         println!("{} (attempt {})", message.body_as_str()?, message.dequeue_count);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), lease_queue::QueueError> {
//! let client: Arc<dyn lease_queue::QueueClient> =
//!     Arc::from(QueueClientFactory::create_test_client());
//! let queue: QueueName = "orders".parse()?;
//! client.create_queue_if_not_exists(&queue).await?;
//! let processor = QueueProcessor::new(client, queue, Arc::new(PrintHandler));
//! let summary = processor.drain().await?;
//! println!("processed {}", summary.succeeded);
//! # Ok(())
//! # }
//! ```

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::message::{Message, QueueName};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

/// Messages leased per batch unless configured otherwise
pub const DEFAULT_PROCESSOR_BATCH_SIZE: u32 = 16;

/// Application-provided processing logic for queue messages.
///
/// Returning `Err` leaves the message leased until its visibility timeout
/// passes, after which it is delivered again.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// Outcome counts for one or more processed batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Handled and deleted
    pub succeeded: usize,

    /// Handler returned an error; lease left to lapse
    pub failed: usize,

    /// Handled, but the delete was refused or failed
    pub settle_errors: usize,
}

impl ProcessingSummary {
    /// Total messages handed to the handler
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.settle_errors
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn merge(&mut self, other: ProcessingSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.settle_errors += other.settle_errors;
    }
}

/// Dequeues messages from one queue and dispatches them to a handler
pub struct QueueProcessor {
    client: Arc<dyn QueueClient>,
    queue: QueueName,
    handler: Arc<dyn MessageHandler>,
    batch_size: u32,
    visibility_timeout: Option<Duration>,
}

impl QueueProcessor {
    /// Create processor using the queue's default visibility timeout
    pub fn new(
        client: Arc<dyn QueueClient>,
        queue: QueueName,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            client,
            queue,
            handler,
            batch_size: DEFAULT_PROCESSOR_BATCH_SIZE,
            visibility_timeout: None,
        }
    }

    /// Set how many messages are leased per batch
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the lease length used while a handler runs
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Lease one batch and run the handler on each message.
    ///
    /// Every leased message reaches the handler even if a delete fails with a
    /// backing-store error; the first such error is returned once the batch
    /// is done.
    #[instrument(skip(self), fields(queue = %self.queue))]
    pub async fn process_batch(&self) -> Result<ProcessingSummary, QueueError> {
        let leases = self
            .client
            .dequeue_batch(&self.queue, self.batch_size, self.visibility_timeout)
            .await?;

        let mut summary = ProcessingSummary::default();
        let mut delete_failure: Option<QueueError> = None;

        for lease in leases {
            let message = lease.message();

            if let Err(err) = self.handler.handle(message).await {
                warn!(
                    queue = %self.queue,
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    retry_at = %lease.expires_at(),
                    error = %err,
                    "Message handler failed"
                );
                summary.failed += 1;
                continue;
            }

            match self.client.delete(&self.queue, &lease).await {
                Ok(()) => {
                    debug!(queue = %self.queue, message_id = %message.id, "Message processed");
                    summary.succeeded += 1;
                }
                Err(
                    err @ (QueueError::LeaseExpiredOrInvalid { .. }
                    | QueueError::MessageNotFound { .. }),
                ) => {
                    warn!(
                        queue = %self.queue,
                        message_id = %message.id,
                        error = %err,
                        "Processed message could not be deleted; it may be delivered again"
                    );
                    summary.settle_errors += 1;
                }
                Err(err) => {
                    // The rest of the batch is already leased; finish it before reporting
                    warn!(
                        queue = %self.queue,
                        message_id = %message.id,
                        error = %err,
                        "Delete failed; continuing with remaining messages"
                    );
                    summary.settle_errors += 1;
                    delete_failure.get_or_insert(err);
                }
            }
        }

        match delete_failure {
            Some(err) => {
                warn!(
                    queue = %self.queue,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    settle_errors = summary.settle_errors,
                    "Batch finished with delete failures"
                );
                Err(err)
            }
            None => Ok(summary),
        }
    }

    /// Process batches until one comes back empty
    pub async fn drain(&self) -> Result<ProcessingSummary, QueueError> {
        let mut total = ProcessingSummary::default();

        loop {
            let batch = self.process_batch().await?;
            if batch.is_empty() {
                return Ok(total);
            }
            total.merge(batch);
        }
    }
}
