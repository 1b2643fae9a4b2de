//! Client traits and implementations for queue operations.

use crate::clock::{Clock, IdGenerator};
use crate::error::{QueueError, ValidationError};
use crate::message::{EnqueueOptions, Lease, Message, MessageId, QueueName};
use crate::provider::{validate_visibility, ProviderConfig, QueueConfig, QueueOptions};
use crate::providers::InMemoryProvider;
use crate::retry::RetryingQueueClient;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for queue operations across all providers
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create queue with the client's default options; `false` if it already existed
    async fn create_queue_if_not_exists(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Create queue with explicit options; `false` (options untouched) if it already existed
    async fn create_queue_with_options(
        &self,
        queue: &QueueName,
        options: QueueOptions,
    ) -> Result<bool, QueueError>;

    /// Delete queue and discard every message it holds
    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Names of all existing queues, sorted
    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError>;

    /// Effective options of an existing queue
    async fn queue_options(&self, queue: &QueueName) -> Result<QueueOptions, QueueError>;

    /// Add a message that is visible immediately
    async fn enqueue(&self, queue: &QueueName, body: Bytes) -> Result<MessageId, QueueError> {
        self.enqueue_with_options(queue, body, EnqueueOptions::default())
            .await
    }

    /// Add a message, optionally hidden for an initial delay
    async fn enqueue_with_options(
        &self,
        queue: &QueueName,
        body: Bytes,
        options: EnqueueOptions,
    ) -> Result<MessageId, QueueError>;

    /// Preview the next visible message without leasing it
    async fn peek(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        Ok(self.peek_batch(queue, 1).await?.into_iter().next())
    }

    /// Preview up to `max_messages` visible messages in dequeue order
    async fn peek_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
    ) -> Result<Vec<Message>, QueueError>;

    /// Lease the next visible message.
    ///
    /// `None` for `visibility_timeout` uses the queue's default. Returns
    /// `Ok(None)` when nothing is visible.
    async fn dequeue(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<Lease>, QueueError> {
        Ok(self
            .dequeue_batch(queue, 1, visibility_timeout)
            .await?
            .into_iter()
            .next())
    }

    /// Lease up to `max_messages` distinct visible messages
    async fn dequeue_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<Lease>, QueueError>;

    /// Take the next visible message out of the queue without a lease
    async fn dequeue_and_delete(&self, queue: &QueueName) -> Result<Option<Message>, QueueError>;

    /// Finish processing: permanently remove the leased message
    async fn delete(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError>;

    /// Replace body and/or visibility of a leased message, returning the new lease
    async fn update(
        &self,
        queue: &QueueName,
        lease: &Lease,
        new_body: Option<Bytes>,
        visibility_timeout: Duration,
    ) -> Result<Lease, QueueError>;

    /// Give up a lease so the message is visible again immediately
    async fn abandon(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError>;

    /// Number of messages in the queue regardless of visibility
    async fn approximate_count(&self, queue: &QueueName) -> Result<usize, QueueError>;
}

/// Interface implemented by specific queue backing stores.
///
/// Arguments arrive already validated by [`StandardQueueClient`].
#[async_trait]
pub trait QueueProvider: Send + Sync {
    async fn create_queue(
        &self,
        queue: &QueueName,
        options: QueueOptions,
    ) -> Result<bool, QueueError>;

    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError>;

    async fn queue_options(&self, queue: &QueueName) -> Result<QueueOptions, QueueError>;

    /// Store a new message that becomes visible after `delay`
    async fn insert_message(
        &self,
        queue: &QueueName,
        body: Bytes,
        delay: Duration,
    ) -> Result<MessageId, QueueError>;

    async fn peek_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
    ) -> Result<Vec<Message>, QueueError>;

    /// Lease visible messages, diverting exhausted ones to the poison queue
    async fn lease_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<Lease>, QueueError>;

    async fn take_message(&self, queue: &QueueName) -> Result<Option<Message>, QueueError>;

    async fn delete_message(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError>;

    async fn update_message(
        &self,
        queue: &QueueName,
        lease: &Lease,
        new_body: Option<Bytes>,
        visibility_timeout: Duration,
    ) -> Result<Lease, QueueError>;

    async fn release_message(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError>;

    async fn message_count(&self, queue: &QueueName) -> Result<usize, QueueError>;

    /// Short provider identifier used in logs and errors
    fn provider_name(&self) -> &'static str;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    pub async fn create_client(config: QueueConfig) -> Result<Box<dyn QueueClient>, QueueError> {
        config.validate()?;

        let provider: Box<dyn QueueProvider> = match &config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryProvider::new(in_memory_config.clone()))
            }
        };

        Ok(Box::new(StandardQueueClient::new(provider, config)))
    }

    /// Create queue client wrapped with the configured transient-error retry policy
    pub async fn create_retrying_client(
        config: QueueConfig,
    ) -> Result<RetryingQueueClient, QueueError> {
        let policy = config.retry_policy();
        let client = Self::create_client(config).await?;
        Ok(RetryingQueueClient::new(Arc::from(client), policy))
    }

    /// Create in-memory client driven by the given clock and identifier source
    pub fn create_client_with(
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Box<dyn QueueClient>, QueueError> {
        config.validate()?;

        let provider: Box<dyn QueueProvider> = match &config.provider {
            ProviderConfig::InMemory(in_memory_config) => Box::new(
                InMemoryProvider::with_collaborators(in_memory_config.clone(), clock, ids),
            ),
        };

        Ok(Box::new(StandardQueueClient::new(provider, config)))
    }

    /// Create test client with in-memory provider
    pub fn create_test_client() -> Box<dyn QueueClient> {
        let config = QueueConfig::default();
        let provider = InMemoryProvider::default();
        Box::new(StandardQueueClient::new(Box::new(provider), config))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    provider: Box<dyn QueueProvider>,
    config: QueueConfig,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Box<dyn QueueProvider>, config: QueueConfig) -> Self {
        Self { provider, config }
    }

    /// Name of the backing provider
    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn validate_batch_size(&self, max_messages: u32) -> Result<(), ValidationError> {
        if max_messages == 0 || max_messages > self.config.max_batch_size {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be 1-{}", self.config.max_batch_size),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    #[instrument(skip(self), fields(queue = %queue))]
    async fn create_queue_if_not_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let created = self
            .provider
            .create_queue(queue, self.config.queue_defaults.clone())
            .await?;
        if created {
            info!(queue = %queue, "Queue created");
        }
        Ok(created)
    }

    #[instrument(skip(self, options), fields(queue = %queue))]
    async fn create_queue_with_options(
        &self,
        queue: &QueueName,
        options: QueueOptions,
    ) -> Result<bool, QueueError> {
        options.validate()?;

        let created = self.provider.create_queue(queue, options).await?;
        if created {
            info!(queue = %queue, "Queue created");
        }
        Ok(created)
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        self.provider.delete_queue(queue).await?;
        info!(queue = %queue, "Queue deleted");
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        self.provider.list_queues().await
    }

    async fn queue_options(&self, queue: &QueueName) -> Result<QueueOptions, QueueError> {
        self.provider.queue_options(queue).await
    }

    #[instrument(skip(self, body, options), fields(queue = %queue, size = body.len()))]
    async fn enqueue_with_options(
        &self,
        queue: &QueueName,
        body: Bytes,
        options: EnqueueOptions,
    ) -> Result<MessageId, QueueError> {
        let delay = options.initial_visibility_delay.unwrap_or_else(Duration::zero);
        validate_visibility("initial_visibility_delay", delay, true)?;

        let message_id = self.provider.insert_message(queue, body, delay).await?;
        debug!(queue = %queue, message_id = %message_id, "Message enqueued");
        Ok(message_id)
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn peek_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
    ) -> Result<Vec<Message>, QueueError> {
        self.validate_batch_size(max_messages)?;
        self.provider.peek_messages(queue, max_messages).await
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn dequeue_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<Lease>, QueueError> {
        self.validate_batch_size(max_messages)?;
        if let Some(timeout) = visibility_timeout {
            validate_visibility("visibility_timeout", timeout, false)?;
        }

        self.provider
            .lease_messages(queue, max_messages, visibility_timeout)
            .await
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn dequeue_and_delete(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        self.provider.take_message(queue).await
    }

    #[instrument(skip(self, lease), fields(queue = %queue, message_id = %lease.message_id()))]
    async fn delete(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        self.provider.delete_message(queue, lease).await
    }

    #[instrument(
        skip(self, lease, new_body),
        fields(queue = %queue, message_id = %lease.message_id(), replace_body = new_body.is_some())
    )]
    async fn update(
        &self,
        queue: &QueueName,
        lease: &Lease,
        new_body: Option<Bytes>,
        visibility_timeout: Duration,
    ) -> Result<Lease, QueueError> {
        validate_visibility("visibility_timeout", visibility_timeout, true)?;

        self.provider
            .update_message(queue, lease, new_body, visibility_timeout)
            .await
    }

    #[instrument(skip(self, lease), fields(queue = %queue, message_id = %lease.message_id()))]
    async fn abandon(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        self.provider.release_message(queue, lease).await
    }

    async fn approximate_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        self.provider.message_count(queue).await
    }
}
