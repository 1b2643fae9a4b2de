//! # Retry Policy Module
//!
//! Retry of transient backing-store failures, kept out of the queue protocol
//! itself and applied as an optional decorator around any [`QueueClient`].
//!
//! The default policy retries three times with a fixed two-second pause.
//! Exponential backoff with jitter is available for callers that want it.

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::message::{EnqueueOptions, Lease, Message, MessageId, QueueName};
use crate::provider::QueueOptions;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Retry policy configuration
///
/// # Examples
///
/// ```rust
/// use lease_queue::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 3 retries, 2s apart
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.calculate_delay(2), Duration::from_secs(2));
///
/// // Exponential policy
/// let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(5), 1.5);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Exponential backoff multiplier (1.0 gives a fixed delay)
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as percentage (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Create a new exponential retry policy with ±25% jitter
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum retry attempts (typically 3-5)
    /// * `initial_delay` - Initial delay before first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Exponential growth factor (typically 1.5-2.0)
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    /// Create a constant-delay policy without jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            use_jitter: false,
            jitter_percent: 0.0,
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a specific retry attempt
    ///
    /// Uses exponential backoff formula: delay = initial * multiplier^attempt,
    /// capped at `max_delay`, with jitter applied if enabled.
    ///
    /// # Arguments
    ///
    /// * `attempt` - Retry attempt number (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    /// Check if we should retry for this attempt number
    ///
    /// # Arguments
    ///
    /// * `attempt` - Current attempt number (0-based, where 0 is first retry)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Apply random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);

        (delay_secs + jitter).max(0.0)
    }

    /// Get total number of attempts (initial + retries)
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts + 1
    }
}

/// State tracker for retry operations
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Current retry attempt (0-based)
    pub attempt: u32,

    /// Total attempts made so far (including initial)
    pub total_attempts: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    /// Create new retry state starting at attempt 0
    pub fn new() -> Self {
        Self {
            attempt: 0,
            total_attempts: 1,
        }
    }

    /// Increment to next retry attempt
    pub fn next_attempt(&mut self) {
        self.attempt += 1;
        self.total_attempts += 1;
    }

    /// Get next delay from policy
    pub fn get_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.calculate_delay(self.attempt)
    }

    /// Check if we can retry with this policy
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.attempt)
    }
}

// ============================================================================
// Retrying client decorator
// ============================================================================

/// Queue client that retries transient failures of the wrapped client.
///
/// Only errors for which [`QueueError::is_transient`] holds are retried;
/// protocol outcomes such as a stale lease are returned immediately.
#[derive(Clone)]
pub struct RetryingQueueClient {
    inner: Arc<dyn QueueClient>,
    policy: RetryPolicy,
}

impl RetryingQueueClient {
    /// Wrap `inner` with `policy`
    pub fn new(inner: Arc<dyn QueueClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Wrapped client
    pub fn inner(&self) -> &dyn QueueClient {
        &*self.inner
    }

    /// Active retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        queue: Option<&QueueName>,
        mut call: F,
    ) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, QueueError>> + Send,
        T: Send,
    {
        let mut state = RetryState::new();
        loop {
            match call().await {
                Err(err) if err.is_transient() && state.can_retry(&self.policy) => {
                    let delay = state.get_delay(&self.policy);
                    warn!(
                        operation = operation,
                        queue = ?queue.map(QueueName::as_str),
                        attempt = state.total_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient queue error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    state.next_attempt();
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl QueueClient for RetryingQueueClient {
    async fn create_queue_if_not_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        self.run("create_queue", Some(queue), || {
            self.inner.create_queue_if_not_exists(queue)
        })
        .await
    }

    async fn create_queue_with_options(
        &self,
        queue: &QueueName,
        options: QueueOptions,
    ) -> Result<bool, QueueError> {
        self.run("create_queue", Some(queue), || {
            self.inner.create_queue_with_options(queue, options.clone())
        })
        .await
    }

    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        self.run("delete_queue", Some(queue), || self.inner.delete_queue(queue))
            .await
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        self.run("list_queues", None, || self.inner.list_queues())
            .await
    }

    async fn queue_options(&self, queue: &QueueName) -> Result<QueueOptions, QueueError> {
        self.run("queue_options", Some(queue), || self.inner.queue_options(queue))
            .await
    }

    async fn enqueue_with_options(
        &self,
        queue: &QueueName,
        body: Bytes,
        options: EnqueueOptions,
    ) -> Result<MessageId, QueueError> {
        self.run("enqueue", Some(queue), || {
            self.inner
                .enqueue_with_options(queue, body.clone(), options.clone())
        })
        .await
    }

    async fn peek_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
    ) -> Result<Vec<Message>, QueueError> {
        self.run("peek", Some(queue), || {
            self.inner.peek_batch(queue, max_messages)
        })
        .await
    }

    async fn dequeue_batch(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<chrono::Duration>,
    ) -> Result<Vec<Lease>, QueueError> {
        self.run("dequeue", Some(queue), || {
            self.inner
                .dequeue_batch(queue, max_messages, visibility_timeout)
        })
        .await
    }

    async fn dequeue_and_delete(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        self.run("dequeue_and_delete", Some(queue), || {
            self.inner.dequeue_and_delete(queue)
        })
        .await
    }

    async fn delete(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        self.run("delete", Some(queue), || self.inner.delete(queue, lease))
            .await
    }

    async fn update(
        &self,
        queue: &QueueName,
        lease: &Lease,
        new_body: Option<Bytes>,
        visibility_timeout: chrono::Duration,
    ) -> Result<Lease, QueueError> {
        self.run("update", Some(queue), || {
            self.inner
                .update(queue, lease, new_body.clone(), visibility_timeout)
        })
        .await
    }

    async fn abandon(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        self.run("abandon", Some(queue), || self.inner.abandon(queue, lease))
            .await
    }

    async fn approximate_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        self.run("approximate_count", Some(queue), || {
            self.inner.approximate_count(queue)
        })
        .await
    }
}
