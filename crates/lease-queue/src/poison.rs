//! Poison Message Router.
//!
//! A message whose dequeue count passes its queue's `max_delivery_attempts`
//! is moved to `{queue}{suffix}` (by default `{queue}-poison`) instead of
//! being handed to a consumer again. Poison queues are never routed further.

use crate::error::ValidationError;
use crate::message::{Message, MessageId, QueueName, Timestamp};
use crate::provider::DEFAULT_POISON_QUEUE_SUFFIX;
use crate::store::{MessageStore, QueueKind, QueueProfile, StoredMessage};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "poison_tests.rs"]
mod tests;

/// Routes exhausted messages to dead-letter queues
#[derive(Debug, Clone)]
pub(crate) struct PoisonRouter {
    suffix: String,
}

impl Default for PoisonRouter {
    fn default() -> Self {
        Self::new(DEFAULT_POISON_QUEUE_SUFFIX)
    }
}

impl PoisonRouter {
    pub(crate) fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// Name of the poison queue paired with `queue`
    pub(crate) fn poison_queue_for(&self, queue: &QueueName) -> Result<QueueName, ValidationError> {
        queue.with_suffix(&self.suffix)
    }

    /// Check whether a freshly leased message has run out of deliveries
    pub(crate) fn should_divert(&self, profile: &QueueProfile, message: &StoredMessage) -> bool {
        profile.kind == QueueKind::Standard
            && message.dequeue_count > profile.options.max_delivery_attempts
    }

    /// Re-insert a message taken from `source` into `poison_queue`.
    ///
    /// The quarantined copy gets `id`, keeps the body, and starts over with a
    /// dequeue count of zero and no lease. The poison queue is created on
    /// first use with the source queue's options. Cannot fail, so a message
    /// removed from its source always lands somewhere.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn quarantine(
        &self,
        store: &MessageStore,
        source: &QueueName,
        poison_queue: &QueueName,
        profile: &QueueProfile,
        message: StoredMessage,
        id: MessageId,
        now: Timestamp,
    ) -> Message {
        let (quarantined, created) = store.insert_into_poison_queue(
            poison_queue,
            profile.options.clone(),
            id,
            message.body,
            now,
        );

        if created {
            debug!(
                queue = %source,
                poison_queue = %poison_queue,
                "auto-created poison queue"
            );
        }

        warn!(
            queue = %source,
            poison_queue = %poison_queue,
            message_id = %message.id,
            poison_message_id = %quarantined.id,
            dequeue_count = message.dequeue_count,
            max_delivery_attempts = profile.options.max_delivery_attempts,
            "Message exceeded delivery attempts, moved to poison queue"
        );

        quarantined
    }
}
