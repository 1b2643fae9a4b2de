//! In-memory queue provider implementation.
//!
//! This module provides a fully functional in-memory queue implementation that:
//! - Grants visibility-timeout leases with rotating lease tokens
//! - Routes messages past their delivery limit to a poison queue
//! - Evaluates lease expiry lazily against an injectable clock
//! - Provides thread-safe concurrent access with per-queue locking
//!
//! No operation awaits while holding a lock, so dropping a pending call never
//! leaves a queue half-updated.

use crate::client::QueueProvider;
use crate::clock::{Clock, IdGenerator, SystemClock, UuidIdGenerator};
use crate::error::QueueError;
use crate::lease::{LeaseManager, LeaseState};
use crate::message::{Lease, Message, MessageId, QueueName};
use crate::poison::PoisonRouter;
use crate::provider::{InMemoryConfig, QueueOptions};
use crate::store::{Claim, MessageStore, QueueKind, QueueProfile};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// In-memory queue provider implementation
pub struct InMemoryProvider {
    store: MessageStore,
    leases: LeaseManager,
    router: PoisonRouter,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryProvider {
    /// Create new in-memory provider using wall-clock time and UUID identifiers
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_collaborators(config, Arc::new(SystemClock), Arc::new(UuidIdGenerator))
    }

    /// Create new in-memory provider with an explicit clock and identifier source
    pub fn with_collaborators(
        config: InMemoryConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store: MessageStore::new(),
            leases: LeaseManager::new(Arc::clone(&ids)),
            router: PoisonRouter::new(config.poison_queue_suffix),
            clock,
            ids,
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn create_queue(
        &self,
        queue: &QueueName,
        options: QueueOptions,
    ) -> Result<bool, QueueError> {
        // The poison queue name must be derivable before any message can need it
        self.router.poison_queue_for(queue)?;

        Ok(self.store.create_queue(
            queue,
            QueueProfile {
                options,
                kind: QueueKind::Standard,
            },
        ))
    }

    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let discarded = self.store.delete_queue(queue)?;
        debug!(queue = %queue, discarded = discarded, "Discarded messages of deleted queue");
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        Ok(self.store.queue_names())
    }

    async fn queue_options(&self, queue: &QueueName) -> Result<QueueOptions, QueueError> {
        Ok(self.store.profile(queue)?.options)
    }

    async fn insert_message(
        &self,
        queue: &QueueName,
        body: Bytes,
        delay: Duration,
    ) -> Result<MessageId, QueueError> {
        let now = self.clock.now();
        let message = self.store.insert(
            queue,
            self.ids.next_message_id(),
            body,
            now,
            now.after(delay),
        )?;
        Ok(message.id)
    }

    async fn peek_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
    ) -> Result<Vec<Message>, QueueError> {
        self.store
            .peek_visible(queue, self.clock.now(), max_messages as usize)
    }

    async fn lease_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<Lease>, QueueError> {
        let now = self.clock.now();
        // Resolved up front so quarantine cannot fail after messages leave the
        // source. Standard queues always have one; see `create_queue`.
        let poison_queue = self.router.poison_queue_for(queue).ok();
        let mut source_profile: Option<QueueProfile> = None;

        let claimed = self
            .store
            .select_n_visible(queue, now, max_messages as usize, |profile, message| {
                let timeout =
                    visibility_timeout.unwrap_or(profile.options.default_visibility_timeout);
                let token = self.leases.grant(message, timeout, now);

                if poison_queue.is_some() && self.router.should_divert(profile, message) {
                    source_profile.get_or_insert_with(|| profile.clone());
                    Claim::Divert
                } else {
                    debug!(
                        queue = %queue,
                        message_id = %message.id,
                        dequeue_count = message.dequeue_count,
                        visible_at = %message.visible_at,
                        "Lease granted"
                    );
                    Claim::Keep(Lease::new(message.snapshot(queue), token))
                }
            })?;

        if let (Some(poison_queue), Some(profile)) = (poison_queue, source_profile) {
            for message in claimed.diverted {
                self.router.quarantine(
                    &self.store,
                    queue,
                    &poison_queue,
                    &profile,
                    message,
                    self.ids.next_message_id(),
                    now,
                );
            }
        }

        Ok(claimed.selected)
    }

    async fn take_message(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        let now = self.clock.now();

        let claimed = self.store.select_next_visible(queue, now, |_, message| {
            LeaseManager::consume(message);
            Claim::Take(message.snapshot(queue))
        })?;

        Ok(claimed.selected.into_iter().next())
    }

    async fn delete_message(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        let now = self.clock.now();

        let removed = self.store.remove_if(queue, lease.message_id(), |message| {
            LeaseManager::confirm(queue, message, lease.token())
        })?;

        debug!(
            queue = %queue,
            message_id = %removed.id,
            lapsed = LeaseManager::state(&removed, &now) == LeaseState::Visible,
            "Message deleted"
        );
        Ok(())
    }

    async fn update_message(
        &self,
        queue: &QueueName,
        lease: &Lease,
        new_body: Option<Bytes>,
        visibility_timeout: Duration,
    ) -> Result<Lease, QueueError> {
        let now = self.clock.now();

        let renewed = self
            .store
            .with_message_mut(queue, lease.message_id(), |message| {
                let token = self.leases.update(
                    queue,
                    message,
                    lease.token(),
                    new_body,
                    visibility_timeout,
                    now,
                )?;
                Ok(Lease::new(message.snapshot(queue), token))
            })?;

        debug!(
            queue = %queue,
            message_id = %renewed.message_id(),
            visible_at = %renewed.expires_at(),
            "Lease updated"
        );
        Ok(renewed)
    }

    async fn release_message(&self, queue: &QueueName, lease: &Lease) -> Result<(), QueueError> {
        let now = self.clock.now();

        self.store.with_message_mut(queue, lease.message_id(), |message| {
            LeaseManager::release(queue, message, lease.token(), now)
        })?;

        debug!(queue = %queue, message_id = %lease.message_id(), "Lease abandoned");
        Ok(())
    }

    async fn message_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        self.store.count(queue)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
