//! Common test utilities for lease-queue integration tests
//!
//! This module provides:
//! - A client wired to a manual clock and sequential identifiers
//! - Helpers for creating queues and draining leases

#![allow(dead_code)]

use bytes::Bytes;
use chrono::Duration;
use lease_queue::{
    Lease, ManualClock, QueueClient, QueueClientFactory, QueueConfig, QueueName, QueueOptions,
    SequentialIdGenerator,
};
use std::sync::Arc;

/// Client plus the clock that drives its lease expiry
pub struct TestHarness {
    pub client: Arc<dyn QueueClient>,
    pub clock: ManualClock,
}

impl TestHarness {
    /// Harness using the default configuration
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let clock = ManualClock::starting_now();
        let client = QueueClientFactory::create_client_with(
            config,
            Arc::new(clock.clone()),
            Arc::new(SequentialIdGenerator::new()),
        )
        .expect("default configuration should be valid");

        Self {
            client: Arc::from(client),
            clock,
        }
    }

    /// Create `name` with the given delivery limit and return it
    pub async fn queue_with_limit(&self, name: &str, max_delivery_attempts: u32) -> QueueName {
        let queue = queue_name(name);
        self.client
            .create_queue_with_options(
                &queue,
                QueueOptions::default().with_max_delivery_attempts(max_delivery_attempts),
            )
            .await
            .expect("queue creation should succeed");
        queue
    }

    /// Create `name` with default options and return it
    pub async fn queue(&self, name: &str) -> QueueName {
        let queue = queue_name(name);
        self.client
            .create_queue_if_not_exists(&queue)
            .await
            .expect("queue creation should succeed");
        queue
    }

    pub async fn enqueue(&self, queue: &QueueName, body: &str) {
        self.client
            .enqueue(queue, Bytes::from(body.to_string()))
            .await
            .expect("enqueue should succeed");
    }

    /// Lease one message for `seconds`, panicking if none is visible
    pub async fn lease(&self, queue: &QueueName, seconds: i64) -> Lease {
        self.client
            .dequeue(queue, Some(Duration::seconds(seconds)))
            .await
            .expect("dequeue should succeed")
            .expect("a message should be visible")
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    pub async fn count(&self, queue: &QueueName) -> usize {
        self.client
            .approximate_count(queue)
            .await
            .expect("count should succeed")
    }
}

pub fn queue_name(name: &str) -> QueueName {
    name.parse().expect("test queue names are valid")
}
