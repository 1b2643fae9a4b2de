//! # Lease Queue
//!
//! Message queue client with lease-based at-least-once delivery.
//!
//! This library provides:
//! - Visibility-timeout leases with rotating lease tokens
//! - Lazy lease expiry and redelivery, with no background timers
//! - Poison queue routing once a message exceeds its delivery limit
//! - Batch dequeue and peek, delayed enqueue, abandon, and receive-and-delete
//! - An optional retry decorator for transient backing-store failures
//! - Queue-triggered handler processing
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Identifiers, message snapshots, and lease handles
//! - [`clock`] - Injectable time and identifier sources
//! - [`provider`] - Queue options and client configuration
//! - [`client`] - Client traits, the standard client, and the factory
//! - [`providers`] - Backing store implementations
//! - [`retry`] - Retry policy and the retrying client decorator
//! - [`processor`] - Queue-triggered message processing
//!
//! ## Example
//!
//! ```rust
//! use lease_queue::{QueueClientFactory, QueueName};
//! use bytes::Bytes;
//! use chrono::Duration;
//!
//! # tokio_test::block_on(async {
//! let client = QueueClientFactory::create_test_client();
//! let orders: QueueName = "orders".parse().unwrap();
//!
//! client.create_queue_if_not_exists(&orders).await.unwrap();
//! client.enqueue(&orders, Bytes::from("A")).await.unwrap();
//!
//! let lease = client
//!     .dequeue(&orders, Some(Duration::seconds(5)))
//!     .await
//!     .unwrap()
//!     .expect("message should be visible");
//! assert_eq!(lease.message().dequeue_count, 1);
//! client.delete(&orders, &lease).await.unwrap();
//!
//! assert_eq!(client.approximate_count(&orders).await.unwrap(), 0);
//! # });
//! ```

// Module declarations
pub mod client;
pub mod clock;
pub mod error;
mod lease;
pub mod message;
mod poison;
pub mod processor;
pub mod provider;
pub mod providers;
pub mod retry;
mod store;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory, QueueProvider, StandardQueueClient};
pub use clock::{
    Clock, IdGenerator, ManualClock, SequentialIdGenerator, SystemClock, UuidIdGenerator,
};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    encode_json, EnqueueOptions, Lease, LeaseToken, Message, MessageId, QueueName, Timestamp,
};
pub use processor::{MessageHandler, ProcessingSummary, QueueProcessor};
pub use provider::{InMemoryConfig, ProviderConfig, QueueConfig, QueueOptions};
pub use providers::InMemoryProvider;
pub use retry::{RetryPolicy, RetryingQueueClient};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
