//! Integration tests for poison message routing
//!
//! These tests verify:
//! - Messages leased past their delivery limit move to the poison queue
//! - Poison copies start over as fresh messages with the original body
//! - Poison queues are ordinary queues that are never routed further

mod common;

use bytes::Bytes;
use common::{queue_name, TestHarness};
use lease_queue::provider::DEFAULT_MAX_DELIVERY_ATTEMPTS;
use lease_queue::{InMemoryConfig, ProviderConfig, QueueConfig, QueueError};

/// Verify the delivery limit with the default of five attempts.
#[tokio::test]
async fn test_default_threshold_moves_message_on_sixth_lease() {
    // Arrange
    let harness = TestHarness::new();
    let queue = harness.queue("orders").await;
    harness.enqueue(&queue, "A").await;

    // Act
    for attempt in 1..=DEFAULT_MAX_DELIVERY_ATTEMPTS {
        let lease = harness.lease(&queue, 5).await;
        assert_eq!(lease.message().dequeue_count, attempt);
        harness.advance(5);
    }
    let final_attempt = harness.client.dequeue(&queue, None).await.unwrap();

    // Assert
    assert!(final_attempt.is_none());
    assert_eq!(harness.count(&queue).await, 0);

    let poison = queue_name("orders-poison");
    let quarantined = harness.client.peek(&poison).await.unwrap().unwrap();
    assert_eq!(quarantined.dequeue_count, 0);
    assert_eq!(quarantined.body, Bytes::from("A"));
    assert_eq!(quarantined.queue, poison);
}

#[tokio::test]
async fn test_custom_threshold() {
    let harness = TestHarness::new();
    let queue = harness.queue_with_limit("fragile", 1).await;
    harness.enqueue(&queue, "boom").await;

    harness.lease(&queue, 5).await;
    harness.advance(5);

    assert!(harness.client.dequeue(&queue, None).await.unwrap().is_none());
    assert_eq!(harness.count(&queue_name("fragile-poison")).await, 1);
}

/// Verify that a batch skips poisoned messages and fills up from healthy ones.
#[tokio::test]
async fn test_batch_dequeue_continues_past_poisoned_message() {
    // Arrange
    let harness = TestHarness::new();
    let queue = harness.queue_with_limit("mixed", 1).await;
    harness.enqueue(&queue, "bad").await;
    harness.lease(&queue, 5).await;
    harness.advance(5);
    harness.enqueue(&queue, "good-1").await;
    harness.enqueue(&queue, "good-2").await;

    // Act
    let leases = harness.client.dequeue_batch(&queue, 2, None).await.unwrap();

    // Assert
    let bodies: Vec<&str> = leases
        .iter()
        .map(|lease| lease.message().body_as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["good-1", "good-2"]);
    assert_eq!(harness.count(&queue_name("mixed-poison")).await, 1);
}

#[tokio::test]
async fn test_poison_queue_is_never_routed_further() {
    let harness = TestHarness::new();
    let queue = harness.queue_with_limit("jobs", 1).await;
    harness.enqueue(&queue, "bad").await;
    harness.lease(&queue, 5).await;
    harness.advance(5);
    harness.client.dequeue(&queue, None).await.unwrap();

    let poison = queue_name("jobs-poison");
    for attempt in 1..=5 {
        let lease = harness.lease(&poison, 5).await;
        assert_eq!(lease.message().dequeue_count, attempt);
        harness.advance(5);
    }

    assert_eq!(harness.count(&poison).await, 1);
    let queues = harness.client.list_queues().await.unwrap();
    assert!(!queues.contains(&queue_name("jobs-poison-poison")));
}

/// Verify that the lease held before quarantine can no longer settle the message.
#[tokio::test]
async fn test_lease_on_quarantined_message_is_gone() {
    let harness = TestHarness::new();
    let queue = harness.queue_with_limit("jobs", 1).await;
    harness.enqueue(&queue, "bad").await;

    let lease = harness.lease(&queue, 5).await;
    harness.advance(5);
    harness.client.dequeue(&queue, None).await.unwrap();

    let result = harness.client.delete(&queue, &lease).await;

    assert!(matches!(result, Err(QueueError::MessageNotFound { .. })));
}

#[tokio::test]
async fn test_configured_suffix() {
    let config = QueueConfig {
        provider: ProviderConfig::InMemory(InMemoryConfig {
            poison_queue_suffix: "_dlq".to_string(),
        }),
        ..QueueConfig::default()
    };
    let harness = TestHarness::with_config(config);
    let queue = harness.queue_with_limit("orders", 1).await;
    harness.enqueue(&queue, "A").await;
    harness.lease(&queue, 5).await;
    harness.advance(5);

    harness.client.dequeue(&queue, None).await.unwrap();

    assert_eq!(harness.count(&queue_name("orders_dlq")).await, 1);
}

#[tokio::test]
async fn test_deleted_message_is_not_poisoned() {
    let harness = TestHarness::new();
    let queue = harness.queue_with_limit("jobs", 2).await;
    harness.enqueue(&queue, "ok").await;

    harness.lease(&queue, 5).await;
    harness.advance(5);
    let lease = harness.lease(&queue, 5).await;
    harness.client.delete(&queue, &lease).await.unwrap();

    let queues = harness.client.list_queues().await.unwrap();
    assert_eq!(queues, vec![queue]);
}
