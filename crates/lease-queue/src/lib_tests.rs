//! Tests for the lease-queue library module.

use super::*;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("test-queue".to_string()).is_ok());
    assert!(QueueName::new("queue_123".to_string()).is_ok());
    assert!(QueueName::new("a".to_string()).is_ok());

    // Invalid names
    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("-leading-hyphen".to_string()).is_err());
    assert!(QueueName::new("trailing-hyphen-".to_string()).is_err());
    assert!(QueueName::new("double--hyphen".to_string()).is_err());
    assert!(QueueName::new("special@chars".to_string()).is_err());
}

#[test]
fn test_message_id_generation() {
    let id1 = MessageId::new();
    let id2 = MessageId::new();
    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());
}

#[test]
fn test_default_config_reexports() {
    let config = QueueConfig::default();
    assert_eq!(config.queue_defaults, QueueOptions::default());
    assert_eq!(
        config.provider,
        ProviderConfig::InMemory(InMemoryConfig::default())
    );
    assert_eq!(config.retry_policy().max_attempts, RetryPolicy::default().max_attempts);
}

/// Verify the end-to-end example: lease, lapse, redeliver, delete.
#[tokio::test]
async fn test_orders_walkthrough() {
    use bytes::Bytes;
    use chrono::Duration;
    use std::sync::Arc;

    let clock = ManualClock::starting_now();
    let client = QueueClientFactory::create_client_with(
        QueueConfig::default(),
        Arc::new(clock.clone()),
        Arc::new(UuidIdGenerator),
    )
    .unwrap();
    let orders: QueueName = "orders".parse().unwrap();

    assert!(client.create_queue_if_not_exists(&orders).await.unwrap());
    client.enqueue(&orders, Bytes::from("A")).await.unwrap();

    let first = client
        .dequeue(&orders, Some(Duration::seconds(5)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.message().body, Bytes::from("A"));
    assert_eq!(first.message().dequeue_count, 1);

    clock.advance(Duration::seconds(6));

    let second = client
        .dequeue(&orders, Some(Duration::seconds(5)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.message_id(), first.message_id());
    assert_eq!(second.message().dequeue_count, 2);

    client.delete(&orders, &second).await.unwrap();
    assert_eq!(client.approximate_count(&orders).await.unwrap(), 0);
}
