//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Maximum length of a queue name, including any derived poison-queue suffix
pub const MAX_QUEUE_NAME_LENGTH: usize = 260;

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        if name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", MAX_QUEUE_NAME_LENGTH),
            });
        }

        // ASCII alphanumeric, hyphens, and underscores only
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Derive a related queue name by appending a suffix (e.g. `orders` -> `orders-poison`)
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, ValidationError> {
        Self::new(format!("{}{}", self.0, suffix))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create message ID from a generator-controlled format
    pub(crate) fn from_generated(id: String) -> Self {
        Self(id)
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque capability proving the holder owns the current lease on a message.
///
/// A fresh token is minted on every lease grant and on every update; any
/// previously issued token for the same message stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Generate new random lease token
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Create token from a generator-controlled format
    pub(crate) fn from_generated(token: String) -> Self {
        Self(token)
    }

    /// Get token as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LeaseToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "lease_token".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp `offset` after this one
    pub fn after(&self, offset: Duration) -> Self {
        Self(self.0 + offset)
    }

    /// Time elapsed from `earlier` to this timestamp (zero if `earlier` is later)
    pub fn since(&self, earlier: &Timestamp) -> Duration {
        if earlier.0 >= self.0 {
            Duration::zero()
        } else {
            self.0 - earlier.0
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Read-only snapshot of a message held by a queue.
///
/// Snapshots are returned by peek and dequeue operations. They never carry
/// the lease token; only a [`Lease`] does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub queue: QueueName,
    pub enqueued_at: Timestamp,
    pub visible_at: Timestamp,
    pub dequeue_count: u32,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Message {
    /// Body as UTF-8 text
    pub fn body_as_str(&self) -> Result<&str, SerializationError> {
        std::str::from_utf8(&self.body).map_err(|_| SerializationError::InvalidUtf8)
    }

    /// Deserialize a JSON body into `T`
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Check if message is eligible for dequeue at `now`
    pub fn is_visible_at(&self, now: &Timestamp) -> bool {
        *now >= self.visible_at
    }
}

/// Serialize a value as a JSON message body
pub fn encode_json<T: Serialize>(value: &T) -> Result<Bytes, SerializationError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Handle for a message currently leased to the caller.
///
/// Returned by dequeue and update; presented back to delete, update, or
/// abandon to prove the caller still holds the in-flight processing right.
#[derive(Debug, Clone)]
pub struct Lease {
    message: Message,
    token: LeaseToken,
}

impl Lease {
    /// Create new lease handle
    pub fn new(message: Message, token: LeaseToken) -> Self {
        Self { message, token }
    }

    /// Snapshot of the leased message as of the grant
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Identifier of the leased message
    pub fn message_id(&self) -> &MessageId {
        &self.message.id
    }

    /// Queue the message was leased from
    pub fn queue(&self) -> &QueueName {
        &self.message.queue
    }

    /// Lease token to present when settling
    pub fn token(&self) -> &LeaseToken {
        &self.token
    }

    /// Instant the visibility window closes
    pub fn expires_at(&self) -> Timestamp {
        self.message.visible_at
    }

    /// Check if the visibility window has closed at `now`
    pub fn is_expired(&self, now: &Timestamp) -> bool {
        *now >= self.message.visible_at
    }

    /// Consume the handle, keeping only the message snapshot
    pub fn into_message(self) -> Message {
        self.message
    }
}

// ============================================================================
// Enqueue Options
// ============================================================================

/// Configuration options for adding messages to queues
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Keep the new message invisible for this long after enqueue
    pub initial_visibility_delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Create new enqueue options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay the first moment the message can be dequeued
    pub fn with_initial_visibility_delay(mut self, delay: Duration) -> Self {
        self.initial_visibility_delay = Some(delay);
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
