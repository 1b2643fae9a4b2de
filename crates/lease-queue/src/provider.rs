//! Provider and queue configuration.
//!
//! Configuration is layered with the `config` crate: built-in defaults, then an
//! optional TOML/YAML/JSON file, then `LEASE_QUEUE__*` environment variables
//! (nested keys separated by `__`, e.g. `LEASE_QUEUE__QUEUE_DEFAULTS__MAX_DELIVERY_ATTEMPTS`).

use crate::error::{ConfigurationError, ValidationError};
use crate::retry::RetryPolicy;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;

/// Deliveries allowed before a message is routed to the poison queue
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// Default lease length when a dequeue does not supply one (seconds)
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: i64 = 30;

/// Largest visibility timeout accepted by any operation (7 days)
pub const MAX_VISIBILITY_TIMEOUT_SECS: i64 = 7 * 24 * 60 * 60;

/// Largest batch accepted by batch dequeue and peek operations
pub const MAX_BATCH_SIZE: u32 = 32;

/// Suffix appended to a queue name to form its poison queue name
pub const DEFAULT_POISON_QUEUE_SUFFIX: &str = "-poison";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "LEASE_QUEUE";

/// Whole-second serialization for chrono durations
mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = i64::deserialize(deserializer)?;
        Duration::try_seconds(seconds)
            .ok_or_else(|| serde::de::Error::custom("duration out of range"))
    }
}

/// Validate a visibility timeout (or delay) against the allowed range.
///
/// `allow_zero` distinguishes "make visible now" operations (update, delayed
/// enqueue) from lease grants, which must hide the message for some time.
pub(crate) fn validate_visibility(
    field: &str,
    timeout: Duration,
    allow_zero: bool,
) -> Result<(), ValidationError> {
    if timeout < Duration::zero() || (!allow_zero && timeout.is_zero()) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: if allow_zero {
                "must not be negative".to_string()
            } else {
                "must be positive".to_string()
            },
        });
    }

    if timeout > Duration::seconds(MAX_VISIBILITY_TIMEOUT_SECS) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must not exceed {} seconds", MAX_VISIBILITY_TIMEOUT_SECS),
        });
    }

    Ok(())
}

// ============================================================================
// Per-queue options
// ============================================================================

/// Settings fixed when a queue is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Dequeues allowed before the message is moved to the poison queue
    pub max_delivery_attempts: u32,

    /// Lease length used when a dequeue does not specify one
    #[serde(with = "duration_seconds")]
    pub default_visibility_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            default_visibility_timeout: Duration::seconds(DEFAULT_VISIBILITY_TIMEOUT_SECS),
        }
    }
}

impl QueueOptions {
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    pub fn with_default_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.default_visibility_timeout = timeout;
        self
    }

    /// Check options are usable for a queue
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_delivery_attempts == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_delivery_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        validate_visibility(
            "default_visibility_timeout",
            self.default_visibility_timeout,
            false,
        )
    }
}

// ============================================================================
// Client configuration
// ============================================================================

/// Configuration for queue client initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Backing store selection
    pub provider: ProviderConfig,

    /// Options applied to queues created without explicit options
    pub queue_defaults: QueueOptions,

    /// Upper bound for batch dequeue/peek requests
    pub max_batch_size: u32,

    /// Retries performed by [`crate::RetryingQueueClient`] on transient errors
    pub max_retry_attempts: u32,

    /// Fixed delay between those retries
    #[serde(with = "duration_seconds")]
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            queue_defaults: QueueOptions::default(),
            max_batch_size: MAX_BATCH_SIZE,
            max_retry_attempts: 3,
            retry_delay: Duration::seconds(2),
        }
    }
}

impl QueueConfig {
    /// Load configuration from a single file (format inferred from extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(true))
            .build()?
            .try_deserialize::<Self>()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file overlaid with environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;

        config.validate()?;
        Ok(config)
    }

    /// Check all values are within supported ranges
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.queue_defaults
            .validate()
            .map_err(|e| ConfigurationError::Invalid {
                message: e.to_string(),
            })?;

        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(ConfigurationError::Invalid {
                message: format!("max_batch_size must be 1-{}", MAX_BATCH_SIZE),
            });
        }

        if self.retry_delay < Duration::zero() {
            return Err(ConfigurationError::Invalid {
                message: "retry_delay must not be negative".to_string(),
            });
        }

        match &self.provider {
            ProviderConfig::InMemory(in_memory) => in_memory.validate(),
        }
    }

    /// Retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.max_retry_attempts,
            self.retry_delay.to_std().unwrap_or_default(),
        )
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::InMemory(InMemoryConfig::default())
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Appended to a queue name to form its poison queue name
    pub poison_queue_suffix: String,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            poison_queue_suffix: DEFAULT_POISON_QUEUE_SUFFIX.to_string(),
        }
    }
}

impl InMemoryConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        let valid = !self.poison_queue_suffix.is_empty()
            && self
                .poison_queue_suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            && !self.poison_queue_suffix.ends_with('-');

        if valid {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid {
                message: format!(
                    "poison_queue_suffix '{}' cannot form a valid queue name",
                    self.poison_queue_suffix
                ),
            })
        }
    }
}
