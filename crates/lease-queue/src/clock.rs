//! Time and identifier sources injected into queue providers.
//!
//! Visibility windows are evaluated against [`Clock::now`] rather than the
//! system time directly so that lease expiry can be driven deterministically
//! in tests with [`ManualClock`].

use crate::message::{LeaseToken, MessageId, Timestamp};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

// ============================================================================
// Clock
// ============================================================================

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying instant, so a test can keep one handle
/// and hand another to the provider.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(Mutex::new(start.as_datetime())),
        }
    }

    /// Create clock frozen at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(Timestamp::now())
    }

    /// Move the clock forward by `delta`
    pub fn advance(&self, delta: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += delta;
    }

    /// Jump the clock to `instant`
    pub fn set(&self, instant: Timestamp) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = instant.as_datetime();
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Timestamp::from_datetime(*current)
    }
}

// ============================================================================
// Identifier generation
// ============================================================================

/// Source of message identifiers and lease tokens.
///
/// Implementations must never repeat a value within the lifetime of a queue.
pub trait IdGenerator: Send + Sync {
    /// Identifier for a newly inserted message
    fn next_message_id(&self) -> MessageId;

    /// Token for a newly granted lease
    fn next_lease_token(&self) -> LeaseToken;
}

/// Random UUID v4 identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_message_id(&self) -> MessageId {
        MessageId::new()
    }

    fn next_lease_token(&self) -> LeaseToken {
        LeaseToken::new()
    }
}

/// Deterministic, process-unique identifiers (`msg-1`, `lease-2`, ...)
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_message_id(&self) -> MessageId {
        MessageId::from_generated(format!("msg-{}", self.next()))
    }

    fn next_lease_token(&self) -> LeaseToken {
        LeaseToken::from_generated(format!("lease-{}", self.next()))
    }
}
