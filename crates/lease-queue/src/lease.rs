//! Lease Manager: the visibility-timeout state machine for a single message.
//!
//! ```text
//!             grant                 confirm
//!   Visible ---------> Leased --------------> Deleted
//!      ^                |  ^  \
//!      |   expiry /     |  |   \ update (new token)
//!      +--- release ----+  +----+
//! ```
//!
//! Expiry is passive: a leased message whose `visible_at` has passed is simply
//! selectable again. Nothing here runs on a timer.

use crate::clock::IdGenerator;
use crate::error::QueueError;
use crate::message::{LeaseToken, QueueName, Timestamp};
use crate::store::StoredMessage;
use bytes::Bytes;
use chrono::Duration;
use std::sync::Arc;

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;

/// Lease state of a message at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseState {
    /// Eligible for dequeue
    Visible,
    /// Hidden by a lease whose window has not yet closed
    Leased,
    /// Hidden by an initial visibility delay, never leased
    Delayed,
}

/// Grants, rotates, and checks lease tokens
pub(crate) struct LeaseManager {
    ids: Arc<dyn IdGenerator>,
}

impl LeaseManager {
    pub(crate) fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub(crate) fn state(message: &StoredMessage, now: &Timestamp) -> LeaseState {
        if message.is_visible(now) {
            LeaseState::Visible
        } else if message.lease_token.is_some() {
            LeaseState::Leased
        } else {
            LeaseState::Delayed
        }
    }

    /// Lease a visible message for `timeout`.
    ///
    /// Hides the message until `now + timeout`, counts the delivery, and
    /// replaces any previous token. The message must be visible at `now`.
    pub(crate) fn grant(
        &self,
        message: &mut StoredMessage,
        timeout: Duration,
        now: Timestamp,
    ) -> LeaseToken {
        debug_assert!(message.is_visible(&now));

        let token = self.ids.next_lease_token();
        message.visible_at = now.after(timeout);
        message.dequeue_count = message.dequeue_count.saturating_add(1);
        message.lease_token = Some(token.clone());
        token
    }

    /// Check `token` is the current lease token of `message`
    pub(crate) fn confirm(
        queue: &QueueName,
        message: &StoredMessage,
        token: &LeaseToken,
    ) -> Result<(), QueueError> {
        match &message.lease_token {
            Some(current) if current == token => Ok(()),
            _ => Err(QueueError::LeaseExpiredOrInvalid {
                queue_name: queue.to_string(),
                message_id: message.id.to_string(),
            }),
        }
    }

    /// Replace the body and visibility of a leased message under a new token
    pub(crate) fn update(
        &self,
        queue: &QueueName,
        message: &mut StoredMessage,
        token: &LeaseToken,
        new_body: Option<Bytes>,
        timeout: Duration,
        now: Timestamp,
    ) -> Result<LeaseToken, QueueError> {
        Self::confirm(queue, message, token)?;

        if let Some(body) = new_body {
            message.body = body;
        }

        let rotated = self.ids.next_lease_token();
        message.visible_at = now.after(timeout);
        message.lease_token = Some(rotated.clone());
        Ok(rotated)
    }

    /// Give up a lease so the message is visible again at once
    pub(crate) fn release(
        queue: &QueueName,
        message: &mut StoredMessage,
        token: &LeaseToken,
        now: Timestamp,
    ) -> Result<(), QueueError> {
        Self::confirm(queue, message, token)?;

        if message.visible_at > now {
            message.visible_at = now;
        }
        message.lease_token = None;
        Ok(())
    }

    /// Count a delivery that takes the message without leasing it
    pub(crate) fn consume(message: &mut StoredMessage) {
        message.dequeue_count = message.dequeue_count.saturating_add(1);
        message.lease_token = None;
    }
}
