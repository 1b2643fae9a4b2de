//! Message Store: per-queue holders of messages and their visibility state.
//!
//! Each queue sits behind its own mutex and every operation here is a single
//! synchronous critical section. Messages are indexed by a schedule ordered on
//! `(visible_at, enqueued_at, sequence)`, so the next visible message is the
//! first schedule entry whose `visible_at` is not in the future.

use crate::error::QueueError;
use crate::message::{LeaseToken, Message, MessageId, QueueName, Timestamp};
use crate::provider::QueueOptions;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

// ============================================================================
// Queue metadata
// ============================================================================

/// Role a queue plays in poison routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    /// Ordinary queue; exhausted messages are diverted to its poison queue
    Standard,
    /// Dead-letter queue; never routed further
    Poison,
}

/// Settings and role of a queue, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueProfile {
    pub(crate) options: QueueOptions,
    pub(crate) kind: QueueKind,
}

// ============================================================================
// Stored messages
// ============================================================================

/// A message as held by the store, including its current lease token
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub(crate) id: MessageId,
    pub(crate) body: Bytes,
    pub(crate) enqueued_at: Timestamp,
    pub(crate) visible_at: Timestamp,
    pub(crate) dequeue_count: u32,
    pub(crate) lease_token: Option<LeaseToken>,
    sequence: u64,
}

impl StoredMessage {
    /// Fresh message with no lease and a dequeue count of zero
    pub(crate) fn new(
        id: MessageId,
        body: Bytes,
        enqueued_at: Timestamp,
        visible_at: Timestamp,
    ) -> Self {
        Self {
            id,
            body,
            enqueued_at,
            visible_at,
            dequeue_count: 0,
            lease_token: None,
            sequence: 0,
        }
    }

    /// Public snapshot of this message as held by `queue`
    pub(crate) fn snapshot(&self, queue: &QueueName) -> Message {
        Message {
            id: self.id.clone(),
            body: self.body.clone(),
            queue: queue.clone(),
            enqueued_at: self.enqueued_at,
            visible_at: self.visible_at,
            dequeue_count: self.dequeue_count,
        }
    }

    pub(crate) fn is_visible(&self, now: &Timestamp) -> bool {
        self.visible_at <= *now
    }

    fn schedule_key(&self) -> ScheduleKey {
        ScheduleKey {
            visible_at: self.visible_at,
            enqueued_at: self.enqueued_at,
            sequence: self.sequence,
        }
    }
}

/// Position of a message in its queue's selection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduleKey {
    visible_at: Timestamp,
    enqueued_at: Timestamp,
    sequence: u64,
}

/// Outcome chosen for a message handed to a selection callback
pub(crate) enum Claim<T> {
    /// Leave the (possibly modified) message in the queue and yield `T`
    Keep(T),
    /// Remove the message from the queue and yield `T`
    Take(T),
    /// Remove the message without yielding; it is handed back for rerouting
    Divert,
}

/// Result of a mutating selection
pub(crate) struct Claimed<T> {
    pub(crate) selected: Vec<T>,
    pub(crate) diverted: Vec<StoredMessage>,
}

// ============================================================================
// Per-queue state
// ============================================================================

struct QueueState {
    name: QueueName,
    profile: QueueProfile,
    messages: HashMap<u64, StoredMessage>,
    ids: HashMap<MessageId, u64>,
    schedule: BTreeSet<ScheduleKey>,
    next_sequence: u64,
}

impl QueueState {
    fn new(name: QueueName, profile: QueueProfile) -> Self {
        Self {
            name,
            profile,
            messages: HashMap::new(),
            ids: HashMap::new(),
            schedule: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn insert(&mut self, mut message: StoredMessage) {
        message.sequence = self.next_sequence;
        self.next_sequence += 1;

        self.schedule.insert(message.schedule_key());
        self.ids.insert(message.id.clone(), message.sequence);
        self.messages.insert(message.sequence, message);
    }

    /// Detach a message from the index; it must be reattached or dropped
    fn detach(&mut self, sequence: u64) -> Option<StoredMessage> {
        let message = self.messages.remove(&sequence)?;
        self.schedule.remove(&message.schedule_key());
        self.ids.remove(&message.id);
        Some(message)
    }

    fn reattach(&mut self, message: StoredMessage) {
        self.schedule.insert(message.schedule_key());
        self.ids.insert(message.id.clone(), message.sequence);
        self.messages.insert(message.sequence, message);
    }

    fn first_visible(&self, now: &Timestamp) -> Option<u64> {
        self.schedule
            .iter()
            .next()
            .filter(|key| key.visible_at <= *now)
            .map(|key| key.sequence)
    }

    fn sequence_of(&self, id: &MessageId) -> Result<u64, QueueError> {
        self.ids
            .get(id)
            .copied()
            .ok_or_else(|| QueueError::MessageNotFound {
                queue_name: self.name.to_string(),
                message_id: id.to_string(),
            })
    }
}

// ============================================================================
// MessageStore
// ============================================================================

/// Registry of queues and their messages
#[derive(Default)]
pub(crate) struct MessageStore {
    queues: RwLock<HashMap<QueueName, Arc<Mutex<QueueState>>>>,
}

impl MessageStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &QueueName) -> Result<Arc<Mutex<QueueState>>, QueueError> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        queues
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::queue_not_found(name.as_str()))
    }

    fn lock(queue: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
        queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a queue; returns `false` (and changes nothing) if it already exists
    pub(crate) fn create_queue(&self, name: &QueueName, profile: QueueProfile) -> bool {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(name) {
            return false;
        }

        queues.insert(
            name.clone(),
            Arc::new(Mutex::new(QueueState::new(name.clone(), profile))),
        );
        true
    }

    /// Add a fresh message to the poison queue `name`, creating it if needed.
    ///
    /// An existing queue keeps its options but stops being routed. Lookup,
    /// creation and insertion happen under one registry lock, so a concurrent
    /// delete of the poison queue is ordered wholly before or after the
    /// insert. Returns the stored message and whether the queue was created.
    pub(crate) fn insert_into_poison_queue(
        &self,
        name: &QueueName,
        options: QueueOptions,
        id: MessageId,
        body: Bytes,
        now: Timestamp,
    ) -> (Message, bool) {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);

        let (queue, created) = match queues.get(name) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                let profile = QueueProfile {
                    options,
                    kind: QueueKind::Poison,
                };
                let queue = Arc::new(Mutex::new(QueueState::new(name.clone(), profile)));
                queues.insert(name.clone(), Arc::clone(&queue));
                (queue, true)
            }
        };

        let mut state = Self::lock(&queue);
        state.profile.kind = QueueKind::Poison;

        let message = StoredMessage::new(id, body, now, now);
        let snapshot = message.snapshot(name);
        state.insert(message);

        (snapshot, created)
    }

    /// Remove a queue and discard all of its messages
    pub(crate) fn delete_queue(&self, name: &QueueName) -> Result<usize, QueueError> {
        let removed = {
            let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
            queues.remove(name)
        };

        match removed {
            Some(queue) => Ok(Self::lock(&queue).messages.len()),
            None => Err(QueueError::queue_not_found(name.as_str())),
        }
    }

    /// Names of all queues, sorted
    pub(crate) fn queue_names(&self) -> Vec<QueueName> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<QueueName> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn profile(&self, name: &QueueName) -> Result<QueueProfile, QueueError> {
        let queue = self.queue(name)?;
        let state = Self::lock(&queue);
        Ok(state.profile.clone())
    }

    /// Add a new message with no lease and a dequeue count of zero
    pub(crate) fn insert(
        &self,
        name: &QueueName,
        id: MessageId,
        body: Bytes,
        enqueued_at: Timestamp,
        visible_at: Timestamp,
    ) -> Result<Message, QueueError> {
        let queue = self.queue(name)?;
        let mut state = Self::lock(&queue);

        let message = StoredMessage::new(id, body, enqueued_at, visible_at);
        let snapshot = message.snapshot(name);
        state.insert(message);

        Ok(snapshot)
    }

    /// Up to `n` visible messages in selection order, without side effects
    pub(crate) fn peek_visible(
        &self,
        name: &QueueName,
        now: Timestamp,
        n: usize,
    ) -> Result<Vec<Message>, QueueError> {
        let queue = self.queue(name)?;
        let state = Self::lock(&queue);

        Ok(state
            .schedule
            .iter()
            .take_while(|key| key.visible_at <= now)
            .take(n)
            .filter_map(|key| state.messages.get(&key.sequence))
            .map(|message| message.snapshot(name))
            .collect())
    }

    /// Hand the next visible message to `decide`, if there is one
    pub(crate) fn select_next_visible<T, F>(
        &self,
        name: &QueueName,
        now: Timestamp,
        decide: F,
    ) -> Result<Claimed<T>, QueueError>
    where
        F: FnMut(&QueueProfile, &mut StoredMessage) -> Claim<T>,
    {
        self.select_n_visible(name, now, 1, decide)
    }

    /// Hand visible messages one at a time to `decide` until `n` are selected.
    ///
    /// Each message is re-indexed after `decide` runs and before the next is
    /// chosen, so a callback that moves `visible_at` past `now` guarantees the
    /// same message is not handed out twice. Diverted messages do not count
    /// towards `n`. The scan visits at most as many messages as the queue held
    /// on entry.
    pub(crate) fn select_n_visible<T, F>(
        &self,
        name: &QueueName,
        now: Timestamp,
        n: usize,
        mut decide: F,
    ) -> Result<Claimed<T>, QueueError>
    where
        F: FnMut(&QueueProfile, &mut StoredMessage) -> Claim<T>,
    {
        let queue = self.queue(name)?;
        let mut state = Self::lock(&queue);

        let mut claimed = Claimed {
            selected: Vec::new(),
            diverted: Vec::new(),
        };
        let mut budget = state.messages.len();

        while claimed.selected.len() < n && budget > 0 {
            budget -= 1;

            let Some(sequence) = state.first_visible(&now) else {
                break;
            };
            let Some(mut message) = state.detach(sequence) else {
                break;
            };

            match decide(&state.profile, &mut message) {
                Claim::Keep(value) => {
                    state.reattach(message);
                    claimed.selected.push(value);
                }
                Claim::Take(value) => claimed.selected.push(value),
                Claim::Divert => claimed.diverted.push(message),
            }
        }

        Ok(claimed)
    }

    /// Apply `f` to the message with `id`, re-indexing it afterwards.
    ///
    /// `f` must check its preconditions before modifying the message; an
    /// error leaves the message in the queue as `f` left it.
    pub(crate) fn with_message_mut<T, F>(
        &self,
        name: &QueueName,
        id: &MessageId,
        f: F,
    ) -> Result<T, QueueError>
    where
        F: FnOnce(&mut StoredMessage) -> Result<T, QueueError>,
    {
        let queue = self.queue(name)?;
        let mut state = Self::lock(&queue);

        let sequence = state.sequence_of(id)?;
        let Some(mut message) = state.detach(sequence) else {
            return Err(QueueError::MessageNotFound {
                queue_name: name.to_string(),
                message_id: id.to_string(),
            });
        };

        let result = f(&mut message);
        state.reattach(message);
        result
    }

    /// Permanently remove the message with `id` if `check` accepts it
    pub(crate) fn remove_if<F>(
        &self,
        name: &QueueName,
        id: &MessageId,
        check: F,
    ) -> Result<StoredMessage, QueueError>
    where
        F: FnOnce(&StoredMessage) -> Result<(), QueueError>,
    {
        let queue = self.queue(name)?;
        let mut state = Self::lock(&queue);

        let sequence = state.sequence_of(id)?;
        if let Some(message) = state.messages.get(&sequence) {
            check(message)?;
        }

        state
            .detach(sequence)
            .ok_or_else(|| QueueError::MessageNotFound {
                queue_name: name.to_string(),
                message_id: id.to_string(),
            })
    }

    /// Number of messages held, regardless of visibility
    pub(crate) fn count(&self, name: &QueueName) -> Result<usize, QueueError> {
        let queue = self.queue(name)?;
        let state = Self::lock(&queue);
        Ok(state.messages.len())
    }
}
