//! Correlation of inbound responses with waiting callers.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::protocol::Message;

struct Waiter {
    action: String,
    seq: u64,
    tx: oneshot::Sender<Message>,
}

#[derive(Default)]
struct Table {
    waiters: HashMap<String, Waiter>,
    next_seq: u64,
}

/// Waiters keyed by correlation id.
///
/// Messages that echo a correlation id go to exactly that waiter. Messages
/// without one go to the oldest waiter registered for the same action.
#[derive(Default)]
pub struct PendingRequests {
    table: Mutex<Table>,
}

impl PendingRequests {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. Must happen before the request is sent.
    pub fn register(&self, id: &str, action: &str) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock();
        let seq = table.next_seq;
        table.next_seq += 1;
        table.waiters.insert(
            id.to_string(),
            Waiter {
                action: action.to_string(),
                seq,
                tx,
            },
        );
        rx
    }

    /// Hand `message` to its waiter.
    ///
    /// Returns the message back when no live waiter claimed it.
    pub fn complete(&self, message: Message) -> Option<Message> {
        let waiter = {
            let mut table = self.table.lock();
            let key = match message.correlation_id() {
                Some(id) => table.waiters.contains_key(id).then(|| id.to_string()),
                None => table
                    .waiters
                    .iter()
                    .filter(|(_, w)| w.action == message.action)
                    .min_by_key(|(_, w)| w.seq)
                    .map(|(id, _)| id.clone()),
            };
            key.and_then(|k| table.waiters.remove(&k))
        };

        match waiter {
            Some(waiter) => waiter.tx.send(message).err(),
            None => Some(message),
        }
    }

    /// Drop the waiter for `id` (timeout or send failure).
    pub fn cancel(&self, id: &str) -> bool {
        self.table.lock().waiters.remove(id).is_some()
    }

    /// Resolve every waiter with an error response carrying `text`.
    pub fn fail_all(&self, text: &str) -> usize {
        let drained: Vec<(String, Waiter)> = self.table.lock().waiters.drain().collect();
        let count = drained.len();
        for (id, waiter) in drained {
            let _ = waiter
                .tx
                .send(Message::error_response(&waiter.action, text).with_correlation_id(&id));
        }
        count
    }

    /// Number of outstanding waiters
    pub fn len(&self) -> usize {
        self.table.lock().waiters.len()
    }

    /// Whether no waiter is outstanding
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("outstanding", &self.len())
            .finish()
    }
}
