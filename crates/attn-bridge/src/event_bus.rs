use std::sync::{Arc, Mutex};

use crate::protocol::ServerEvent;

/// Outbound queue depth per client (§4.6). A client slow enough to fill
/// this loses events rather than applying back-pressure to the producer.
const CLIENT_QUEUE_CAPACITY: usize = 256;

/// A broadcast-style event bus built on top of flume channels.
///
/// Each call to [`subscribe`] creates a new receiver that will receive all
/// messages published after the subscription was created. Publishing never
/// blocks: a full client queue drops the message for that client only, and
/// a disconnected client is pruned on the next publish.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<ServerEvent>>>>,
}

impl EventBus {
    /// Create a new, empty event bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<ServerEvent> {
        let (tx, rx) = flume::bounded(CLIENT_QUEUE_CAPACITY);
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish a message to all current subscribers.
    ///
    /// A full queue drops the message for that client only; a disconnected
    /// receiver is pruned. Neither case is treated as an error — the bus
    /// never blocks or retries on behalf of a producer.
    pub fn publish(&self, msg: ServerEvent) {
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.retain(|tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => true,
            Err(flume::TrySendError::Disconnected(_)) => false,
        });
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
