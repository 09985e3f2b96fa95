// In-memory fan-out of execution status updates.
//
// One broker per execution kind, shared by every handler. Broadcast is a
// non-blocking send: a subscriber whose buffer is full loses that frame
// and catches up on the next one, because every frame carries a complete
// execution snapshot. Nothing is persisted; lifetime is the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Buffered frames per subscriber before drops start.
pub const SUBSCRIBER_BUFFER: usize = 100;

struct Subscriber<R> {
    id: u64,
    tx: mpsc::Sender<R>,
}

pub struct StreamBroker<R> {
    subscribers: RwLock<HashMap<String, Vec<Subscriber<R>>>>,
    next_id: AtomicU64,
}

impl<R: Clone + Send + 'static> StreamBroker<R> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber for an execution id. Returns the
    /// subscription id (for unsubscribe) and the receiving end.
    pub fn subscribe(&self, execution_id: &str) -> (u64, mpsc::Receiver<R>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .entry(execution_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove and close a subscription. Idempotent.
    pub fn unsubscribe(&self, execution_id: &str, subscription_id: u64) {
        let mut subscribers = self.subscribers.write();
        if let Some(entries) = subscribers.get_mut(execution_id) {
            entries.retain(|s| s.id != subscription_id);
            if entries.is_empty() {
                subscribers.remove(execution_id);
            }
        }
    }

    /// Deliver a snapshot to every subscriber of `execution_id`,
    /// non-blocking. Full buffers drop the frame for that subscriber only.
    pub fn broadcast(&self, execution_id: &str, execution: R) {
        let subscribers = self.subscribers.read();
        let Some(entries) = subscribers.get(execution_id) else {
            return;
        };
        for subscriber in entries {
            if let Err(err) = subscriber.tx.try_send(execution.clone()) {
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        tracing::debug!(
                            execution_id = %execution_id,
                            subscription_id = subscriber.id,
                            "subscriber buffer full, dropping frame"
                        );
                    }
                    mpsc::error::TrySendError::Closed(_) => {}
                }
            }
        }
    }

    pub fn subscriber_count(&self, execution_id: &str) -> usize {
        self.subscribers
            .read()
            .get(execution_id)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

impl<R: Clone + Send + 'static> Default for StreamBroker<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let broker = StreamBroker::<u32>::new();
        let (_id_a, mut rx_a) = broker.subscribe("e-1");
        let (_id_b, mut rx_b) = broker.subscribe("e-1");
        let (_id_c, mut rx_c) = broker.subscribe("e-2");

        broker.broadcast("e-1", 7);
        assert_eq!(rx_a.recv().await, Some(7));
        assert_eq!(rx_b.recv().await, Some(7));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_frame_for_that_subscriber_only() {
        let broker = StreamBroker::<u32>::new();
        let (_slow_id, mut slow_rx) = broker.subscribe("e-1");
        let (_fast_id, mut fast_rx) = broker.subscribe("e-1");

        for i in 0..(SUBSCRIBER_BUFFER as u32 + 10) {
            broker.broadcast("e-1", i);
            // Fast subscriber drains every frame.
            assert_eq!(fast_rx.recv().await, Some(i));
        }

        // Slow subscriber kept the first SUBSCRIBER_BUFFER frames and lost
        // the tail.
        let mut received = 0;
        while slow_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel_and_is_idempotent() {
        let broker = StreamBroker::<u32>::new();
        let (id, mut rx) = broker.subscribe("e-1");
        assert_eq!(broker.subscriber_count("e-1"), 1);

        broker.unsubscribe("e-1", id);
        assert_eq!(broker.subscriber_count("e-1"), 0);
        assert_eq!(rx.recv().await, None);

        broker.unsubscribe("e-1", id);
        assert_eq!(broker.subscriber_count("e-1"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_noop() {
        let broker = StreamBroker::<u32>::new();
        broker.broadcast("nobody", 1);
    }
}
