//! Unbounded FIFO event queue.
//!
//! Any number of producers call [`EventQueue::publish`]; consumers take a
//! [`Subscription`] and pull events one at a time. When several subscriptions
//! are live they compete for events, so each event is delivered to exactly one
//! of them. Dropping a subscription never loses queued events: a later
//! subscription picks up where the previous one stopped.

use std::sync::Arc;

use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::Event;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue is closed")]
    Closed,
}

/// Cloneable handle to the shared queue.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Event>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue an event and hand it back to the caller. Never waits.
    pub fn publish(&self, event: Event) -> Result<Event, QueueError> {
        let accepted = event.clone();
        self.tx.send(event).map_err(|_| QueueError::Closed)?;
        debug!(event_id = %accepted.id, event_type = %accepted.event_type, "event published");
        Ok(accepted)
    }

    /// Attach a consumer.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Arc::clone(&self.rx),
        }
    }

    /// Stop accepting new events. Events already queued are still delivered;
    /// once they are drained every subscription yields `None`.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A consumer's view of the queue.
pub struct Subscription {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
}

impl Subscription {
    /// Wait for the next event in publish order.
    ///
    /// Cancel safe: if the returned future is dropped before completing, no
    /// event is consumed.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    /// Consume the subscription as a lazy, infinite stream.
    pub fn into_stream(self) -> impl Stream<Item = Event> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    fn evt(n: u64) -> Event {
        Event::with_json(EventType::CustomAlert, "test", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_fifo_order_single_producer() {
        let queue = EventQueue::new();
        for n in 0..5 {
            queue.publish(evt(n)).unwrap();
        }
        let mut sub = queue.subscribe();
        for n in 0..5 {
            let e = sub.next().await.unwrap();
            assert_eq!(e.payload["n"], n);
        }
    }

    #[tokio::test]
    async fn test_publish_returns_accepted_event() {
        let queue = EventQueue::new();
        let original = evt(1);
        let accepted = queue.publish(original.clone()).unwrap();
        assert_eq!(accepted, original);
    }

    #[tokio::test]
    async fn test_resubscribe_keeps_pending_events() {
        let queue = EventQueue::new();
        queue.publish(evt(1)).unwrap();
        queue.publish(evt(2)).unwrap();

        let mut first = queue.subscribe();
        assert_eq!(first.next().await.unwrap().payload["n"], 1);
        drop(first);

        let mut second = queue.subscribe();
        assert_eq!(second.next().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_competing_consumers_each_event_once() {
        let queue = EventQueue::new();
        let total = 50u64;
        for n in 0..total {
            queue.publish(evt(n)).unwrap();
        }
        queue.close().await;

        let mut handles = Vec::new();
        for _ in 0..3 {
            let mut sub = queue.subscribe();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(e) = sub.next().await {
                    seen.push(e.payload["n"].as_u64().unwrap());
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..total).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_next_blocks_until_publish() {
        let queue = EventQueue::new();
        let mut sub = queue.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(pending.is_err(), "empty queue must not yield");

        queue.publish(evt(7)).unwrap();
        let e = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.payload["n"], 7);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_publish() {
        let queue = EventQueue::new();
        queue.publish(evt(1)).unwrap();
        queue.close().await;
        assert!(queue.is_closed());
        assert_eq!(queue.publish(evt(2)).unwrap_err(), QueueError::Closed);

        let mut stream = Box::pin(queue.subscribe().into_stream());
        assert_eq!(stream.next().await.unwrap().payload["n"], 1);
        assert!(stream.next().await.is_none());
    }
}
