use hive_lib::{Event, EventKind, InstanceId};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event queue is closed")]
pub struct QueueClosed;

/// Merges the events of every instance into one stream.
///
/// Any number of producers may push concurrently; pushes never block.
/// Events of one producer come out in the order they were pushed. There is
/// no ordering guarantee between producers. After [`EventQueue::close`],
/// `pop` hands out what is still buffered and then returns `None`.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<Event>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
    closed: CancellationToken,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            closed: CancellationToken::new(),
        }
    }

    pub fn push(&self, event: Event) -> Result<(), QueueClosed> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed);
        }
        self.sender.send(event).map_err(|_| QueueClosed)
    }

    /// Waits for the next event. Returns `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<Event> {
        let mut receiver = self.receiver.lock().await;
        if self.closed.is_cancelled() {
            return receiver.try_recv().ok();
        }
        tokio::select! {
            biased;
            event = receiver.recv() => event,
            _ = self.closed.cancelled() => receiver.try_recv().ok(),
        }
    }

    pub async fn pop_timeout(&self, timeout: Duration) -> Result<Option<Event>, Elapsed> {
        tokio::time::timeout(timeout, self.pop()).await
    }

    /// Non-blocking pop. `None` when nothing is buffered or another caller
    /// is currently popping.
    pub fn try_pop(&self) -> Option<Event> {
        let mut receiver = self.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            log::debug!("closing event queue");
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// A handle that stamps events with `producer` and its next sequence number.
    pub fn sink(&self, producer: InstanceId) -> EventSink {
        EventSink {
            producer,
            queue: self.clone(),
            next_sequence: Arc::new(Mutex::new(0)),
        }
    }
}

/// Per-producer handle onto an [`EventQueue`]. Clones share the sequence
/// counter, so every event of a producer gets a distinct, increasing number.
#[derive(Clone)]
pub struct EventSink {
    producer: InstanceId,
    queue: EventQueue,
    next_sequence: Arc<Mutex<u64>>,
}

impl EventSink {
    pub fn producer(&self) -> InstanceId {
        self.producer
    }

    /// Pushes an event. Returns false if the queue was already closed.
    pub fn emit(&self, kind: EventKind) -> bool {
        let name = kind.name();
        // Sequence assignment and push happen under one lock so the queue
        // sees this producer's events in sequence order.
        let mut next = self
            .next_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let event = Event {
            instance: self.producer,
            sequence: *next,
            triggered: SystemTime::now(),
            kind,
        };
        match self.queue.push(event) {
            Ok(()) => {
                *next += 1;
                true
            }
            Err(QueueClosed) => {
                log_debug!(self.producer, "dropping {} event, queue closed", name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_per_producer_order_under_concurrency() {
        let queue = EventQueue::new();
        let producers = 8u32;
        let per_producer = 200u64;

        let tasks: Vec<_> = (1..=producers)
            .map(|index| {
                let sink = queue.sink(InstanceId::client(index));
                tokio::spawn(async move {
                    for _ in 0..per_producer {
                        assert!(sink.emit(EventKind::Started));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        futures::future::join_all(tasks).await;
        queue.close();

        let mut last_seen: HashMap<InstanceId, u64> = HashMap::new();
        let mut total = 0;
        while let Some(event) = queue.pop().await {
            if let Some(previous) = last_seen.insert(event.instance, event.sequence) {
                assert_eq!(event.sequence, previous + 1, "gap or reorder for {}", event.instance);
            } else {
                assert_eq!(event.sequence, 0);
            }
            total += 1;
        }
        assert_eq!(total, producers as u64 * per_producer);
    }

    #[tokio::test]
    async fn test_pop_blocks_until_push() {
        let queue = EventQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consumer.is_finished());

        queue.sink(InstanceId::relay(1)).emit(EventKind::Started);
        let event = consumer.await.unwrap().expect("Expected an event");
        assert_eq!(event.kind, EventKind::Started);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let queue = EventQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("Pop should return after close");
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = EventQueue::new();
        let sink = queue.sink(InstanceId::relay(1));
        sink.emit(EventKind::Started);
        sink.emit(EventKind::Stopped);

        queue.close();
        queue.close();
        assert!(queue.is_closed());
        assert!(!sink.emit(EventKind::Started), "Push after close must be rejected");

        assert_eq!(queue.pop().await.map(|e| e.kind), Some(EventKind::Started));
        assert_eq!(queue.pop().await.map(|e| e.kind), Some(EventKind::Stopped));
        assert!(queue.pop().await.is_none());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_timeout_and_try_pop() {
        let queue = EventQueue::new();
        assert!(queue.try_pop().is_none());
        assert!(queue.pop_timeout(Duration::from_millis(20)).await.is_err());

        queue.sink(InstanceId::client(1)).emit(EventKind::Started);
        assert!(queue.try_pop().is_some());
    }
}
