//! Per-task event bus
//!
//! A broker keyed by task id. Every subscriber owns a bounded queue;
//! [`EventBus::publish`] never blocks: a subscriber whose queue is full is
//! disconnected and a closed one is removed. When the last subscriber of a
//! task detaches, the task entry is discarded. Late subscribers only see
//! events published after they attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use flowfuzz_core::prelude::*;
use flowfuzz_core::{ExecutionEvent, TaskId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Default per-subscriber queue capacity
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Identifier of one subscription, unique within a bus
pub type SubscriberId = u64;

#[derive(Debug)]
struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<ExecutionEvent>,
}

/// Multiplexed publish point for execution events
#[derive(Debug)]
pub struct EventBus {
    topics: Mutex<HashMap<TaskId, Vec<Subscriber>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a new subscriber to a task's stream
    pub fn subscribe(&self, task_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        self.topics()
            .entry(task_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!("Subscriber {} attached to task {}", id, task_id);

        Subscription {
            id,
            task_id: task_id.to_string(),
            rx,
        }
    }

    /// Detach a subscriber; returns whether it was attached
    pub fn unsubscribe(&self, task_id: &str, id: SubscriberId) -> bool {
        let mut topics = self.topics();
        let Some(subscribers) = topics.get_mut(task_id) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            topics.remove(task_id);
        }
        removed
    }

    /// Deliver an event to every current subscriber of the task
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, task_id: &str, event: &ExecutionEvent) -> usize {
        let mut topics = self.topics();
        let Some(subscribers) = topics.get_mut(task_id) else {
            trace!("No subscribers for task {}, dropping {}", task_id, event.event_type());
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Subscriber {} of task {} fell behind, disconnecting",
                    subscriber.id, task_id
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} of task {} closed", subscriber.id, task_id);
                false
            }
        });

        if subscribers.is_empty() {
            topics.remove(task_id);
        }
        delivered
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.topics().get(task_id).map_or(0, Vec::len)
    }

    pub fn has_topic(&self, task_id: &str) -> bool {
        self.topics().contains_key(task_id)
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<TaskId, Vec<Subscriber>>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Receiving end of one subscriber
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub task_id: TaskId,
    rx: mpsc::Receiver<ExecutionEvent>,
}

impl Subscription {
    /// Next event; `None` once the subscriber has been detached and drained
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<ExecutionEvent, TryRecvError> {
        self.rx.try_recv()
    }

    /// Everything currently queued
    pub fn drain(&mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(count: usize) -> ExecutionEvent {
        ExecutionEvent::TestCasesGenerated { count }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_in_order() {
        let bus = EventBus::default();
        let mut a = bus.subscribe("t1");
        let mut b = bus.subscribe("t1");

        assert_eq!(bus.publish("t1", &ExecutionEvent::TaskStarted), 2);
        assert_eq!(bus.publish("t1", &generated(3)), 2);

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(ExecutionEvent::TaskStarted));
            assert_eq!(sub.recv().await, Some(generated(3)));
        }
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::default();
        let mut a = bus.subscribe("t1");
        let mut b = bus.subscribe("t2");

        bus.publish("t1", &ExecutionEvent::TaskStarted);

        assert_eq!(a.drain().len(), 1);
        assert!(b.drain().is_empty());
    }

    #[test]
    fn test_late_subscriber_gets_nothing_retroactively() {
        let bus = EventBus::default();
        let _early = bus.subscribe("t1");
        bus.publish("t1", &ExecutionEvent::TaskStarted);

        let mut late = bus.subscribe("t1");
        assert!(late.drain().is_empty());
    }

    #[test]
    fn test_full_queue_disconnects_subscriber() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe("t1");
        let mut fast = bus.subscribe("t1");

        bus.publish("t1", &generated(1));
        bus.publish("t1", &generated(2));
        fast.drain();

        // Third event overflows the slow subscriber only
        assert_eq!(bus.publish("t1", &generated(3)), 1);
        assert_eq!(bus.subscriber_count("t1"), 1);

        // The slow subscriber keeps what was queued, then sees the end
        assert_eq!(slow.drain(), vec![generated(1), generated(2)]);
        assert!(matches!(slow.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(fast.drain(), vec![generated(3)]);
    }

    #[test]
    fn test_closed_subscriber_is_removed_and_topic_discarded() {
        let bus = EventBus::default();
        let sub = bus.subscribe("t1");
        drop(sub);

        assert_eq!(bus.publish("t1", &ExecutionEvent::TaskStarted), 0);
        assert!(!bus.has_topic("t1"));
    }

    #[test]
    fn test_unsubscribe_last_discards_topic() {
        let bus = EventBus::default();
        let a = bus.subscribe("t1");
        let b = bus.subscribe("t1");

        assert!(bus.unsubscribe("t1", a.id));
        assert!(bus.has_topic("t1"));
        assert!(!bus.unsubscribe("t1", a.id));

        assert!(bus.unsubscribe("t1", b.id));
        assert!(!bus.has_topic("t1"));
        assert!(!bus.unsubscribe("t1", b.id));
    }

    #[test]
    fn test_recv_waits_for_publish() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe("t1");

        let mut recv = tokio_test::task::spawn(sub.recv());
        tokio_test::assert_pending!(recv.poll());

        bus.publish("t1", &ExecutionEvent::TaskStarted);
        assert!(recv.is_woken());
        tokio_test::assert_ready_eq!(recv.poll(), Some(ExecutionEvent::TaskStarted));
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish("nobody", &ExecutionEvent::TaskStarted), 0);
    }
}
