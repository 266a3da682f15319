//! Bounded queues with explicit overflow policies
//!
//! Used for the per-topic event queues of the bus (drop oldest) and the
//! per-sink outbound queues of the registry (drop newest). Producers never
//! block: on overflow one message is discarded according to the policy and
//! the caller is told which.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Drop policy when a queue overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropPolicy {
    /// Evict the oldest queued message to make room for the new one.
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Queued,
    DroppedOldest,
    DroppedNewest,
    /// The queue was closed; the message was discarded.
    Closed,
}

impl PushResult {
    /// Whether some message was lost to make this push.
    pub fn is_drop(&self) -> bool {
        matches!(self, PushResult::DroppedOldest | PushResult::DroppedNewest)
    }
}

/// Multi-producer queue with a bounded capacity and one async consumer.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    policy: DropPolicy,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Capacity is clamped to at least one.
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            notify: Notify::new(),
            capacity,
            policy,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking.
    pub fn push(&self, item: T) -> PushResult {
        if self.is_closed() {
            return PushResult::Closed;
        }

        let result = {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                match self.policy {
                    DropPolicy::DropNewest => PushResult::DroppedNewest,
                    DropPolicy::DropOldest => {
                        items.pop_front();
                        items.push_back(item);
                        PushResult::DroppedOldest
                    }
                }
            } else {
                items.push_back(item);
                PushResult::Queued
            }
        };

        if result.is_drop() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if result != PushResult::DroppedNewest {
            self.notify.notify_one();
        }
        result
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the queue is closed; anything still queued at
    /// that point is abandoned.
    pub async fn pop(&self) -> Option<T> {
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue and wake the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total messages dropped by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_queue_basic() {
        let queue = BoundedQueue::new(10, DropPolicy::DropOldest);

        assert_eq!(queue.push(1), PushResult::Queued);
        assert_eq!(queue.push(2), PushResult::Queued);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_drop_oldest() {
        let queue = BoundedQueue::new(2, DropPolicy::DropOldest);

        queue.push(1);
        queue.push(2);
        assert_eq!(queue.push(3), PushResult::DroppedOldest);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
    }

    #[test]
    fn test_overflow_drop_newest() {
        let queue = BoundedQueue::new(2, DropPolicy::DropNewest);

        queue.push(1);
        queue.push(2);
        assert_eq!(queue.push(3), PushResult::DroppedNewest);

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue = BoundedQueue::new(0, DropPolicy::DropNewest);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.push("a"), PushResult::Queued);
    }

    #[test]
    fn test_push_after_close() {
        let queue = BoundedQueue::new(4, DropPolicy::DropOldest);
        queue.close();
        assert_eq!(queue.push(1), PushResult::Closed);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(BoundedQueue::new(4, DropPolicy::DropOldest));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(7u32);

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, Some(7));
    }

    #[tokio::test]
    async fn test_close_releases_waiting_consumer() {
        let queue = Arc::new(BoundedQueue::<u32>::new(4, DropPolicy::DropNewest));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, None);
    }
}
