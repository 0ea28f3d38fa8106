//! Bounded single-consumer queue with an explicit overflow policy.
//!
//! Producers never block: a full queue either evicts its oldest item
//! (`DropOldest`) or rejects the new one (`DropNewest`). Every drop is counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to admit the newest.
    #[default]
    DropOldest,
    /// Reject the newest item and keep queued order.
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Admitted after evicting the oldest item.
    Evicted,
    /// Rejected: queue full under `DropNewest`, or closed.
    Rejected,
}

pub struct BoundedQueue<T> {
    name: &'static str,
    items: ArrayQueue<T>,
    policy: OverflowPolicy,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// `capacity` is raised to at least 1.
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            name,
            items: ArrayQueue::new(capacity.max(1)),
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items lost to the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn push(&self, item: T) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Rejected;
        }
        let outcome = match self.policy {
            OverflowPolicy::DropOldest => match self.items.force_push(item) {
                None => PushOutcome::Queued,
                Some(_evicted) => PushOutcome::Evicted,
            },
            OverflowPolicy::DropNewest => match self.items.push(item) {
                Ok(()) => PushOutcome::Queued,
                Err(_rejected) => PushOutcome::Rejected,
            },
        };
        if outcome != PushOutcome::Queued {
            self.record_drop();
        }
        if outcome != PushOutcome::Rejected {
            self.notify.notify_one();
        }
        outcome
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("mdagg_queue_dropped_total", "queue" => self.name).increment(1);
        trace!(queue = self.name, "queue overflow");
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.pop()
    }

    /// Wait for the next item. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(item) = self.items.pop() {
                return Some(item);
            }
            if self.is_closed() {
                return self.items.pop();
            }
            // notify_one stores a permit, so a push between the pop and here is not lost
            self.notify.notified().await;
        }
    }

    /// `recv` that also returns `None` when `cancel` fires.
    pub async fn recv_or_cancel(&self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.recv() => item,
        }
    }

    /// Mark complete; the consumer drains what is queued and then sees `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("policy", &self.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drop_oldest_keeps_newest() {
        let q = BoundedQueue::new("test", 1, OverflowPolicy::DropOldest);
        assert_eq!(q.push(1), PushOutcome::Queued);
        assert_eq!(q.push(2), PushOutcome::Evicted);
        assert_eq!(q.push(3), PushOutcome::Evicted);
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.dropped(), 2);
    }

    #[test]
    fn drop_newest_preserves_order() {
        let q = BoundedQueue::new("test", 2, OverflowPolicy::DropNewest);
        q.push(1);
        q.push(2);
        assert_eq!(q.push(3), PushOutcome::Rejected);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
        assert_eq!(q.dropped(), 1);
    }

    #[test]
    fn closed_queue_rejects() {
        let q = BoundedQueue::new("test", 2, OverflowPolicy::DropOldest);
        q.close();
        assert_eq!(q.push(1), PushOutcome::Rejected);
    }

    #[tokio::test]
    async fn recv_wakes_on_push_and_drains_after_close() {
        let q = Arc::new(BoundedQueue::new("test", 8, OverflowPolicy::DropOldest));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = q.recv().await {
                    got.push(v);
                }
                got
            })
        };
        for i in 0..5 {
            q.push(i);
            tokio::task::yield_now().await;
        }
        q.close();
        assert_eq!(consumer.await.unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn recv_returns_none_on_cancel() {
        let q: BoundedQueue<u32> = BoundedQueue::new("test", 1, OverflowPolicy::DropOldest);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(q.recv_or_cancel(&cancel).await, None);
    }
}
