use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// Bounded hand-off between the UDP receive loop and readers.
///
/// `push` never waits: when full it evicts the oldest entry. After `close`
/// queued items are discarded and `pop` returns `None`.
#[derive(Debug)]
pub(crate) struct InboundQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Notify,
    capacity: usize,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pushed {
    Queued,
    /// Queued after evicting the oldest entry.
    Evicted,
    Closed,
}

impl<T> InboundQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                dropped: 0,
            }),
            ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&self, item: T) -> Pushed {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Pushed::Closed;
        }

        let mut pushed = Pushed::Queued;
        if state.items.len() >= self.capacity {
            state.items.pop_front();
            state.dropped += 1;
            pushed = Pushed::Evicted;
        }
        state.items.push_back(item);
        drop(state);

        self.ready.notify_one();
        pushed
    }

    /// Next item, waiting while empty. `None` once closed.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            let ready = self.ready.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            ready.await;
        }
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        state.items.clear();
        drop(state);
        self.ready.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    /// Entries evicted because the queue was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn pops_in_order() {
        let queue = InboundQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
    }

    #[tokio::test]
    async fn full_queue_evicts_oldest() {
        let queue = InboundQueue::new(2);
        assert_eq!(queue.push(1), Pushed::Queued);
        assert_eq!(queue.push(2), Pushed::Queued);
        assert_eq!(queue.push(3), Pushed::Evicted);

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await, Some(2));
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(InboundQueue::new(4));
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("late");
        assert_eq!(reader.await.unwrap(), Some("late"));
    }

    #[tokio::test]
    async fn close_wakes_readers_and_discards() {
        let queue = Arc::new(InboundQueue::<u8>::new(4));
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert_eq!(reader.await.unwrap(), None);

        assert_eq!(queue.push(9), Pushed::Closed);
        assert!(queue.is_closed());
        assert_eq!(queue.pop().await, None);
    }
}
