//! Bounded FIFO queues between sensor ingestion and the smoother.
//!
//! Producers (sensor callbacks) only ever `try_push` and return; a full queue
//! drops the incoming sample rather than blocking or displacing older data.
//! The smoother is the only consumer and the only context allowed to block.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Non-blocking push. Returns `false` and drops `item` when at capacity.
    pub fn try_push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => unreachable!("queue holds its own receiver"),
        }
    }

    /// Blocking pop; suspends the caller until an item is available.
    pub fn pop(&self) -> T {
        self.rx.recv().expect("queue holds its own sender")
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Instantaneous, possibly-stale occupancy hint.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_beyond_capacity_drops_new_sample() {
        let q = BoundedQueue::new(40);
        let mut drops = 0;
        for i in 0..41 {
            if !q.try_push(i) {
                drops += 1;
            }
            assert!(q.len() <= 40);
        }
        assert_eq!(drops, 1);
        assert_eq!(q.len(), 40);
        // The dropped element is the newest, not the oldest.
        assert_eq!(q.pop(), 0);
    }

    #[test]
    fn test_fifo_order_preserved() {
        let q = BoundedQueue::new(8);
        for i in 0..5 {
            assert!(q.try_push(i));
        }
        for i in 0..5 {
            assert_eq!(q.try_pop(), Some(i));
        }
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_pop_blocks_until_item_arrives() {
        let q = Arc::new(BoundedQueue::new(4));
        let producer = Arc::clone(&q);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.try_push(7u32);
        });
        assert_eq!(q.pop(), 7);
        handle.join().unwrap();
    }
}
