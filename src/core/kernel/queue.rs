use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Unbounded multi-producer/multi-consumer FIFO handoff.
///
/// Producers never block. Consumers either poll with [`try_pop`](Self::try_pop)
/// or park on [`wait_and_pop`](Self::wait_and_pop). Blocking waits belong on
/// consumer threads, never on reactor workers.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append to the tail and wake one waiter
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    /// Remove the head without blocking
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Block until an item exists, then remove and return the head
    pub fn wait_and_pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    /// Like [`wait_and_pop`](Self::wait_and_pop) but gives up after `timeout`
    pub fn wait_and_pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_pop_empty_returns_none() {
        let queue: BlockingQueue<u32> = BlockingQueue::new();
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let queue = BlockingQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop(), Some("a"));
        assert_eq!(queue.wait_and_pop(), "b");
        assert_eq!(queue.try_pop(), Some("c"));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_wait_and_pop_blocks_until_push() {
        let queue = Arc::new(BlockingQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_and_pop())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());

        queue.push(99_u64);
        assert_eq!(consumer.join().unwrap(), 99);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_and_pop_timeout_expires() {
        let queue: BlockingQueue<u8> = BlockingQueue::new();
        let started = Instant::now();
        assert!(queue.wait_and_pop_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_each_item_consumed_exactly_once() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let queue = Arc::new(BlockingQueue::new());

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.wait_and_pop_timeout(Duration::from_millis(200)) {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push((p, i));
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let mut all: Vec<(usize, usize)> = Vec::new();
        for consumer in consumers {
            let seen = consumer.join().unwrap();
            // Per-producer order survives in each consumer's view
            for p in 0..PRODUCERS {
                let from_p: Vec<usize> = seen
                    .iter()
                    .filter(|(q, _)| *q == p)
                    .map(|(_, i)| *i)
                    .collect();
                assert!(from_p.windows(2).all(|w| w[0] < w[1]));
            }
            all.extend(seen);
        }

        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    }
}
