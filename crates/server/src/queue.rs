//! Bounded connect queue
//!
//! FIFO of accepted CONNECT requests between the dispatcher and the session
//! workers. Capacity-bounded with blocking on both ends: `push` waits while
//! the queue is full, `pop` waits while it is empty, and `close` wakes
//! everyone for shutdown. Notifications happen under the lock so a waiter
//! between its check and its wait cannot miss a wakeup.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use pipekvs_core::ConnectRequest;

struct Inner {
    items: VecDeque<ConnectRequest>,
    closed: bool,
}

/// Bounded blocking FIFO of pending connections.
pub struct ConnectQueue {
    inner: Mutex<Inner>,
    space: Condvar,
    ready: Condvar,
    capacity: usize,
}

impl ConnectQueue {
    /// Create a queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        ConnectQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            space: Condvar::new(),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a request, blocking while the queue is full.
    ///
    /// Returns false when the queue was closed instead.
    pub fn push(&self, request: ConnectRequest) -> bool {
        let mut inner = self.inner.lock();
        while inner.items.len() == self.capacity && !inner.closed {
            self.space.wait(&mut inner);
        }
        if inner.closed {
            return false;
        }
        inner.items.push_back(request);
        self.ready.notify_one();
        true
    }

    /// Dequeue a request, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<ConnectRequest> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.space.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Close the queue, waking all blocked producers and consumers.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.ready.notify_all();
        self.space.notify_all();
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn request(n: usize) -> ConnectRequest {
        ConnectRequest {
            req_path: format!("/tmp/req{n}"),
            resp_path: format!("/tmp/resp{n}"),
            notif_path: format!("/tmp/notif{n}"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = ConnectQueue::new(4);
        for n in 0..3 {
            assert!(queue.push(request(n)));
        }
        for n in 0..3 {
            assert_eq!(queue.pop().unwrap().req_path, format!("/tmp/req{n}"));
        }
    }

    #[test]
    fn test_push_blocks_until_space() {
        let queue = Arc::new(ConnectQueue::new(1));
        assert!(queue.push(request(0)));

        let pushed = Arc::new(AtomicUsize::new(0));
        let producer = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                queue.push(request(1));
                pushed.store(1, Ordering::Release);
            })
        };

        // full queue: the producer must still be blocked
        thread::sleep(Duration::from_millis(50));
        assert_eq!(pushed.load(Ordering::Acquire), 0);

        assert_eq!(queue.pop().unwrap().req_path, "/tmp/req0");
        producer.join().unwrap();
        assert_eq!(pushed.load(Ordering::Acquire), 1);
        assert_eq!(queue.pop().unwrap().req_path, "/tmp/req1");
    }

    #[test]
    fn test_pop_blocks_until_item() {
        let queue = Arc::new(ConnectQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(queue.push(request(7)));
        let item = consumer.join().unwrap();
        assert_eq!(item.unwrap().req_path, "/tmp/req7");
    }

    #[test]
    fn test_close_wakes_blocked_poppers() {
        let queue = Arc::new(ConnectQueue::new(2));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        queue.close();
        for c in consumers {
            assert!(c.join().unwrap().is_none());
        }
    }

    #[test]
    fn test_close_drains_remaining_items_first() {
        let queue = ConnectQueue::new(4);
        queue.push(request(0));
        queue.push(request(1));
        queue.close();
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
        assert!(!queue.push(request(2)));
    }
}
