//! Bounded, newest-wins frame queue (Sample Queue, C3).
//!
//! A slow consumer must never cause a producer to block or fail: once the
//! queue is full, pushing a new frame drops the oldest queued frame rather
//! than the new one. Consumers block with a timeout instead of spinning.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// Outcome of a bounded wait on [`FrameQueue::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
    /// No frame became available before the timeout elapsed.
    Timeout,
}

struct Inner<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
}

/// A multi-producer, multi-consumer frame queue with newest-wins eviction.
///
/// `capacity = None` means unbounded (used where a downstream consumer is
/// known to drain at least as fast as frames arrive, e.g. direct in-process
/// hand-off); `Some(n)` bounds the queue to `n` frames.
pub struct FrameQueue<T> {
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> FrameQueue<T> {
    /// Create a queue bounded to `capacity` frames. When full, pushing
    /// drops the oldest frame to make room for the newest.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            state: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.max(1)),
                capacity: Some(capacity.max(1)),
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Create an unbounded queue.
    pub fn unbounded() -> Self {
        Self {
            state: Mutex::new(Inner {
                items: VecDeque::new(),
                capacity: None,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Push a frame, evicting the oldest queued frame if at capacity.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if let Some(capacity) = state.capacity {
            while state.items.len() >= capacity {
                state.items.pop_front();
            }
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Block until a frame is available or `timeout` elapses.
    pub fn take(&self, timeout: Duration) -> Result<T, TakeError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TakeError::Timeout);
            }
            let remaining = deadline - now;
            let timed_out = self.not_empty.wait_for(&mut state, remaining).timed_out();
            if timed_out && state.items.is_empty() {
                return Err(TakeError::Timeout);
            }
        }
    }

    /// Try to pop a frame without blocking.
    pub fn try_take(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue currently holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued frame.
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn bounded_queue_evicts_oldest_on_overflow() {
        let queue = FrameQueue::bounded(2);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_take(), Some(2));
        assert_eq!(queue.try_take(), Some(3));
    }

    #[test]
    fn unbounded_queue_never_evicts() {
        let queue = FrameQueue::unbounded();
        for i in 0..100 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 100);
    }

    #[test]
    fn take_times_out_when_empty() {
        let queue: FrameQueue<i32> = FrameQueue::bounded(4);
        let result = queue.take(Duration::from_millis(20));
        assert_eq!(result, Err(TakeError::Timeout));
    }

    #[test]
    fn take_wakes_on_push_from_another_thread() {
        let queue = Arc::new(FrameQueue::bounded(4));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(42);
        });
        let result = queue.take(Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn clear_empties_queue() {
        let queue = FrameQueue::bounded(4);
        queue.push(1);
        queue.push(2);
        queue.clear();
        assert!(queue.is_empty());
    }
}
