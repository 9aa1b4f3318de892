//! Closed-enum sink for delivering frames out of a worker loop.
//!
//! Replaces a nullable callback slot with a tagged variant so a worker can
//! match once per frame instead of checking two `Option`s independently.

use std::sync::Arc;

use crate::queue::FrameQueue;

/// A type that can receive completed frames, one at a time, from a
/// producer thread.
///
/// `Queue` pushes into a shared [`FrameQueue`] (newest-wins eviction under
/// pressure); `Callback` invokes a user-supplied closure inline on the
/// producer thread; `Both` does both, queue first.
pub enum Sink<T> {
    /// Deliver frames into a shared bounded queue.
    Queue(Arc<FrameQueue<T>>),
    /// Deliver frames via a callback invoked on the producer thread.
    ///
    /// The callback must not block; it runs on the same thread driving
    /// acquisition or playback.
    Callback(Box<dyn FnMut(T) + Send>),
    /// Deliver to both a queue and a callback.
    Both(Arc<FrameQueue<T>>, Box<dyn FnMut(T) + Send>),
}

impl<T: Clone> Sink<T> {
    /// Deliver one frame to this sink.
    pub fn deliver(&mut self, frame: T) {
        match self {
            Sink::Queue(queue) => queue.push(frame),
            Sink::Callback(callback) => callback(frame),
            Sink::Both(queue, callback) => {
                queue.push(frame.clone());
                callback(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn queue_sink_pushes_frames() {
        let queue = Arc::new(FrameQueue::bounded(4));
        let mut sink = Sink::Queue(Arc::clone(&queue));
        sink.deliver(1);
        sink.deliver(2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn callback_sink_invokes_closure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let mut sink: Sink<i32> = Sink::Callback(Box::new(move |frame| {
            recorder.lock().unwrap().push(frame);
        }));
        sink.deliver(7);
        sink.deliver(8);
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn both_sink_delivers_to_queue_and_callback() {
        let queue = Arc::new(FrameQueue::bounded(4));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let mut sink = Sink::Both(
            Arc::clone(&queue),
            Box::new(move |frame| recorder.lock().unwrap().push(frame)),
        );
        sink.deliver(3);
        assert_eq!(queue.len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }
}
