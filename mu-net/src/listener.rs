//! Per-subscriber state held by the broadcast hub.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub type ListenerId = u64;

/// A connected subscriber's channel selection and outbound sink.
///
/// `rows` holds indices into the runner's post-counter_skip sample layout;
/// it is recomputed whenever the subscriber sends a new `listen` request.
pub struct Listener {
    pub id: ListenerId,
    pub rows: Vec<usize>,
    pub want_counter: bool,
    pub want_status: bool,
    sender: mpsc::UnboundedSender<Message>,
}

impl Listener {
    pub fn new(id: ListenerId, sender: mpsc::UnboundedSender<Message>) -> Self {
        Listener {
            id,
            rows: Vec::new(),
            want_counter: false,
            want_status: false,
            sender,
        }
    }

    pub fn set_mask(&mut self, rows: Vec<usize>, want_counter: bool, want_status: bool) {
        self.rows = rows;
        self.want_counter = want_counter;
        self.want_status = want_status;
    }

    /// Sends a binary sample frame. Returns `false` if the subscriber's
    /// socket is gone and it should be evicted.
    pub fn send_frame(&self, bytes: Vec<u8>) -> bool {
        self.sender.send(Message::Binary(bytes)).is_ok()
    }

    /// Sends a JSON control message. Returns `false` if the subscriber's
    /// socket is gone and it should be evicted.
    pub fn send_text(&self, text: String) -> bool {
        self.sender.send(Message::Text(text)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_fails_once_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Listener::new(1, tx);
        drop(rx);
        assert!(!listener.send_frame(vec![1, 2, 3]));
    }

    #[test]
    fn set_mask_replaces_rows() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut listener = Listener::new(1, tx);
        listener.set_mask(vec![1, 3], true, false);
        assert_eq!(listener.rows, vec![1, 3]);
        assert!(listener.want_counter);
        assert!(!listener.want_status);
    }
}
