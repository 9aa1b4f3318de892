//! The Video Sidecar (C7): an optional, best-effort video monitoring
//! stream run alongside an acquisition session.
//!
//! Camera capture and encoding are out of scope here; this module only
//! owns the concurrency contract a real backend plugs into, the same way
//! `bbx_player::Backend` owns a playback thread and a stop flag without
//! committing to any particular audio output API.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mu_core::spsc::SpscRingBuffer;
use mu_core::CancellationToken;
use tracing::{trace, warn};

use crate::error::{Result, VideoError};

const QUEUE_CAPACITY: usize = 64;

/// Destination for sidecar frames. Real backends write to an encoder or a
/// rolling set of video files; [`NullVideoSink`] discards everything.
pub trait VideoSink: Send {
    /// Record one frame at wall-clock offset `at` seconds since the
    /// sidecar started.
    fn write_frame(&mut self, at: f64) -> Result<()>;

    /// Called once `at` crosses a file-duration boundary, before the next
    /// `write_frame`. Default no-op; sinks backed by rolling files
    /// override this to close the current file and open the next.
    fn roll(&mut self, at: f64) -> Result<()> {
        let _ = at;
        Ok(())
    }
}

/// A sink that discards every frame, used when no camera backend is
/// configured but the sidecar's concurrency contract is still exercised.
#[derive(Default)]
pub struct NullVideoSink;

impl VideoSink for NullVideoSink {
    fn write_frame(&mut self, at: f64) -> Result<()> {
        trace!(at, "discarding video frame (null sink)");
        Ok(())
    }
}

/// Drives a `VideoSink` on its own thread, rolling its output at
/// `file_duration` boundaries, until `cancel` fires or C2 stops it.
///
/// Frame timing is generated on a capture thread and handed to the
/// writer thread through a lock-free SPSC ring buffer, so a slow sink
/// never blocks the capture side.
pub struct Sidecar {
    cancel: CancellationToken,
    capture: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<Result<()>>>,
}

impl Sidecar {
    /// Starts capture and writer threads. `frame_interval` paces frame
    /// generation; `file_duration` of `0.0` disables rolling.
    pub fn spawn(
        sink: Box<dyn VideoSink>,
        frame_interval: Duration,
        file_duration: f64,
        cancel: CancellationToken,
    ) -> Self {
        let (mut producer, mut consumer) = SpscRingBuffer::new::<f64>(QUEUE_CAPACITY);

        let capture_cancel = cancel.clone();
        let capture = thread::spawn(move || {
            let start = Instant::now();
            loop {
                if capture_cancel.is_cancelled() {
                    break;
                }
                let at = start.elapsed().as_secs_f64();
                if producer.try_push(at).is_err() {
                    warn!(at, "video sidecar writer backlogged, dropping frame");
                }
                if capture_cancel.sleep(frame_interval) {
                    break;
                }
            }
        });

        let writer_cancel = cancel.clone();
        let writer = thread::spawn(move || -> Result<()> {
            let mut sink = sink;
            let mut last_roll = 0.0f64;
            loop {
                match consumer.try_pop() {
                    Some(at) => {
                        if file_duration > 0.0 && at - last_roll >= file_duration {
                            sink.roll(at)?;
                            last_roll = at;
                        }
                        sink.write_frame(at)?;
                    }
                    None => {
                        if writer_cancel.is_cancelled() && consumer.is_empty() {
                            break;
                        }
                        thread::sleep(Duration::from_millis(5));
                    }
                }
            }
            Ok(())
        });

        Sidecar {
            cancel,
            capture: Some(capture),
            writer: Some(writer),
        }
    }

    /// Request both threads to stop. Does not block; call `join()` after.
    pub fn stop(&self) {
        self.cancel.stop();
    }

    /// Block until both threads exit, propagating a sink failure or a
    /// worker panic.
    pub fn join(mut self) -> Result<()> {
        if let Some(capture) = self.capture.take() {
            capture.join().map_err(|_| VideoError::WorkerPanicked)?;
        }
        if let Some(writer) = self.writer.take() {
            writer.join().map_err(|_| VideoError::WorkerPanicked)??;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct RecordingSink {
        frames: Arc<Mutex<Vec<f64>>>,
        rolls: Arc<Mutex<Vec<f64>>>,
    }

    impl VideoSink for RecordingSink {
        fn write_frame(&mut self, at: f64) -> Result<()> {
            self.frames.lock().unwrap().push(at);
            Ok(())
        }

        fn roll(&mut self, at: f64) -> Result<()> {
            self.rolls.lock().unwrap().push(at);
            Ok(())
        }
    }

    #[test]
    fn null_sink_accepts_frames_without_error() {
        let mut sink = NullVideoSink;
        assert!(sink.write_frame(0.5).is_ok());
    }

    #[test]
    fn sidecar_stops_promptly_on_cancel() {
        let cancel = CancellationToken::new();
        let sidecar = Sidecar::spawn(Box::new(NullVideoSink), Duration::from_millis(5), 0.0, cancel.clone());
        thread::sleep(Duration::from_millis(30));
        sidecar.stop();
        assert!(sidecar.join().is_ok());
    }

    #[test]
    fn sidecar_delivers_frames_to_sink() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let rolls = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            frames: Arc::clone(&frames),
            rolls: Arc::clone(&rolls),
        };
        let cancel = CancellationToken::new();
        let sidecar = Sidecar::spawn(Box::new(sink), Duration::from_millis(2), 1.0, cancel.clone());
        thread::sleep(Duration::from_millis(40));
        sidecar.stop();
        sidecar.join().unwrap();
        assert!(!frames.lock().unwrap().is_empty());
    }
}
