//! The Transfer Engine (C2): per-completion validation, restart protocol,
//! and shutdown protocol, driven against a [`DeviceBackend`].

use std::time::{Duration, Instant};

use mu_core::{CancellationToken, Sink};
use tracing::{debug, error, trace, warn};

use crate::{
    backend::{CompletionStatus, DeviceBackend},
    error::{Result, TransferError},
    frame::{Frame, Word},
    params::{ResolvedParameters, Trigger},
};

/// Consecutive misalignments tolerated before a session is declared
/// `Fatal`.
pub const MAX_RETRY_ATTEMPT: u32 = 5;

/// Row index of the counter channel within a raw frame, before
/// `counter_skip` stripping. Confirmed against the reference
/// implementation: the counter is written as the first word of each
/// sample group.
const COUNTER_ROW: usize = 0;

const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_millis(1_000);
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Additional fan-out legs a frame is always offered to, independent of
/// `sink`: the H5 writer and the broadcast hub.
pub type FrameListener<W> = Box<dyn FnMut(&Frame<W>) + Send>;

/// Drives one acquisition session's worth of bulk completions against a
/// backend, validating, reshaping, and fanning out each frame.
pub struct TransferEngine<W: Word, B: DeviceBackend> {
    backend: B,
    params: ResolvedParameters,
    cancel: CancellationToken,
    sink: Option<Sink<Frame<W>>>,
    file_sink: Option<FrameListener<W>>,
    hub_sink: Option<FrameListener<W>>,
}

impl<W: Word, B: DeviceBackend> TransferEngine<W, B> {
    pub fn new(backend: B, params: ResolvedParameters, cancel: CancellationToken) -> Self {
        Self {
            backend,
            params,
            cancel,
            sink: None,
            file_sink: None,
            hub_sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Sink<Frame<W>>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_file_sink(mut self, sink: FrameListener<W>) -> Self {
        self.file_sink = Some(sink);
        self
    }

    pub fn with_hub_sink(mut self, sink: FrameListener<W>) -> Self {
        self.hub_sink = Some(sink);
        self
    }

    fn channels_per_frame(&self) -> usize {
        self.params.channels_per_frame as usize
    }

    fn buffer_length(&self) -> usize {
        self.params.params.buffer_length as usize
    }

    fn max_transfers(&self) -> Option<u64> {
        if self.params.params.duration > 0.0 {
            let fs = self.params.sampling_frequency;
            let total = (self.params.params.duration * fs / self.params.params.buffer_length as f64).ceil();
            Some(total as u64)
        } else {
            None
        }
    }

    /// Run the engine until `duration` elapses, `stop()` is observed, or a
    /// fatal error occurs.
    pub fn run(mut self) -> Result<u64> {
        let buffers_number = self.params.params.buffers_number;
        for _ in 0..buffers_number {
            self.backend.submit()?;
        }

        let mut transfer_index: u64 = 0;
        let mut misalignment_streak: u32 = 0;
        let max_transfers = self.max_transfers();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(max) = max_transfers {
                if transfer_index >= max {
                    break;
                }
            }

            let buffer_duration = self.backend.buffer_duration();
            let transfer_timestamp = now_secs() - buffer_duration;

            let completion = self.backend.poll_completion(DEFAULT_COMPLETION_TIMEOUT);
            match completion {
                CompletionStatus::Completed(bytes) => {
                    trace!(transfer_index, bytes = bytes.len(), "bulk completion");
                    match self.handle_completion(&bytes, transfer_timestamp) {
                        Ok(()) => {
                            misalignment_streak = 0;
                            self.backend.submit()?;
                            transfer_index += 1;
                        }
                        Err(TransferError::ShortRead { expected, actual }) => {
                            warn!(expected, actual, "short read, resubmitting");
                            self.backend.submit()?;
                        }
                        Err(TransferError::Misalignment { expected, actual }) => {
                            warn!(expected, actual, "counter misalignment, restarting");
                            misalignment_streak += 1;
                            if misalignment_streak > MAX_RETRY_ATTEMPT {
                                error!(attempts = misalignment_streak, "declaring session fatal");
                                self.shutdown();
                                return Err(TransferError::Fatal(MAX_RETRY_ATTEMPT));
                            }
                            self.restart()?;
                        }
                        Err(other) => return Err(other),
                    }
                }
                CompletionStatus::Timeout => {
                    if self.params.params.start_trig == Trigger::ExternalRisingEdge {
                        debug!("timeout while waiting for trigger, resubmitting");
                        self.backend.submit()?;
                    } else {
                        warn!("bulk completion timed out, stopping session");
                        break;
                    }
                }
                CompletionStatus::Cancelled => {
                    debug!("transfer cancelled, stopping session");
                    break;
                }
                CompletionStatus::NoDevice | CompletionStatus::Error | CompletionStatus::Stall | CompletionStatus::Overflow => {
                    error!(kind = completion_kind(&completion), "fatal transport condition");
                    self.shutdown();
                    return Err(TransferError::TransportError(format!("{completion:?}")));
                }
            }
        }

        self.shutdown();
        Ok(transfer_index)
    }

    fn handle_completion(&mut self, bytes: &[u8], transfer_timestamp: f64) -> Result<()> {
        let channels = self.channels_per_frame();
        let buffer_length = self.buffer_length();
        let expected_bytes = channels * buffer_length * 4;
        if bytes.len() < expected_bytes {
            return Err(TransferError::ShortRead {
                expected: expected_bytes,
                actual: bytes.len(),
            });
        }

        let words: Vec<W> = bytes
            .chunks_exact(4)
            .take(channels * buffer_length)
            .map(|chunk| W::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        let frame = Frame::from_raw_words(&words, channels, buffer_length, transfer_timestamp)?;

        if self.params.params.counter {
            frame.check_counter_invariant(COUNTER_ROW)?;
        }

        let frame = if self.params.params.counter_skip {
            frame.drop_first_row()
        } else {
            frame
        };

        self.emit(frame);
        Ok(())
    }

    fn emit(&mut self, frame: Frame<W>) {
        if let Some(file_sink) = &mut self.file_sink {
            file_sink(&frame);
        }
        if let Some(hub_sink) = &mut self.hub_sink {
            hub_sink(&frame);
        }
        if let Some(sink) = &mut self.sink {
            sink.deliver(frame);
        }
    }

    /// Restart protocol: drain in-flight transfers, FX3-reset, resubmit.
    fn restart(&mut self) -> Result<()> {
        self.backend.reset_partial()?;
        for _ in 0..self.params.params.buffers_number {
            self.backend.submit()?;
        }
        Ok(())
    }

    /// Shutdown protocol: stop, flush the device FIFO, full reset.
    fn shutdown(&mut self) {
        if self.backend.issue_stop().is_err() {
            warn!("stop command failed during shutdown");
        }
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            self.backend.drain_once(DRAIN_TIMEOUT);
        }
        if self.backend.issue_full_reset().is_err() {
            warn!("full reset failed during shutdown");
        }
    }
}

fn completion_kind(status: &CompletionStatus) -> &'static str {
    match status {
        CompletionStatus::Completed(_) => "completed",
        CompletionStatus::Cancelled => "cancelled",
        CompletionStatus::NoDevice => "no_device",
        CompletionStatus::Error => "error",
        CompletionStatus::Stall => "stall",
        CompletionStatus::Overflow => "overflow",
        CompletionStatus::Timeout => "timeout",
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Arc};

    use mu_core::FrameQueue;

    use super::*;
    use crate::params::{DeviceKind, ParamBuilder};

    /// A backend that replays a fixed sequence of completions, used to
    /// drive the engine deterministically in tests.
    struct FakeBackend {
        completions: VecDeque<CompletionStatus>,
        buffer_duration: f64,
    }

    impl DeviceBackend for FakeBackend {
        fn buffer_duration(&self) -> f64 {
            self.buffer_duration
        }

        fn submit(&mut self) -> Result<()> {
            Ok(())
        }

        fn poll_completion(&mut self, _timeout: Duration) -> CompletionStatus {
            self.completions.pop_front().unwrap_or(CompletionStatus::Timeout)
        }

        fn reset_partial(&mut self) -> Result<()> {
            Ok(())
        }

        fn issue_stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn issue_full_reset(&mut self) -> Result<()> {
            Ok(())
        }

        fn drain_once(&mut self, _timeout: Duration) {}
    }

    fn counting_words(channels: usize, buffer_length: usize, start: i32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(channels * buffer_length * 4);
        for sample in 0..buffer_length {
            for channel in 0..channels {
                let word = if channel == 0 {
                    start + sample as i32
                } else {
                    (channel * 1000) as i32
                };
                bytes.extend_from_slice(&word.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn finite_acquisition_emits_expected_frame_count() {
        // Scenario 1: fs=50_000, buffer_length=512, duration=1 => 98 frames.
        let resolved = ParamBuilder::new()
            .device(DeviceKind::Mu32)
            .mems(vec![0, 1, 2, 3, 4, 5, 6, 7])
            .counter(true)
            .counter_skip(false)
            .sampling_frequency(50_000.0)
            .buffer_length(512)
            .duration(1.0)
            .resolve()
            .unwrap();

        let channels = resolved.channels_per_frame as usize;
        let buffer_length = resolved.params.buffer_length as usize;

        let expected_frames = (50_000f64 / 512f64).ceil() as u64;
        let mut completions = VecDeque::new();
        for i in 0..expected_frames + 2 {
            let bytes = counting_words(channels, buffer_length, (i as i32) * buffer_length as i32);
            completions.push_back(CompletionStatus::Completed(bytes));
        }

        let backend = FakeBackend {
            completions,
            buffer_duration: buffer_length as f64 / 50_000.0,
        };

        let queue = Arc::new(FrameQueue::unbounded());
        let engine: TransferEngine<i32, FakeBackend> =
            TransferEngine::new(backend, resolved, CancellationToken::new())
                .with_sink(Sink::Queue(Arc::clone(&queue)));

        let emitted = engine.run().unwrap();
        assert_eq!(emitted, expected_frames);
        assert_eq!(queue.len() as u64, expected_frames);
    }

    #[test]
    fn misalignment_triggers_restart_then_recovers() {
        let resolved = ParamBuilder::new()
            .device(DeviceKind::Mu32)
            .mems(vec![0, 1, 2, 3])
            .counter(true)
            .sampling_frequency(50_000.0)
            .buffer_length(16)
            .duration(0.0)
            .resolve()
            .unwrap();

        let channels = resolved.channels_per_frame as usize;
        let buffer_length = resolved.params.buffer_length as usize;

        let mut completions = VecDeque::new();
        completions.push_back(CompletionStatus::Completed(counting_words(channels, buffer_length, 0)));
        // Frame 2: inject a counter gap (non-contiguous start).
        let mut bad = counting_words(channels, buffer_length, 1000);
        bad[0..4].copy_from_slice(&999i32.to_le_bytes());
        completions.push_back(CompletionStatus::Completed(bad));
        completions.push_back(CompletionStatus::Completed(counting_words(channels, buffer_length, 2000)));
        completions.push_back(CompletionStatus::Cancelled);

        let backend = FakeBackend {
            completions,
            buffer_duration: buffer_length as f64 / 50_000.0,
        };

        let cancel = CancellationToken::new();
        let engine: TransferEngine<i32, FakeBackend> = TransferEngine::new(backend, resolved, cancel);
        let emitted = engine.run().unwrap();
        // Frame 1 and frame 3 are clean; frame 2 triggers a restart and is dropped.
        assert_eq!(emitted, 2);
    }
}
