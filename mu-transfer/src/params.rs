//! Acquisition parameters: the immutable value object shared read-through
//! by every component once a session starts.

use std::path::PathBuf;

use crate::error::{Result, TransferError};

/// Sample word encoding requested from the device or found in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Int32,
    Float32,
}

/// Acquisition start trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Soft,
    ExternalRisingEdge,
}

/// Selects which physical receiver (or file-playback stand-in) a session
/// talks to. Each live variant carries its beam count, used to validate
/// `mems` indices and to size `activate_mems` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// 32-channel receiver, 4 beams of 8 microphones.
    Mu32,
    /// 256-channel receiver, 32 beams.
    Mu256,
    /// 1024-channel receiver, 128 beams.
    Mu1024,
    /// File-playback stand-in; no physical beam limit is enforced.
    File,
}

impl DeviceKind {
    /// Number of 8-microphone beams this device exposes, or `None` for
    /// the file-playback stand-in (which has no device-side limit).
    pub fn total_beams(self) -> Option<u32> {
        match self {
            DeviceKind::Mu32 => Some(4),
            DeviceKind::Mu256 => Some(32),
            DeviceKind::Mu1024 => Some(128),
            DeviceKind::File => None,
        }
    }
}

/// Compression applied by the H5 recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum Compression {
    Gzip(u8),
}

/// H5 recorder options.
#[derive(Debug, Clone)]
pub struct H5Options {
    pub enabled: bool,
    pub root_dir: PathBuf,
    pub dataset_duration: f64,
    pub file_duration: f64,
    pub compression: Option<Compression>,
}

/// Video sidecar options.
#[derive(Debug, Clone)]
pub struct VideoOptions {
    pub monitoring: bool,
    pub file_duration: f64,
}

/// File playback options.
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub path: PathBuf,
    /// Percentage (0..=100) of file duration to start playback from.
    pub start_time_pct: f64,
    pub loop_playback: bool,
}

/// The full set of acquisition parameters, as built by the Session
/// Coordinator from a caller-supplied map.
#[derive(Debug, Clone)]
pub struct AcquisitionParameters {
    pub device: DeviceKind,
    pub clockdiv: u32,
    pub mems: Vec<u32>,
    pub analogs: Vec<u32>,
    pub counter: bool,
    pub counter_skip: bool,
    pub status: bool,
    pub buffer_length: u32,
    pub buffers_number: u32,
    pub duration: f64,
    pub datatype: Datatype,
    pub start_trig: Trigger,
    /// `None` means unbounded (C3's newest-wins eviction disabled).
    pub queue_size: Option<usize>,
    pub h5: Option<H5Options>,
    pub video: Option<VideoOptions>,
    pub playback: Option<PlaybackOptions>,
}

/// Parameters after validation and derived-field computation.
#[derive(Debug, Clone)]
pub struct ResolvedParameters {
    pub params: AcquisitionParameters,
    pub sampling_frequency: f64,
    pub channels_per_frame: u32,
}

impl ResolvedParameters {
    pub fn buffer_duration(&self) -> f64 {
        self.params.buffer_length as f64 / self.sampling_frequency
    }
}

/// Builds [`AcquisitionParameters`] with defaults, mirroring the
/// teacher's plain value-object-with-a-resolve-step pattern.
#[derive(Debug, Clone)]
pub struct ParamBuilder {
    device: DeviceKind,
    clockdiv: u32,
    mems: Vec<u32>,
    analogs: Vec<u32>,
    counter: bool,
    counter_skip: bool,
    status: bool,
    buffer_length: u32,
    buffers_number: u32,
    duration: f64,
    datatype: Datatype,
    start_trig: Trigger,
    queue_size: Option<usize>,
    h5: Option<H5Options>,
    video: Option<VideoOptions>,
    playback: Option<PlaybackOptions>,
}

impl Default for ParamBuilder {
    fn default() -> Self {
        Self {
            device: DeviceKind::Mu32,
            clockdiv: 9,
            mems: Vec::new(),
            analogs: Vec::new(),
            counter: true,
            counter_skip: false,
            status: false,
            buffer_length: 512,
            buffers_number: 4,
            duration: 0.0,
            datatype: Datatype::Int32,
            start_trig: Trigger::Soft,
            queue_size: Some(32),
            h5: None,
            video: None,
            playback: None,
        }
    }
}

impl ParamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: DeviceKind) -> Self {
        self.device = device;
        self
    }

    /// Set the target sampling frequency; resolved to the minimal
    /// `clockdiv >= 9` that keeps `500_000 / (clockdiv + 1) <= fs`.
    pub fn sampling_frequency(mut self, fs: f64) -> Self {
        let clockdiv = ((500_000.0 / fs).ceil() as i64 - 1).max(9);
        self.clockdiv = clockdiv as u32;
        self
    }

    pub fn clockdiv(mut self, clockdiv: u32) -> Self {
        self.clockdiv = clockdiv.max(9);
        self
    }

    pub fn mems(mut self, mems: Vec<u32>) -> Self {
        self.mems = mems;
        self
    }

    pub fn analogs(mut self, analogs: Vec<u32>) -> Self {
        self.analogs = analogs;
        self
    }

    pub fn counter(mut self, counter: bool) -> Self {
        self.counter = counter;
        self
    }

    pub fn counter_skip(mut self, counter_skip: bool) -> Self {
        self.counter_skip = counter_skip;
        self
    }

    pub fn status(mut self, status: bool) -> Self {
        self.status = status;
        self
    }

    pub fn buffer_length(mut self, buffer_length: u32) -> Self {
        self.buffer_length = buffer_length;
        self
    }

    pub fn buffers_number(mut self, buffers_number: u32) -> Self {
        self.buffers_number = buffers_number;
        self
    }

    pub fn duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn datatype(mut self, datatype: Datatype) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn start_trig(mut self, start_trig: Trigger) -> Self {
        self.start_trig = start_trig;
        self
    }

    pub fn queue_size(mut self, queue_size: Option<usize>) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn h5(mut self, h5: H5Options) -> Self {
        self.h5 = Some(h5);
        self
    }

    pub fn video(mut self, video: VideoOptions) -> Self {
        self.video = Some(video);
        self
    }

    pub fn playback(mut self, playback: PlaybackOptions) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Validate and compute derived fields.
    pub fn resolve(self) -> Result<ResolvedParameters> {
        if self.mems.is_empty() {
            return Err(TransferError::NoChannelsSelected);
        }
        if self.counter_skip && !self.counter {
            return Err(TransferError::CounterSkipRequiresCounter);
        }
        if self.buffers_number < 2 {
            return Err(TransferError::TooFewBuffers(self.buffers_number));
        }
        if let Some(total_beams) = self.device.total_beams() {
            let max = total_beams * 8;
            for &index in &self.mems {
                if index >= max {
                    return Err(TransferError::ChannelOutOfRange {
                        index,
                        total_beams,
                        max,
                    });
                }
            }
        }

        let sampling_frequency = (500_000.0 / (self.clockdiv as f64 + 1.0)).min(50_000.0);
        let channels_per_frame =
            self.mems.len() as u32 + self.analogs.len() as u32 + self.counter as u32 + self.status as u32;

        let params = AcquisitionParameters {
            device: self.device,
            clockdiv: self.clockdiv,
            mems: self.mems,
            analogs: self.analogs,
            counter: self.counter,
            counter_skip: self.counter_skip,
            status: self.status,
            buffer_length: self.buffer_length,
            buffers_number: self.buffers_number,
            duration: self.duration,
            datatype: self.datatype,
            start_trig: self.start_trig,
            queue_size: self.queue_size,
            h5: self.h5,
            video: self.video,
            playback: self.playback,
        };

        Ok(ResolvedParameters {
            params,
            sampling_frequency,
            channels_per_frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_mems() {
        let result = ParamBuilder::new().mems(vec![]).resolve();
        assert!(matches!(result, Err(TransferError::NoChannelsSelected)));
    }

    #[test]
    fn rejects_counter_skip_without_counter() {
        let result = ParamBuilder::new()
            .mems(vec![0])
            .counter(false)
            .counter_skip(true)
            .resolve();
        assert!(matches!(result, Err(TransferError::CounterSkipRequiresCounter)));
    }

    #[test]
    fn rejects_channel_out_of_range_for_mu32() {
        let result = ParamBuilder::new().device(DeviceKind::Mu32).mems(vec![32]).resolve();
        assert!(matches!(result, Err(TransferError::ChannelOutOfRange { .. })));
    }

    #[test]
    fn computes_channels_per_frame() {
        let resolved = ParamBuilder::new()
            .mems(vec![0, 1, 2, 3])
            .analogs(vec![0])
            .counter(true)
            .status(true)
            .resolve()
            .unwrap();
        assert_eq!(resolved.channels_per_frame, 4 + 1 + 1 + 1);
    }

    #[test]
    fn sampling_frequency_clamped_to_50khz() {
        let resolved = ParamBuilder::new().mems(vec![0]).sampling_frequency(1_000_000.0).resolve().unwrap();
        assert!(resolved.sampling_frequency <= 50_000.0);
        assert!(resolved.params.clockdiv >= 9);
    }

    #[test]
    fn identical_params_resolve_identically() {
        let build = || ParamBuilder::new().mems(vec![0, 1]).sampling_frequency(50_000.0);
        let a = build().resolve().unwrap();
        let b = build().resolve().unwrap();
        assert_eq!(a.sampling_frequency, b.sampling_frequency);
        assert_eq!(a.channels_per_frame, b.channels_per_frame);
    }
}
