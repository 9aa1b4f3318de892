//! Translates the caller-supplied JSON parameter map into
//! `mu_transfer::ResolvedParameters`, applying the defaults from §3.

use std::path::PathBuf;

use mu_transfer::{
    Compression, Datatype, DeviceKind, H5Options, ParamBuilder, PlaybackOptions, ResolvedParameters, Trigger,
    VideoOptions,
};
use serde::Deserialize;

use crate::error::{Result, SessionError};

/// Cypress FX2 vendor/product identifiers for the live receiver, per the
/// reference implementation's USB discovery constants.
pub const DEFAULT_VENDOR_ID: u16 = 0x04b4;
pub const DEFAULT_PRODUCT_ID: u16 = 0x00bc;

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKindParam {
    #[default]
    Mu32,
    Mu256,
    Mu1024,
    File,
}

impl From<DeviceKindParam> for DeviceKind {
    fn from(value: DeviceKindParam) -> Self {
        match value {
            DeviceKindParam::Mu32 => DeviceKind::Mu32,
            DeviceKindParam::Mu256 => DeviceKind::Mu256,
            DeviceKindParam::Mu1024 => DeviceKind::Mu1024,
            DeviceKindParam::File => DeviceKind::File,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatatypeParam {
    #[default]
    Int32,
    Float32,
}

impl From<DatatypeParam> for Datatype {
    fn from(value: DatatypeParam) -> Self {
        match value {
            DatatypeParam::Int32 => Datatype::Int32,
            DatatypeParam::Float32 => Datatype::Float32,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerParam {
    #[default]
    Soft,
    ExternalRisingEdge,
}

impl From<TriggerParam> for Trigger {
    fn from(value: TriggerParam) -> Self {
        match value {
            TriggerParam::Soft => Trigger::Soft,
            TriggerParam::ExternalRisingEdge => Trigger::ExternalRisingEdge,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct H5ParamOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub root_dir: PathBuf,
    #[serde(default = "default_dataset_duration")]
    pub dataset_duration: f64,
    #[serde(default = "default_file_duration")]
    pub file_duration: f64,
    #[serde(default)]
    pub compression_level: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoParamOptions {
    #[serde(default = "default_true")]
    pub monitoring: bool,
    #[serde(default = "default_file_duration")]
    pub file_duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackParamOptions {
    pub path: PathBuf,
    #[serde(default)]
    pub start_time_pct: f64,
    #[serde(default)]
    pub loop_playback: bool,
}

/// Caller-supplied acquisition request, deserialized directly from the
/// `run`/`configure` JSON payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionParams {
    #[serde(default)]
    pub device: DeviceKindParam,
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
    #[serde(default)]
    pub mems: Vec<u32>,
    #[serde(default)]
    pub analogs: Vec<u32>,
    #[serde(default = "default_true")]
    pub counter: bool,
    #[serde(default)]
    pub counter_skip: bool,
    #[serde(default)]
    pub status: bool,
    #[serde(default = "default_buffer_length")]
    pub buffer_length: u32,
    #[serde(default = "default_buffers_number")]
    pub buffers_number: u32,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub sampling_frequency: Option<f64>,
    #[serde(default)]
    pub datatype: DatatypeParam,
    #[serde(default)]
    pub start_trig: TriggerParam,
    #[serde(default = "default_queue_size")]
    pub queue_size: Option<usize>,
    #[serde(default)]
    pub h5: Option<H5ParamOptions>,
    #[serde(default)]
    pub video: Option<VideoParamOptions>,
    #[serde(default)]
    pub playback: Option<PlaybackParamOptions>,
}

fn default_true() -> bool {
    true
}

fn default_buffer_length() -> u32 {
    512
}

fn default_buffers_number() -> u32 {
    4
}

fn default_queue_size() -> Option<usize> {
    Some(32)
}

fn default_dataset_duration() -> f64 {
    1.0
}

fn default_file_duration() -> f64 {
    60.0
}

impl SessionParams {
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id.unwrap_or(DEFAULT_VENDOR_ID)
    }

    pub fn product_id(&self) -> u16 {
        self.product_id.unwrap_or(DEFAULT_PRODUCT_ID)
    }

    /// Validate and compute derived fields, mirroring `ParamBuilder`'s
    /// shape but fed from the wire/config representation.
    pub fn resolve(self) -> Result<ResolvedParameters> {
        let mut builder = ParamBuilder::new()
            .device(self.device.into())
            .mems(self.mems)
            .analogs(self.analogs)
            .counter(self.counter)
            .counter_skip(self.counter_skip)
            .status(self.status)
            .buffer_length(self.buffer_length)
            .buffers_number(self.buffers_number)
            .duration(self.duration)
            .datatype(self.datatype.into())
            .start_trig(self.start_trig.into())
            .queue_size(self.queue_size);

        builder = match self.sampling_frequency {
            Some(fs) => builder.sampling_frequency(fs),
            None => builder,
        };

        if let Some(h5) = self.h5 {
            if h5.enabled {
                builder = builder.h5(H5Options {
                    enabled: true,
                    root_dir: h5.root_dir,
                    dataset_duration: h5.dataset_duration,
                    file_duration: h5.file_duration,
                    compression: h5.compression_level.map(Compression::Gzip),
                });
            }
        }

        if let Some(video) = self.video {
            builder = builder.video(VideoOptions {
                monitoring: video.monitoring,
                file_duration: video.file_duration,
            });
        }

        if let Some(playback) = self.playback {
            if !matches!(self.device, DeviceKindParam::File) {
                return Err(SessionError::Config(
                    "playback options require device=\"file\"".to_string(),
                ));
            }
            builder = builder.playback(PlaybackOptions {
                path: playback.path,
                start_time_pct: playback.start_time_pct,
                loop_playback: playback.loop_playback,
            });
        }

        builder.resolve().map_err(SessionError::Transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_minimal_live_request() {
        let json = r#"{"mems": [0, 1, 2, 3]}"#;
        let params: SessionParams = serde_json::from_str(json).unwrap();
        let resolved = params.resolve().unwrap();
        assert_eq!(resolved.channels_per_frame, 5);
    }

    #[test]
    fn rejects_playback_options_without_file_device() {
        let json = r#"{"mems": [0], "playback": {"path": "/tmp/x.h5"}}"#;
        let params: SessionParams = serde_json::from_str(json).unwrap();
        let result = params.resolve();
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn accepts_playback_options_with_file_device() {
        let json = r#"{"device": "file", "mems": [0], "playback": {"path": "/tmp/x.h5"}}"#;
        let params: SessionParams = serde_json::from_str(json).unwrap();
        assert!(params.resolve().is_ok());
    }
}
