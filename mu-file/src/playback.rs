//! File Playback Engine (C5): replays recorded H5 datasets as a
//! [`mu_transfer::DeviceBackend`], pacing emission to the file's own
//! sampling frequency.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use mu_core::CancellationToken;
use mu_transfer::{CompletionStatus, DeviceBackend, ResolvedParameters, Word};
use tracing::{debug, warn};

use crate::error::{PersistenceError, Result};
use crate::readers::h5::{FileMetadata, H5Reader};

struct OpenDataset<W> {
    metadata: FileMetadata,
    dataset_index: u32,
    cache: Vec<W>,
    dataset_length: usize,
    cursor: usize,
}

/// Reads one or more H5 files back as a stream of frames, honoring an
/// activation mask, a percentage start offset, and loop-or-stop behavior.
pub struct PlaybackReader<W: Word + hdf5::H5Type> {
    paths: Vec<PathBuf>,
    file_index: usize,
    loop_playback: bool,
    pending_start_pct: Option<f64>,
    requested_mems: Vec<u32>,
    requested_analogs: Vec<u32>,
    column_map: Vec<usize>,
    sampling_frequency: f64,
    buffer_length: usize,
    current: Option<OpenDataset<W>>,
    cancel: CancellationToken,
    start_instant: Option<Instant>,
    frame_index: u64,
}

/// Wall-clock slack subtracted from the target emission deadline, as a
/// fraction of one buffer's duration.
const PROCESSING_DELAY_FRACTION: f64 = 0.2;

impl<W: Word + hdf5::H5Type> PlaybackReader<W> {
    /// Open a playback source: a single file, or every `.h5` file in a
    /// directory, in lexical order. `requested_mems`/`requested_analogs`
    /// select which stored columns to forward downstream.
    pub fn open(
        path: impl AsRef<Path>,
        resolved: &ResolvedParameters,
        start_time_pct: f64,
        loop_playback: bool,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let paths = collect_files(path.as_ref())?;
        let mut reader = Self {
            paths,
            file_index: 0,
            loop_playback,
            pending_start_pct: Some(start_time_pct),
            requested_mems: resolved.params.mems.clone(),
            requested_analogs: resolved.params.analogs.clone(),
            column_map: Vec::new(),
            sampling_frequency: resolved.sampling_frequency,
            buffer_length: resolved.params.buffer_length as usize,
            current: None,
            cancel,
            start_instant: None,
            frame_index: 0,
        };
        reader.ensure_current_dataset()?;
        Ok(reader)
    }

    fn apply_metadata(&mut self, metadata: &FileMetadata) -> Result<()> {
        if (metadata.sampling_frequency - self.sampling_frequency).abs() > f64::EPSILON {
            warn!(
                requested = self.sampling_frequency,
                file = metadata.sampling_frequency,
                "sampling frequency mismatch, overriding from file"
            );
            self.sampling_frequency = metadata.sampling_frequency;
        }

        let base = if metadata.counter && !metadata.counter_skip { 1 } else { 0 };
        let mut column_map = Vec::with_capacity(self.requested_mems.len() + self.requested_analogs.len());
        for &channel in &self.requested_mems {
            let position = metadata
                .mems
                .iter()
                .position(|&m| m == channel)
                .ok_or(PersistenceError::ChannelUnavailable(channel))?;
            column_map.push(base + position);
        }
        let analog_base = base + metadata.mems.len();
        for &channel in &self.requested_analogs {
            let position = metadata
                .analogs
                .iter()
                .position(|&a| a == channel)
                .ok_or(PersistenceError::ChannelUnavailable(channel))?;
            column_map.push(analog_base + position);
        }
        self.column_map = column_map;
        Ok(())
    }

    fn open_file_at(&mut self, index: usize) -> Result<()> {
        let reader = H5Reader::open(&self.paths[index])?;
        let metadata = reader.metadata()?;
        self.apply_metadata(&metadata)?;

        let dataset_length = metadata.dataset_length as usize;
        let total_samples = dataset_length * metadata.dataset_number as usize;
        let start_pct = self.pending_start_pct.take().unwrap_or(0.0);
        let start_samples = ((start_pct / 100.0) * total_samples as f64).round() as usize;
        let dataset_index = (start_samples / dataset_length.max(1)) as u32;
        let offset = start_samples % dataset_length.max(1);

        if dataset_index >= metadata.dataset_number {
            return Err(PersistenceError::PlaybackExhausted);
        }

        let (cache, _ts): (Vec<W>, f64) = reader.read_dataset(dataset_index)?;
        self.current = Some(OpenDataset {
            metadata,
            dataset_index,
            cache,
            dataset_length,
            cursor: offset,
        });
        Ok(())
    }

    /// Ensure a dataset with unread samples is loaded, advancing across
    /// dataset and file boundaries (and looping) as needed. Returns
    /// `false` only when the source is exhausted and not looping.
    fn ensure_current_dataset(&mut self) -> Result<bool> {
        loop {
            if self.current.is_none() {
                if self.file_index >= self.paths.len() {
                    if self.loop_playback {
                        self.file_index = 0;
                        self.pending_start_pct = Some(0.0);
                    } else {
                        return Ok(false);
                    }
                }
                if self.paths.is_empty() {
                    return Err(PersistenceError::EmptySource("<empty playback source>".into()));
                }
                self.open_file_at(self.file_index)?;
            }

            let current = self.current.as_ref().unwrap();
            if current.cursor < current.dataset_length {
                return Ok(true);
            }

            let next_dataset = current.dataset_index + 1;
            if next_dataset >= current.metadata.dataset_number {
                self.file_index += 1;
                self.current = None;
                continue;
            }

            let reader = H5Reader::open(&self.paths[self.file_index])?;
            let (cache, _ts): (Vec<W>, f64) = reader.read_dataset(next_dataset)?;
            let dataset_length = current.metadata.dataset_length as usize;
            let current = self.current.as_mut().unwrap();
            current.cache = cache;
            current.dataset_length = dataset_length;
            current.dataset_index = next_dataset;
            current.cursor = 0;
        }
    }

    fn channel_count(&self) -> usize {
        self.column_map.len()
    }

    fn next_frame_words(&mut self) -> Result<Option<Vec<W>>> {
        let channels = self.channel_count();
        let mut sample_major = Vec::with_capacity(self.buffer_length * channels);
        let mut collected = 0usize;

        while collected < self.buffer_length {
            if !self.ensure_current_dataset()? {
                return Ok(None);
            }
            let current = self.current.as_mut().unwrap();
            let available = current.dataset_length - current.cursor;
            let take = available.min(self.buffer_length - collected);

            for s in 0..take {
                for &column in &self.column_map {
                    let index = column * current.dataset_length + current.cursor + s;
                    sample_major.push(current.cache[index]);
                }
            }

            current.cursor += take;
            collected += take;
        }
        Ok(Some(sample_major))
    }

    fn pace(&mut self) -> bool {
        let buffer_duration = self.buffer_duration();
        let start = *self.start_instant.get_or_insert_with(Instant::now);
        let target = buffer_duration * self.frame_index as f64 - PROCESSING_DELAY_FRACTION * buffer_duration;
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed < target {
            let remaining = Duration::from_secs_f64(target - elapsed);
            if self.cancel.sleep(remaining) {
                return false;
            }
        }
        true
    }
}

impl<W: Word + hdf5::H5Type> DeviceBackend for PlaybackReader<W> {
    fn buffer_duration(&self) -> f64 {
        if self.sampling_frequency <= 0.0 {
            0.0
        } else {
            self.buffer_length as f64 / self.sampling_frequency
        }
    }

    fn submit(&mut self) -> mu_transfer::Result<()> {
        Ok(())
    }

    fn poll_completion(&mut self, _timeout: Duration) -> CompletionStatus {
        if self.cancel.is_cancelled() {
            return CompletionStatus::Cancelled;
        }
        if !self.pace() {
            return CompletionStatus::Cancelled;
        }

        match self.next_frame_words() {
            Ok(Some(words)) => {
                self.frame_index += 1;
                let mut bytes = Vec::with_capacity(words.len() * 4);
                for word in words {
                    bytes.extend_from_slice(&word.to_le_bytes());
                }
                CompletionStatus::Completed(bytes)
            }
            Ok(None) => {
                debug!("playback source exhausted");
                CompletionStatus::Cancelled
            }
            Err(error) => {
                warn!(%error, "playback read failed");
                CompletionStatus::Error
            }
        }
    }

    fn reset_partial(&mut self) -> mu_transfer::Result<()> {
        Ok(())
    }

    fn issue_stop(&mut self) -> mu_transfer::Result<()> {
        Ok(())
    }

    fn issue_full_reset(&mut self) -> mu_transfer::Result<()> {
        Ok(())
    }

    fn drain_once(&mut self, _timeout: Duration) {}
}

fn collect_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("h5"))
            .collect();
        entries.sort();
        if entries.is_empty() {
            return Err(PersistenceError::EmptySource(path.display().to_string()));
        }
        Ok(entries)
    } else {
        Ok(vec![path.to_path_buf()])
    }
}

#[cfg(test)]
mod tests {
    use mu_transfer::{DeviceKind, Frame, H5Options, ParamBuilder};
    use tempfile::tempdir;

    use super::*;
    use crate::writers::h5::H5Recorder;

    fn record_fixture(dir: &Path, fs: f64, buffer_length: u32, dataset_duration: f64, frames: u32) {
        let resolved = ParamBuilder::new()
            .device(DeviceKind::Mu32)
            .mems(vec![0, 1])
            .counter(false)
            .sampling_frequency(fs)
            .buffer_length(buffer_length)
            .h5(H5Options {
                enabled: true,
                root_dir: dir.to_path_buf(),
                dataset_duration,
                file_duration: 100.0,
                compression: None,
            })
            .resolve()
            .unwrap();

        let mut recorder: H5Recorder<i32> = H5Recorder::new(&resolved, dir, 2);
        for i in 0..frames {
            let words: Vec<i32> = (0..(2 * buffer_length)).map(|w| (i * buffer_length * 2) as i32 + w as i32).collect();
            let frame = Frame::<i32>::from_raw_words(&words, 2, buffer_length as usize, i as f64).unwrap();
            recorder.write_frame(&frame, i as f64).unwrap();
        }
        recorder.close().unwrap();
    }

    #[test]
    fn rejects_missing_channel_with_channel_unavailable() {
        let dir = tempdir().unwrap();
        record_fixture(dir.path(), 1000.0, 100, 0.1, 2);

        let resolved = ParamBuilder::new()
            .device(DeviceKind::File)
            .mems(vec![0, 7])
            .counter(false)
            .sampling_frequency(1000.0)
            .buffer_length(100)
            .resolve()
            .unwrap();

        let result: Result<PlaybackReader<i32>> =
            PlaybackReader::open(dir.path(), &resolved, 0.0, false, CancellationToken::new());
        assert!(matches!(result, Err(PersistenceError::ChannelUnavailable(7))));
    }

    #[test]
    fn replays_recorded_samples_in_order() {
        let dir = tempdir().unwrap();
        record_fixture(dir.path(), 1000.0, 100, 0.1, 4);

        let resolved = ParamBuilder::new()
            .device(DeviceKind::File)
            .mems(vec![0, 1])
            .counter(false)
            .sampling_frequency(1000.0)
            .buffer_length(100)
            .resolve()
            .unwrap();

        let mut playback: PlaybackReader<i32> =
            PlaybackReader::open(dir.path(), &resolved, 0.0, false, CancellationToken::new()).unwrap();

        let mut total_frames = 0;
        loop {
            match playback.poll_completion(Duration::from_millis(10)) {
                CompletionStatus::Completed(bytes) => {
                    assert_eq!(bytes.len(), 2 * 100 * 4);
                    total_frames += 1;
                }
                CompletionStatus::Cancelled => break,
                other => panic!("unexpected completion: {other:?}"),
            }
        }
        assert_eq!(total_frames, 4);
    }
}
