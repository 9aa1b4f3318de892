//! Frame type: the channels×samples matrix emitted once per transfer
//! completion, and the [`Word`] trait abstracting over its 32-bit storage.
//!
//! This abstracts over `i32`/`f32` storage the way `bbx_core::Sample`
//! abstracts over `f32`/`f64`, so the engine and downstream consumers
//! are generic over `datatype`.

use std::fmt::Debug;

use crate::error::{Result, TransferError};

/// A 32-bit word type carried over the bulk endpoint, selected by
/// `AcquisitionParameters::datatype`.
pub trait Word: Debug + Copy + Clone + Send + Sync + PartialEq + 'static {
    /// Reinterpret a little-endian 32-bit word as this type's bit pattern.
    fn from_le_bytes(bytes: [u8; 4]) -> Self;

    /// Serialize this value as little-endian bytes for wire transmission.
    fn to_le_bytes(self) -> [u8; 4];

    /// Interpret this word as a signed integer, used only by the counter
    /// channel (which is always carried as `INT32` regardless of
    /// `datatype`).
    fn as_i64(self) -> i64;
}

impl Word for i32 {
    fn from_le_bytes(bytes: [u8; 4]) -> Self {
        i32::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> [u8; 4] {
        i32::to_le_bytes(self)
    }

    fn as_i64(self) -> i64 {
        self as i64
    }
}

impl Word for f32 {
    fn from_le_bytes(bytes: [u8; 4]) -> Self {
        f32::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> [u8; 4] {
        f32::to_le_bytes(self)
    }

    fn as_i64(self) -> i64 {
        self as i64
    }
}

/// A `channels × samples` matrix of 32-bit words, plus the wall-clock
/// timestamp of its first sample.
///
/// Internally stored channel-major (`channels` rows of `samples` words
/// each), matching the layout datasets and wire frames both use.
#[derive(Debug, Clone)]
pub struct Frame<W: Word> {
    channels: usize,
    samples: usize,
    data: Vec<W>,
    pub transfer_timestamp: f64,
}

impl<W: Word> Frame<W> {
    /// Build a frame from a raw bulk-transfer payload, which arrives
    /// sample-major (`buffer_length` groups of `channels_per_frame`
    /// words each) and must be transposed to channel-major storage.
    pub fn from_raw_words(
        words: &[W],
        channels_per_frame: usize,
        buffer_length: usize,
        transfer_timestamp: f64,
    ) -> Result<Self> {
        let expected = channels_per_frame * buffer_length;
        if words.len() != expected {
            return Err(TransferError::ShortRead {
                expected,
                actual: words.len(),
            });
        }
        let mut data = vec![
            words[0];
            channels_per_frame * buffer_length
        ];
        for sample in 0..buffer_length {
            for channel in 0..channels_per_frame {
                data[channel * buffer_length + sample] = words[sample * channels_per_frame + channel];
            }
        }
        Ok(Self {
            channels: channels_per_frame,
            samples: buffer_length,
            data,
            transfer_timestamp,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Borrow one channel row.
    pub fn row(&self, channel: usize) -> &[W] {
        let start = channel * self.samples;
        &self.data[start..start + self.samples]
    }

    /// Drop row 0 (the counter channel), used when `counter_skip` is set.
    pub fn drop_first_row(&self) -> Self {
        if self.channels == 0 {
            return self.clone();
        }
        let mut data = Vec::with_capacity((self.channels - 1) * self.samples);
        for channel in 1..self.channels {
            data.extend_from_slice(self.row(channel));
        }
        Self {
            channels: self.channels - 1,
            samples: self.samples,
            data,
            transfer_timestamp: self.transfer_timestamp,
        }
    }

    /// Select a subset of rows by index, preserving order, as used by the
    /// Broadcast Hub's per-listener mask.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut data = Vec::with_capacity(rows.len() * self.samples);
        for &channel in rows {
            data.extend_from_slice(self.row(channel));
        }
        Self {
            channels: rows.len(),
            samples: self.samples,
            data,
            transfer_timestamp: self.transfer_timestamp,
        }
    }

    /// Serialize the whole frame as a contiguous little-endian byte image,
    /// row-major `(channels × samples)`, as sent to listeners and written
    /// to H5 datasets.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 4);
        for word in &self.data {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Validate the Counter Invariant against a designated counter row:
    /// `row[k] - row[0] == k` for every sample `k`.
    pub fn check_counter_invariant(&self, counter_row: usize) -> Result<()> {
        let row = self.row(counter_row);
        let base = row[0].as_i64();
        for (k, word) in row.iter().enumerate() {
            let actual = word.as_i64() - base;
            if actual != k as i64 {
                return Err(TransferError::Misalignment {
                    expected: self.samples as u32,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// The first and last value of a designated counter row.
    pub fn counter_bounds(&self, counter_row: usize) -> (i64, i64) {
        let row = self.row(counter_row);
        (row[0].as_i64(), row[row.len() - 1].as_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_words(channels: usize, samples: usize) -> Vec<i32> {
        let mut words = Vec::with_capacity(channels * samples);
        for s in 0..samples {
            for c in 0..channels {
                words.push((c * 1000 + s) as i32);
            }
        }
        words
    }

    #[test]
    fn transpose_is_correct() {
        let words = sample_words(3, 4);
        let frame = Frame::<i32>::from_raw_words(&words, 3, 4, 0.0).unwrap();
        assert_eq!(frame.row(0), &[0, 1, 2, 3]);
        assert_eq!(frame.row(1), &[1000, 1001, 1002, 1003]);
        assert_eq!(frame.row(2), &[2000, 2001, 2002, 2003]);
    }

    #[test]
    fn short_read_is_rejected() {
        let words = vec![0i32; 5];
        let result = Frame::<i32>::from_raw_words(&words, 3, 4, 0.0);
        assert!(matches!(result, Err(TransferError::ShortRead { .. })));
    }

    #[test]
    fn drop_first_row_removes_counter_channel() {
        let words = sample_words(3, 4);
        let frame = Frame::<i32>::from_raw_words(&words, 3, 4, 0.0).unwrap();
        let stripped = frame.drop_first_row();
        assert_eq!(stripped.channels(), 2);
        assert_eq!(stripped.row(0), &[1000, 1001, 1002, 1003]);
    }

    #[test]
    fn counter_invariant_holds_for_monotonic_row() {
        let mut words = sample_words(2, 4);
        for s in 0..4 {
            words[s * 2] = 100 + s as i32;
        }
        let frame = Frame::<i32>::from_raw_words(&words, 2, 4, 0.0).unwrap();
        assert!(frame.check_counter_invariant(0).is_ok());
    }

    #[test]
    fn counter_invariant_detects_gap() {
        let mut words = sample_words(2, 4);
        words[2 * 2] = 999;
        let frame = Frame::<i32>::from_raw_words(&words, 2, 4, 0.0).unwrap();
        assert!(matches!(
            frame.check_counter_invariant(0),
            Err(TransferError::Misalignment { .. })
        ));
    }

    #[test]
    fn select_rows_preserves_order() {
        let words = sample_words(4, 2);
        let frame = Frame::<i32>::from_raw_words(&words, 4, 2, 0.0).unwrap();
        let subset = frame.select_rows(&[1, 3]);
        assert_eq!(subset.channels(), 2);
        assert_eq!(subset.row(0), frame.row(1));
        assert_eq!(subset.row(1), frame.row(3));
    }

    #[test]
    fn to_le_bytes_round_trips() {
        let words = sample_words(2, 2);
        let frame = Frame::<i32>::from_raw_words(&words, 2, 2, 0.0).unwrap();
        let bytes = frame.to_le_bytes();
        assert_eq!(bytes.len(), 4 * 4);
        assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0);
    }
}
