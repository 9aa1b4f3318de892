//! H5 Recorder (C4): chunked dataset persistence with file rolling.
//!
//! The recorder owns an in-memory cache shaped `(channels × dataset_length)`
//! and a cursor. Each `write_frame` call fills the cache, flushing and
//! rolling to the next file whenever a dataset or a file's dataset budget
//! is exhausted.

use std::path::{Path, PathBuf};

use chrono::Local;
use hdf5::types::VarLenUnicode;
use mu_transfer::{Compression, Datatype, Frame, ResolvedParameters, Word};
use tracing::debug;

use crate::error::Result;

pub(crate) const GROUP_NAME: &str = "muh5";

fn filename_for(now: chrono::DateTime<Local>) -> String {
    format!("muh5-{}.h5", now.format("%Y%m%d-%H%M%S"))
}

fn compression_label(compression: &Option<Compression>) -> String {
    match compression {
        Some(Compression::Gzip(level)) => format!("gzip:{level}"),
        None => "false".to_string(),
    }
}

fn datatype_label(datatype: Datatype) -> &'static str {
    match datatype {
        Datatype::Int32 => "INT32",
        Datatype::Float32 => "FLOAT32",
    }
}

/// Records frames into a rolling sequence of chunked HDF5 files.
pub struct H5Recorder<W: Word + hdf5::H5Type> {
    root_dir: PathBuf,
    channels_after_skip: usize,
    sampling_frequency: f64,
    dataset_duration: f64,
    dataset_length: usize,
    datasets_per_file: u32,
    compression: Option<Compression>,
    mems: Vec<u32>,
    analogs: Vec<u32>,
    counter: bool,
    counter_skip: bool,
    datatype: Datatype,

    cache: Vec<W>,
    cursor: usize,
    dataset_ts: f64,
    file: Option<hdf5::File>,
    file_dataset_count: u32,
    total_datasets_written: u64,
}

impl<W: Word + hdf5::H5Type> H5Recorder<W> {
    /// Build a recorder from resolved acquisition parameters and the
    /// [`mu_transfer::H5Options`] selected for this session. `channels_after_skip`
    /// must match the channel count of frames this recorder will receive
    /// (post `counter_skip` stripping, if any).
    pub fn new(resolved: &ResolvedParameters, root_dir: impl AsRef<Path>, channels_after_skip: usize) -> Self {
        let h5 = resolved.params.h5.clone();
        let (dataset_duration, compression) = match &h5 {
            Some(options) => (options.dataset_duration, options.compression.clone()),
            None => (1.0, None),
        };
        let file_duration = h5.as_ref().map(|o| o.file_duration).unwrap_or(1.0);
        let dataset_length = (resolved.sampling_frequency * dataset_duration).round() as usize;
        let datasets_per_file = (file_duration / dataset_duration).floor().max(1.0) as u32;

        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            channels_after_skip,
            sampling_frequency: resolved.sampling_frequency,
            dataset_duration,
            dataset_length: dataset_length.max(1),
            datasets_per_file,
            compression,
            mems: resolved.params.mems.clone(),
            analogs: resolved.params.analogs.clone(),
            counter: resolved.params.counter,
            counter_skip: resolved.params.counter_skip,
            datatype: resolved.params.datatype,
            cache: Vec::new(),
            cursor: 0,
            dataset_ts: 0.0,
            file: None,
            file_dataset_count: 0,
            total_datasets_written: 0,
        }
    }

    fn ensure_cache(&mut self) {
        if self.cache.len() != self.channels_after_skip * self.dataset_length {
            self.cache = vec![zero_word::<W>(); self.channels_after_skip * self.dataset_length];
        }
    }

    fn open_next_file(&mut self) -> Result<()> {
        let now = Local::now();
        let path = self.root_dir.join(filename_for(now));
        let file = hdf5::File::create(&path)?;
        let group = file.create_group(GROUP_NAME)?;
        self.write_root_attrs(&group, now)?;
        debug!(path = %path.display(), "opened H5 output file");
        self.file = Some(file);
        self.file_dataset_count = 0;
        Ok(())
    }

    fn write_root_attrs(&self, group: &hdf5::Group, now: chrono::DateTime<Local>) -> Result<()> {
        write_scalar_attr(group, "date", now.format("%Y-%m-%d").to_string().parse::<VarLenUnicode>().unwrap())?;
        write_scalar_attr(group, "timestamp", now.timestamp() as f64)?;
        write_scalar_attr(group, "dataset_number", 0u32)?;
        write_scalar_attr(group, "dataset_duration", self.dataset_duration)?;
        write_scalar_attr(group, "dataset_length", self.dataset_length as u32)?;
        write_scalar_attr(group, "channels_number", self.channels_after_skip as u32)?;
        write_scalar_attr(group, "sampling_frequency", self.sampling_frequency)?;
        write_scalar_attr(group, "duration", 0.0f64)?;
        write_scalar_attr(
            group,
            "datatype",
            datatype_label(self.datatype).parse::<VarLenUnicode>().unwrap(),
        )?;
        write_array_attr(group, "mems", &self.mems)?;
        write_array_attr(group, "analogs", &self.analogs)?;
        write_scalar_attr(group, "counter", self.counter)?;
        write_scalar_attr(group, "counter_skip", self.counter_skip)?;
        write_scalar_attr(
            group,
            "compression",
            compression_label(&self.compression).parse::<VarLenUnicode>().unwrap(),
        )?;
        Ok(())
    }

    fn update_root_attrs(&self, group: &hdf5::Group) -> Result<()> {
        overwrite_scalar_attr(group, "dataset_number", self.file_dataset_count)?;
        overwrite_scalar_attr(group, "duration", self.file_dataset_count as f64 * self.dataset_duration)?;
        Ok(())
    }

    /// Append one frame's samples to the open file, rolling datasets and
    /// files as their budgets are exhausted.
    pub fn write_frame(&mut self, frame: &Frame<W>, transfer_timestamp: f64) -> Result<()> {
        self.ensure_cache();
        if self.file.is_none() {
            self.open_next_file()?;
        }

        let buffer_length = frame.samples();
        let mut offset = 0usize;
        while offset < buffer_length {
            if self.cursor == 0 {
                self.dataset_ts = transfer_timestamp + offset as f64 / self.sampling_frequency;
            }
            let space = self.dataset_length - self.cursor;
            let take = (buffer_length - offset).min(space);

            for channel in 0..self.channels_after_skip {
                let src = &frame.row(channel)[offset..offset + take];
                let dst_start = channel * self.dataset_length + self.cursor;
                self.cache[dst_start..dst_start + take].copy_from_slice(src);
            }

            self.cursor += take;
            offset += take;

            if self.cursor == self.dataset_length {
                self.flush_dataset()?;
            }
        }
        Ok(())
    }

    fn flush_dataset(&mut self) -> Result<()> {
        if self.file_dataset_count == self.datasets_per_file {
            self.roll_file()?;
        }

        let file = self.file.as_ref().expect("file opened by write_frame");
        let group = file.group(GROUP_NAME)?;
        let dataset_group = group.create_group(&self.file_dataset_count.to_string())?;

        let mut builder = dataset_group.new_dataset::<W>().shape((self.channels_after_skip, self.dataset_length));
        if let Some(Compression::Gzip(level)) = &self.compression {
            builder = builder.deflate(*level);
        }
        let dataset = builder.create("sig")?;
        dataset.write_raw(&self.cache)?;
        write_scalar_attr(&dataset_group, "ts", self.dataset_ts)?;

        self.file_dataset_count += 1;
        self.total_datasets_written += 1;
        self.update_root_attrs(&group)?;
        self.cursor = 0;
        Ok(())
    }

    /// Closes the current file handle without flushing `self.cache` — the
    /// full dataset that triggered the roll belongs to the new file and is
    /// written by `flush_dataset` right after this returns.
    fn roll_file(&mut self) -> Result<()> {
        self.file = None;
        self.open_next_file()
    }

    /// Flush any partially-filled dataset and close the current file.
    /// A partial dataset is padded with zeros and persisted as-is, since
    /// a session may stop mid-dataset.
    pub fn close(&mut self) -> Result<()> {
        if self.cursor > 0 {
            // Persist the partial dataset without advancing the cursor
            // past `dataset_length`, since `flush_dataset` expects the
            // cache to already be full; pad with the cache's existing
            // (zero-initialized) tail.
            self.flush_dataset()?;
        }
        self.file = None;
        Ok(())
    }

    pub fn total_datasets_written(&self) -> u64 {
        self.total_datasets_written
    }
}

fn zero_word<W: Word>() -> W {
    // SAFETY-free approach: Word doesn't require a Default, so construct
    // the bit-pattern zero via `from_le_bytes`.
    W::from_le_bytes([0, 0, 0, 0])
}

fn write_scalar_attr<T: hdf5::H5Type>(location: &hdf5::Group, name: &str, value: T) -> Result<()> {
    location.new_attr::<T>().create(name)?.write_scalar(&value)?;
    Ok(())
}

fn overwrite_scalar_attr<T: hdf5::H5Type>(location: &hdf5::Group, name: &str, value: T) -> Result<()> {
    if location.attr(name).is_ok() {
        let _ = location.attr(name).map(|a| a.write_scalar(&value));
    } else {
        write_scalar_attr(location, name, value)?;
    }
    Ok(())
}

fn write_array_attr(location: &hdf5::Group, name: &str, values: &[u32]) -> Result<()> {
    location
        .new_attr::<u32>()
        .shape(values.len())
        .create(name)?
        .write_raw(values)?;
    Ok(())
}
