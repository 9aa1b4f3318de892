//! H5 reader: attribute and per-dataset access shared by the file
//! inspector and the playback engine.

use std::path::Path;

use hdf5::types::VarLenUnicode;
use mu_transfer::Word;

use crate::error::Result;
use crate::writers::h5::GROUP_NAME;

/// Root-group metadata describing one recorded file.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub date: String,
    pub timestamp: f64,
    pub dataset_number: u32,
    pub dataset_duration: f64,
    pub dataset_length: u32,
    pub channels_number: u32,
    pub sampling_frequency: f64,
    pub duration: f64,
    pub datatype: String,
    pub mems: Vec<u32>,
    pub analogs: Vec<u32>,
    pub counter: bool,
    pub counter_skip: bool,
    pub compression: String,
}

/// A handle onto a recorded file, open for reading.
pub struct H5Reader {
    file: hdf5::File,
}

impl H5Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = hdf5::File::open(path)?;
        Ok(Self { file })
    }

    fn group(&self) -> Result<hdf5::Group> {
        Ok(self.file.group(GROUP_NAME)?)
    }

    pub fn metadata(&self) -> Result<FileMetadata> {
        let group = self.group()?;
        Ok(FileMetadata {
            date: read_string_attr(&group, "date")?,
            timestamp: group.attr("timestamp")?.read_scalar()?,
            dataset_number: group.attr("dataset_number")?.read_scalar()?,
            dataset_duration: group.attr("dataset_duration")?.read_scalar()?,
            dataset_length: group.attr("dataset_length")?.read_scalar()?,
            channels_number: group.attr("channels_number")?.read_scalar()?,
            sampling_frequency: group.attr("sampling_frequency")?.read_scalar()?,
            duration: group.attr("duration")?.read_scalar()?,
            datatype: read_string_attr(&group, "datatype")?,
            mems: group.attr("mems")?.read_raw()?,
            analogs: group.attr("analogs")?.read_raw()?,
            counter: group.attr("counter")?.read_scalar()?,
            counter_skip: group.attr("counter_skip")?.read_scalar()?,
            compression: read_string_attr(&group, "compression")?,
        })
    }

    /// Read one dataset's `(channels × dataset_length)` samples and its
    /// starting timestamp.
    pub fn read_dataset<W: Word + hdf5::H5Type>(&self, index: u32) -> Result<(Vec<W>, f64)> {
        let group = self.group()?;
        let dataset_group = group.group(&index.to_string())?;
        let dataset = dataset_group.dataset("sig")?;
        let data: Vec<W> = dataset.read_raw()?;
        let ts: f64 = dataset_group.attr("ts")?.read_scalar()?;
        Ok((data, ts))
    }
}

fn read_string_attr(group: &hdf5::Group, name: &str) -> Result<String> {
    let value: VarLenUnicode = group.attr(name)?.read_scalar()?;
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use mu_transfer::{DeviceKind, Frame, H5Options, ParamBuilder};
    use tempfile::tempdir;

    use super::*;
    use crate::writers::h5::H5Recorder;

    #[test]
    fn round_trips_attributes_and_dataset() {
        let dir = tempdir().unwrap();
        let resolved = ParamBuilder::new()
            .device(DeviceKind::Mu32)
            .mems(vec![0, 1])
            .counter(true)
            .sampling_frequency(1000.0)
            .buffer_length(4)
            .h5(H5Options {
                enabled: true,
                root_dir: dir.path().to_path_buf(),
                dataset_duration: 0.004,
                file_duration: 1.0,
                compression: None,
            })
            .resolve()
            .unwrap();

        let mut recorder: H5Recorder<i32> = H5Recorder::new(&resolved, dir.path(), 3);
        let words: Vec<i32> = (0..12).collect();
        let frame = Frame::<i32>::from_raw_words(&words, 3, 4, 10.0).unwrap();
        recorder.write_frame(&frame, 10.0).unwrap();
        recorder.close().unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();

        let reader = H5Reader::open(&path).unwrap();
        let metadata = reader.metadata().unwrap();
        assert_eq!(metadata.channels_number, 3);
        assert_eq!(metadata.mems, vec![0, 1]);

        let (data, ts): (Vec<i32>, f64) = reader.read_dataset(0).unwrap();
        assert_eq!(data.len(), 12);
        assert_eq!(ts, 10.0);
    }
}
