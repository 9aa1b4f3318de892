//! HDF5-backed dataset recorder and file-playback engine for the
//! MegaMicro acquisition pipeline.
//!
//! - [`writers::h5::H5Recorder`] cuts the live stream into fixed-duration
//!   datasets and rolls files at a file-duration threshold.
//! - [`playback::PlaybackReader`] reads a recording back and implements
//!   [`mu_transfer::DeviceBackend`], letting `TransferEngine` drive it the
//!   same way it drives a live USB receiver.

pub mod error;
pub mod playback;
pub mod readers;
pub mod writers;

pub use error::{PersistenceError, Result};
pub use playback::PlaybackReader;
pub use readers::h5::{FileMetadata, H5Reader};
pub use writers::h5::H5Recorder;
