//! Optional JSON configuration file (§6 "Configuration file"): server
//! connection limits, the default H5 root, and the job list loaded at
//! startup into the scheduler.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_maxconnect")]
    pub maxconnect: usize,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default = "default_h5_rootdir")]
    pub h5_rootdir: PathBuf,
    #[serde(default)]
    pub jobs: Vec<Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            maxconnect: default_maxconnect(),
            filename: None,
            h5_rootdir: default_h5_rootdir(),
            jobs: Vec::new(),
        }
    }
}

fn default_maxconnect() -> usize {
    8
}

fn default_h5_rootdir() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    /// Loads `path` and overlays it onto `Config::default()`; fields the
    /// file omits keep their default. A missing file is not an error —
    /// the configuration is entirely optional per §6.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::from_file("/nonexistent/path/config.json").unwrap();
        assert_eq!(config.maxconnect, 8);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn loads_overrides_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxconnect": 3, "h5_rootdir": "/data"}"#).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.maxconnect, 3);
        assert_eq!(config.h5_rootdir, PathBuf::from("/data"));
        assert!(config.filename.is_none());
    }

    #[test]
    fn malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
