//! Virtual filesystem cursor exposed to subscribers for browsing and
//! fetching recorded H5 files, scoped to a root directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{NetError, Result};

/// Largest chunk streamed per `h5get` binary message.
pub const CHUNK_SIZE: usize = 1 << 16;

/// Per-subscriber cursor into the H5 recording root. `cwd` is always a
/// subpath of `root`; `h5cd` and `h5get` both reject any path that would
/// resolve outside it.
pub struct H5Handler {
    root: PathBuf,
    cwd: PathBuf,
}

impl H5Handler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        H5Handler { cwd: root.clone(), root }
    }

    pub fn pwd(&self) -> String {
        self.relative_display(&self.cwd)
    }

    pub fn cwd_absolute(&self) -> String {
        self.cwd.display().to_string()
    }

    /// Change directory. `path` may be absolute (relative to the root) or
    /// relative to the current directory; `..` segments are resolved
    /// lexically and may not escape the root.
    pub fn cd(&mut self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if !target.is_dir() {
            return Err(NetError::FileNotFound(path.to_string()));
        }
        self.cwd = target;
        Ok(())
    }

    /// List `.h5` files in the current directory.
    pub fn ls(&self) -> Result<Vec<String>> {
        self.list(|name| name.ends_with(".h5"))
    }

    /// List every entry (files and directories) in the current directory.
    pub fn ls_all(&self) -> Result<Vec<String>> {
        self.list(|_| true)
    }

    fn list(&self, keep: impl Fn(&str) -> bool) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.cwd)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read the full contents of a file in the current directory, split
    /// into fixed-size chunks for streaming.
    pub fn get(&self, filename: &str) -> Result<Vec<Vec<u8>>> {
        if filename.contains('/') || filename.contains('\\') {
            return Err(NetError::PathEscapesRoot);
        }
        let path = self.cwd.join(filename);
        if !path.is_file() {
            return Err(NetError::FileNotFound(filename.to_string()));
        }
        let bytes = fs::read(path)?;
        Ok(bytes.chunks(CHUNK_SIZE).map(|chunk| chunk.to_vec()).collect())
    }

    /// Resolve a `cd`-style path against `cwd`, rejecting escapes from
    /// `root`.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let base = if path.starts_with('/') { self.root.clone() } else { self.cwd.clone() };
        let mut resolved = base;
        for segment in path.trim_start_matches('/').split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if resolved == self.root {
                        return Err(NetError::PathEscapesRoot);
                    }
                    resolved.pop();
                }
                other => resolved.push(other),
            }
        }
        if !resolved.starts_with(&self.root) {
            return Err(NetError::PathEscapesRoot);
        }
        Ok(resolved)
    }

    fn relative_display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => path.display().to_string(),
        }
    }
}
