//! Archive configuration

use crate::archive::Archive;
use objvault_common::{bytesize, Key, Result};
use std::path::{Path, PathBuf};

/// Builder-style configuration for an [`Archive`].
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Backing file path; `None` uses a unique temporary file that is
    /// deleted when the archive is dropped.
    pub path: Option<PathBuf>,
    /// Buffer ceiling in bytes. Zero means never cache.
    pub max_buffer_size: u64,
}

impl StoreConfig {
    /// Create a config with defaults (temporary file, zero buffer).
    pub fn new() -> Self {
        Self::default()
    }

    /// Back the archive with the file at `path`.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the buffer ceiling in bytes.
    pub fn max_buffer_size(mut self, bytes: u64) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Set the buffer ceiling from a human-readable string like `"1.5G"`.
    pub fn max_buffer_size_str(mut self, size: &str) -> Self {
        self.max_buffer_size = bytesize::parse_size(size);
        self
    }

    /// Consume the config and open the archive.
    pub fn open<K: Key>(self) -> Result<Archive<K>> {
        let mut archive = match &self.path {
            Some(path) => Archive::open(path)?,
            None => Archive::temp()?,
        };
        archive.set_max_buffer_size(self.max_buffer_size)?;
        Ok(archive)
    }
}
