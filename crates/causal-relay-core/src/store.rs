//! Local file source and sink for file frames.

use crate::error::RelayError;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// Prefix given to every file written from a peer's payload.
pub const RECEIVED_PREFIX: &str = "received_";

/// Reads outgoing files from, and writes incoming files into, one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a local file to send. Relative names resolve against the root.
    pub async fn open_for_read(&self, name: &str) -> Result<File, RelayError> {
        let path = self.root.join(name);
        let not_found = || RelayError::FileNotFound(name.to_string());
        let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => not_found(),
            _ => RelayError::Io(e),
        })?;
        if !meta.is_file() {
            return Err(not_found());
        }
        Ok(File::open(&path).await?)
    }

    /// Create the file that will hold a peer's payload.
    ///
    /// Only the final path component of `name` is used, so a peer cannot
    /// write outside the root.
    pub async fn open_for_write(&self, name: &str) -> Result<(File, PathBuf), RelayError> {
        let path = self.received_path(name)?;
        let file = File::create(&path).await?;
        Ok((file, path))
    }

    /// Where an incoming file called `name` is stored.
    pub fn received_path(&self, name: &str) -> Result<PathBuf, RelayError> {
        let base = wire_name(name).ok_or_else(|| {
            RelayError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable file name {name:?}"),
            ))
        })?;
        Ok(self.root.join(format!("{RECEIVED_PREFIX}{base}")))
    }
}

/// The name to announce in a file header: the last path component.
pub fn wire_name(name: &str) -> Option<&str> {
    Path::new(name).file_name().and_then(|n| n.to_str())
}
