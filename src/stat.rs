// SPDX-License-Identifier: Apache-2.0

//! Point-in-time stat snapshots of watched files.

use std::fs::{self, File, Metadata};
use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::identity::FileId;

/// What a single `stat` of a path or handle reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub id: FileId,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileStat {
    /// Stat the file currently at `path`, following symlinks.
    #[cfg(unix)]
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_parts(FileId::from_metadata(&metadata), &metadata))
    }

    /// Stat the file currently at `path`, following symlinks.
    #[cfg(windows)]
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    /// Stat an open handle, which keeps describing the same file after a rename.
    pub fn from_file(file: &File) -> io::Result<Self> {
        let metadata = file.metadata()?;
        let id = FileId::from_file(file)?;
        Ok(Self::from_parts(id, &metadata))
    }

    fn from_parts(id: FileId, metadata: &Metadata) -> Self {
        Self {
            id,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// True when `path` is a regular file (after following symlinks).
pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
