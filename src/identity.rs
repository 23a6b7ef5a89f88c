// SPDX-License-Identifier: Apache-2.0

//! Path independent file identity.
//!
//! A [`FileId`] is the inode (Unix) or file index (Windows) together with the
//! major and minor numbers of the device holding it. It stays the same while a
//! file is renamed, which is what lets a watch follow content through rotation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

/// Unique identifier of a file on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId {
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
    /// Device major number (Unix) or volume serial number (Windows)
    dev_major: u32,
    /// Device minor number (always 0 on Windows)
    dev_minor: u32,
}

impl FileId {
    /// Create a FileId from raw values, as read back from the position store.
    pub fn new(ino: u64, dev_major: u32, dev_minor: u32) -> Self {
        Self {
            ino,
            dev_major,
            dev_minor,
        }
    }

    /// Build the identity from metadata obtained with `stat`/`fstat`.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        let (dev_major, dev_minor) = split_dev(metadata.dev());
        Self {
            ino: metadata.ino(),
            dev_major,
            dev_minor,
        }
    }

    /// Create a FileId from an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    /// Create a FileId from an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            ino: file_index,
            dev_major: info.dwVolumeSerialNumber,
            dev_minor: 0,
        })
    }

    /// Create a FileId for whatever file currently lives at `path`.
    #[cfg(unix)]
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }

    /// Create a FileId for whatever file currently lives at `path`.
    #[cfg(windows)]
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn dev_major(&self) -> u32 {
        self.dev_major
    }

    pub fn dev_minor(&self) -> u32 {
        self.dev_minor
    }
}

/// Space separated, the same layout the position store uses on disk.
impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.ino, self.dev_major, self.dev_minor)
    }
}

/// Split a raw `st_dev` into major and minor numbers.
#[cfg(all(unix, any(target_os = "linux", target_os = "android")))]
fn split_dev(dev: u64) -> (u32, u32) {
    let major = ((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff);
    let minor = ((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff);
    (major as u32, minor as u32)
}

/// Split a raw `st_dev` into major and minor numbers.
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn split_dev(dev: u64) -> (u32, u32) {
    let major = (dev >> 24) & 0xff;
    let minor = dev & 0x00ff_ffff;
    (major as u32, minor as u32)
}
