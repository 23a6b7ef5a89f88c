// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Seconds since the Unix epoch, with sub-second precision.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn now_epoch_seconds() -> f64 {
    epoch_seconds(SystemTime::now())
}

/// Last delivered offset of one file identity.
///
/// `owner` is the path of the watched file currently reading this identity.
/// While it is set the offset advances with every delivered record; once it
/// is unset the offset is whatever was delivered last.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    position: u64,
    last_changed_at: f64,
    path_hint: Option<PathBuf>,
    owner: Option<PathBuf>,
}

impl PositionRecord {
    pub fn new(position: u64) -> Self {
        Self {
            position,
            last_changed_at: now_epoch_seconds(),
            path_hint: None,
            owner: None,
        }
    }

    /// A record read back from disk.
    pub fn restored(position: u64, last_changed_at: f64, path_hint: Option<PathBuf>) -> Self {
        Self {
            position,
            last_changed_at,
            path_hint,
            owner: None,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn last_changed_at(&self) -> f64 {
        self.last_changed_at
    }

    /// Path the file had when the record was last written to disk.
    pub fn path_hint(&self) -> Option<&Path> {
        self.path_hint.as_deref()
    }

    pub fn owner(&self) -> Option<&Path> {
        self.owner.as_deref()
    }

    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    /// Path written to disk: the owner if any, otherwise the stored hint.
    pub fn serialized_path(&self) -> Option<&Path> {
        self.owner().or(self.path_hint())
    }

    pub fn touch(&mut self) {
        self.last_changed_at = now_epoch_seconds();
    }

    pub fn update_position(&mut self, position: u64) {
        self.touch();
        self.position = position;
    }

    pub fn increment_position(&mut self, delta: u64) {
        self.touch();
        self.position += delta;
    }

    pub fn set_owner(&mut self, path: &Path) {
        self.touch();
        self.owner = Some(path.to_path_buf());
    }

    /// Drop the owner. The hint goes too, so the identity alone decides
    /// who picks the record up next.
    pub fn unset_owner(&mut self) {
        self.owner = None;
        self.path_hint = None;
    }

    /// Read mode: the file at `path` was consumed up to `position`.
    pub fn reading_completed(&mut self, path: &Path, position: u64) {
        self.touch();
        self.position = position;
        self.path_hint = Some(path.to_path_buf());
        self.owner = None;
    }

    /// Not touched for longer than `retention` as of `as_of`.
    pub fn is_expired(&self, retention: Duration, as_of: f64) -> bool {
        as_of > self.last_changed_at + retention.as_secs_f64()
    }
}
