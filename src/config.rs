// SPDX-License-Identifier: Apache-2.0

//! Configuration shared by every component of a watch.
//!
//! A single [`TailConfig`] value is built once, validated, and handed to each
//! component as an `Arc<TailConfig>`. Durations deserialize from humantime
//! strings such as `"250ms"`, `"15s"` or `"14days"`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Default number of open file handles allowed at once.
pub const DEFAULT_MAX_ACTIVE: usize = 4095;

/// Default size of a single read from a file.
pub const DEFAULT_FILE_CHUNK_SIZE: usize = 32 * 1024;

/// Default cap on chunks read from one file per tick (effectively unbounded).
pub const DEFAULT_FILE_CHUNK_COUNT: usize = usize::MAX / DEFAULT_FILE_CHUNK_SIZE;

/// Default record delimiter.
pub const DEFAULT_DELIMITER: &str = "\n";

/// Default position store location.
pub const DEFAULT_POSITION_STORE_PATH: &str = "/var/lib/filewatch/positions";

/// Whether files are followed forever or read once to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Follow files for appended content, handling rotation
    #[default]
    Tail,
    /// Read each file once, then forget it
    Read,
}

/// Where to start reading from when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

/// Key used to order registry snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    LastModified,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// What read mode does with a file once it has been read to the end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedAction {
    /// Append the path to `file_completed_log_path`
    Log,
    /// Remove the file
    Delete,
    /// Append the path, then remove the file
    LogAndDelete,
}

impl CompletedAction {
    pub fn logs(self) -> bool {
        matches!(self, CompletedAction::Log | CompletedAction::LogAndDelete)
    }

    pub fn deletes(self) -> bool {
        matches!(self, CompletedAction::Delete | CompletedAction::LogAndDelete)
    }
}

/// Configuration for a watch
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Glob patterns for files to watch
    pub paths: Vec<String>,

    /// Shell patterns matched against the file name only
    pub exclude: Vec<String>,

    /// Tail or read mode
    pub mode: Mode,

    /// How long the scheduler sleeps between ticks
    #[serde(deserialize_with = "deserialize_duration")]
    pub stat_interval: Duration,

    /// Number of ticks between glob expansions
    pub discover_interval: u64,

    /// Where read positions are persisted
    pub position_store_path: PathBuf,

    /// Minimum time between two position store writes
    #[serde(deserialize_with = "deserialize_duration")]
    pub position_write_interval: Duration,

    /// Records untouched for longer than this are dropped
    #[serde(deserialize_with = "deserialize_duration")]
    pub position_retention: Duration,

    /// Where to start reading files seen in the first discovery
    pub start_at: StartAt,

    /// Release the handle of a fully read file idle for longer than this
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub close_older: Option<Duration>,

    /// Do not read files last modified longer ago than this until they grow
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub ignore_older: Option<Duration>,

    /// Maximum number of files open at once (0 selects the default)
    pub max_active: usize,

    /// Record delimiter
    pub delimiter: String,

    /// Bytes requested per read
    pub file_chunk_size: usize,

    /// Maximum chunks read from one file per tick
    pub file_chunk_count: usize,

    pub sort_by: SortBy,

    pub sort_direction: SortDirection,

    /// Read mode only: stop the watch once every discovered file is consumed
    pub exit_after_read: bool,

    /// Read mode only: fully decode compressed files before delivering records
    pub check_archive_validity: bool,

    /// Read mode only: action taken on each fully read file
    pub file_completed_action: Option<CompletedAction>,

    /// Read mode only: file the completed paths are appended to
    pub file_completed_log_path: Option<PathBuf>,

    /// Minimum time between two "open files limit" warnings
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_files_warn_interval: Duration,

    /// Minimum time between two open or stat failure warnings for one file
    #[serde(deserialize_with = "deserialize_duration")]
    pub open_warn_interval: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exclude: Vec::new(),
            mode: Mode::Tail,
            stat_interval: Duration::from_secs(1),
            discover_interval: 15,
            position_store_path: PathBuf::from(DEFAULT_POSITION_STORE_PATH),
            position_write_interval: Duration::from_secs(15),
            position_retention: Duration::from_secs(14 * 24 * 60 * 60),
            start_at: StartAt::End,
            close_older: Some(Duration::from_secs(60 * 60)),
            ignore_older: None,
            max_active: DEFAULT_MAX_ACTIVE,
            delimiter: DEFAULT_DELIMITER.to_string(),
            file_chunk_size: DEFAULT_FILE_CHUNK_SIZE,
            file_chunk_count: DEFAULT_FILE_CHUNK_COUNT,
            sort_by: SortBy::LastModified,
            sort_direction: SortDirection::Asc,
            exit_after_read: false,
            check_archive_validity: false,
            file_completed_action: None,
            file_completed_log_path: None,
            max_files_warn_interval: Duration::from_secs(20),
            open_warn_interval: Duration::from_secs(300),
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.stat_interval.is_zero() {
            return Err("stat_interval must be greater than zero".to_string());
        }
        if self.discover_interval == 0 {
            return Err("discover_interval must be at least 1".to_string());
        }
        if self.delimiter.is_empty() {
            return Err("delimiter must not be empty".to_string());
        }
        if self.file_chunk_size == 0 {
            return Err("file_chunk_size must be greater than zero".to_string());
        }
        if self.file_chunk_count == 0 {
            return Err("file_chunk_count must be at least 1".to_string());
        }
        if self.position_store_path.as_os_str().is_empty() {
            return Err("position_store_path must be specified".to_string());
        }
        if self.file_completed_action.is_some_and(CompletedAction::logs)
            && self.file_completed_log_path.is_none()
        {
            return Err("file_completed_log_path is required to log completed files".to_string());
        }
        Ok(())
    }

    /// The open handle budget, with 0 meaning the default.
    pub fn effective_max_active(&self) -> usize {
        if self.max_active == 0 {
            DEFAULT_MAX_ACTIVE
        } else {
            self.max_active
        }
    }

    pub fn delimiter_bytes(&self) -> &[u8] {
        self.delimiter.as_bytes()
    }

    pub fn is_read_mode(&self) -> bool {
        self.mode == Mode::Read
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => humantime::parse_duration(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TailConfig::default();
        assert_eq!(config.mode, Mode::Tail);
        assert_eq!(config.start_at, StartAt::End);
        assert_eq!(config.stat_interval, Duration::from_secs(1));
        assert_eq!(config.discover_interval, 15);
        assert_eq!(config.delimiter_bytes(), b"\n");
        assert_eq!(config.effective_max_active(), DEFAULT_MAX_ACTIVE);
        assert!(config.ignore_older.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = TailConfig {
            delimiter: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TailConfig {
            discover_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TailConfig {
            stat_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TailConfig {
            position_store_path: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TailConfig {
            file_completed_action: Some(CompletedAction::LogAndDelete),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TailConfig {
            file_completed_action: Some(CompletedAction::Delete),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_active_uses_default() {
        let config = TailConfig {
            max_active: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_max_active(), DEFAULT_MAX_ACTIVE);
    }

    #[test]
    fn test_config_deserialize() {
        let json = r#"{
            "paths": ["/var/log/*.log"],
            "exclude": ["*.gz"],
            "mode": "read",
            "stat_interval": "250ms",
            "position_retention": "2days",
            "start_at": "beginning",
            "ignore_older": "1h",
            "close_older": null,
            "sort_by": "path",
            "sort_direction": "desc",
            "file_completed_action": "log_and_delete",
            "file_completed_log_path": "/tmp/done.log"
        }"#;

        let config: TailConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.paths, vec!["/var/log/*.log".to_string()]);
        assert_eq!(config.mode, Mode::Read);
        assert_eq!(config.stat_interval, Duration::from_millis(250));
        assert_eq!(config.position_retention, Duration::from_secs(2 * 86400));
        assert_eq!(config.start_at, StartAt::Beginning);
        assert_eq!(config.ignore_older, Some(Duration::from_secs(3600)));
        assert_eq!(config.close_older, None);
        assert_eq!(config.sort_by, SortBy::Path);
        assert_eq!(config.sort_direction, SortDirection::Desc);
        assert_eq!(config.file_completed_action, Some(CompletedAction::LogAndDelete));
        assert_eq!(config.file_completed_log_path, Some(PathBuf::from("/tmp/done.log")));
        // untouched fields keep their defaults
        assert_eq!(config.discover_interval, 15);
    }

    #[test]
    fn test_config_rejects_bad_duration() {
        let json = r#"{ "stat_interval": "soon" }"#;
        assert!(serde_json::from_str::<TailConfig>(json).is_err());
    }
}
