// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use filewatch::config::{
    CompletedAction, DEFAULT_FILE_CHUNK_SIZE, DEFAULT_MAX_ACTIVE, Mode, SortBy, SortDirection,
    StartAt, TailConfig,
};

#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    /// Follow files forever, handling rotation
    #[default]
    Tail,
    /// Read every file once to its end
    Read,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Tail => Mode::Tail,
            ModeArg::Read => Mode::Read,
        }
    }
}

/// Where to start reading files
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    #[default]
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum SortByArg {
    #[default]
    #[value(name = "last_modified")]
    LastModified,
    Path,
}

impl From<SortByArg> for SortBy {
    fn from(s: SortByArg) -> Self {
        match s {
            SortByArg::LastModified => SortBy::LastModified,
            SortByArg::Path => SortBy::Path,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum SortDirectionArg {
    #[default]
    Asc,
    Desc,
}

impl From<SortDirectionArg> for SortDirection {
    fn from(s: SortDirectionArg) -> Self {
        match s {
            SortDirectionArg::Asc => SortDirection::Asc,
            SortDirectionArg::Desc => SortDirection::Desc,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum CompletedActionArg {
    Log,
    Delete,
    #[value(name = "log_and_delete")]
    LogAndDelete,
}

impl From<CompletedActionArg> for CompletedAction {
    fn from(a: CompletedActionArg) -> Self {
        match a {
            CompletedActionArg::Log => CompletedAction::Log,
            CompletedActionArg::Delete => CompletedAction::Delete,
            CompletedActionArg::LogAndDelete => CompletedAction::LogAndDelete,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum LogFormatArg {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "filewatch")]
#[command(bin_name = "filewatch")]
#[command(version, about, long_about = None)]
pub struct Arguments {
    /// Glob patterns of files to watch
    #[arg(required = true, env = "FILEWATCH_PATHS", value_delimiter = ',')]
    pub paths: Vec<String>,

    /// Comma-separated file name patterns to skip
    #[arg(long, env = "FILEWATCH_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Tail files forever or read them once
    #[arg(value_enum, long, env = "FILEWATCH_MODE", default_value = "tail")]
    pub mode: ModeArg,

    /// Where to start reading files present at startup
    #[arg(value_enum, long, env = "FILEWATCH_START_AT", default_value = "end")]
    pub start_at: StartAtArg,

    /// File holding read positions across restarts
    #[arg(
        long,
        env = "FILEWATCH_POSITION_STORE_PATH",
        default_value = filewatch::config::DEFAULT_POSITION_STORE_PATH
    )]
    pub position_store_path: PathBuf,

    /// Minimum time between two position store writes
    #[arg(long, env = "FILEWATCH_POSITION_WRITE_INTERVAL", default_value = "15s", value_parser = humantime::parse_duration)]
    pub position_write_interval: Duration,

    /// Drop stored positions untouched for this long
    #[arg(long, env = "FILEWATCH_POSITION_RETENTION", default_value = "14days", value_parser = humantime::parse_duration)]
    pub position_retention: Duration,

    /// Time between two passes over the watched files
    #[arg(long, env = "FILEWATCH_STAT_INTERVAL", default_value = "1s", value_parser = humantime::parse_duration)]
    pub stat_interval: Duration,

    /// Passes between two glob expansions
    #[arg(long, env = "FILEWATCH_DISCOVER_INTERVAL", default_value = "15")]
    pub discover_interval: u64,

    /// Close files idle for longer than this
    #[arg(long, env = "FILEWATCH_CLOSE_OLDER", value_parser = humantime::parse_duration)]
    pub close_older: Option<Duration>,

    /// Skip files last modified longer ago than this until they change
    #[arg(long, env = "FILEWATCH_IGNORE_OLDER", value_parser = humantime::parse_duration)]
    pub ignore_older: Option<Duration>,

    /// Maximum number of files open at once
    #[arg(long, env = "FILEWATCH_MAX_ACTIVE", default_value_t = DEFAULT_MAX_ACTIVE)]
    pub max_active: usize,

    /// Record delimiter
    #[arg(long, env = "FILEWATCH_DELIMITER", default_value = "\n")]
    pub delimiter: String,

    /// Bytes requested per read
    #[arg(long, env = "FILEWATCH_FILE_CHUNK_SIZE", default_value_t = DEFAULT_FILE_CHUNK_SIZE)]
    pub file_chunk_size: usize,

    /// Maximum chunks read from one file per pass
    #[arg(long, env = "FILEWATCH_FILE_CHUNK_COUNT")]
    pub file_chunk_count: Option<usize>,

    #[arg(value_enum, long, env = "FILEWATCH_SORT_BY", default_value = "last_modified")]
    pub sort_by: SortByArg,

    #[arg(value_enum, long, env = "FILEWATCH_SORT_DIRECTION", default_value = "asc")]
    pub sort_direction: SortDirectionArg,

    /// Read mode: exit once every file has been read
    #[arg(long, env = "FILEWATCH_EXIT_AFTER_READ", default_value = "false")]
    pub exit_after_read: bool,

    /// Read mode: decode gzip files fully before emitting any line
    #[arg(long, env = "FILEWATCH_CHECK_ARCHIVE_VALIDITY", default_value = "false")]
    pub check_archive_validity: bool,

    /// Read mode: what to do with each file once it is read
    #[arg(value_enum, long, env = "FILEWATCH_FILE_COMPLETED_ACTION")]
    pub file_completed_action: Option<CompletedActionArg>,

    /// Read mode: file that completed paths are appended to
    #[arg(long, env = "FILEWATCH_FILE_COMPLETED_LOG_PATH")]
    pub file_completed_log_path: Option<PathBuf>,

    /// Capacity of the queue between the watch thread and stdout
    #[arg(long, env = "FILEWATCH_EVENT_QUEUE_SIZE", default_value = "1000")]
    pub event_queue_size: usize,

    /// Print lifecycle events next to the lines
    #[arg(long, env = "FILEWATCH_VERBOSE_EVENTS", default_value = "false")]
    pub verbose_events: bool,

    /// Log format
    #[arg(value_enum, long, env = "FILEWATCH_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormatArg,
}

impl Arguments {
    pub fn build_config(&self) -> TailConfig {
        let defaults = TailConfig::default();
        let mode: Mode = self.mode.into();
        TailConfig {
            paths: self.paths.clone(),
            exclude: self.exclude.clone(),
            mode,
            stat_interval: self.stat_interval,
            discover_interval: self.discover_interval,
            position_store_path: self.position_store_path.clone(),
            position_write_interval: self.position_write_interval,
            position_retention: self.position_retention,
            start_at: self.start_at.into(),
            close_older: match (self.close_older, mode) {
                (Some(d), _) => Some(d),
                (None, Mode::Tail) => defaults.close_older,
                (None, Mode::Read) => None,
            },
            ignore_older: self.ignore_older,
            max_active: self.max_active,
            delimiter: self.delimiter.clone(),
            file_chunk_size: self.file_chunk_size,
            file_chunk_count: self
                .file_chunk_count
                .unwrap_or(usize::MAX / self.file_chunk_size.max(1)),
            sort_by: self.sort_by.into(),
            sort_direction: self.sort_direction.into(),
            exit_after_read: self.exit_after_read,
            check_archive_validity: self.check_archive_validity,
            file_completed_action: self.file_completed_action.map(Into::into),
            file_completed_log_path: self.file_completed_log_path.clone(),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_mode_has_no_close_older_by_default() {
        let args = Arguments::parse_from(["filewatch", "--mode", "read", "/tmp/*.log"]);
        let config = args.build_config();
        assert_eq!(config.mode, Mode::Read);
        assert_eq!(config.close_older, None);
        assert_eq!(config.file_completed_action, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_completed_action_needs_log_path() {
        let args = Arguments::parse_from([
            "filewatch",
            "--mode",
            "read",
            "--file-completed-action",
            "log_and_delete",
            "/tmp/*.log",
        ]);
        let config = args.build_config();
        assert_eq!(config.file_completed_action, Some(CompletedAction::LogAndDelete));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_and_lists() {
        let args = Arguments::parse_from([
            "filewatch",
            "--stat-interval",
            "250ms",
            "--exclude",
            "*.gz,*.bak",
            "--close-older",
            "5m",
            "/var/log/*.log",
        ]);
        let config = args.build_config();
        assert_eq!(config.stat_interval, Duration::from_millis(250));
        assert_eq!(config.exclude, vec!["*.gz", "*.bak"]);
        assert_eq!(config.close_older, Some(Duration::from_secs(300)));
        assert_eq!(config.paths, vec!["/var/log/*.log"]);
    }
}
