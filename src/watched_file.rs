// SPDX-License-Identifier: Apache-2.0

//! Per-path state of a watch.
//!
//! A [`WatchedFile`] is created by discovery and then driven, once per tick,
//! through its [`FileState`] machine by the state processor. It owns the open
//! handle and the partial-record buffer of its path, and remembers the
//! identity the file had when it was discovered or last handed over, which is
//! how rotation is noticed: the path keeps its name but `stat` now reports a
//! different identity.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;

use crate::config::{StartAt, TailConfig};
use crate::identity::FileId;
use crate::listener::{Listener, Observer};
use crate::stat::FileStat;
use crate::tokenizer::BufferedTokenizer;

/// Number of previous states kept for diagnostics.
pub const STATE_HISTORY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    /// Discovered and waiting for a free slot
    Watched,
    /// Handle open, read every tick
    Active,
    /// Too old to read until it changes size
    Ignored,
    /// Handle released after being idle
    Closed,
    /// The path now names a different file than the one being read
    RotationInProgress,
    /// Stat failed once; confirmed or cleared on the next tick
    DelayedDelete,
    /// Terminal, removed from the registry at the end of the tick
    Unwatched,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Watched => "watched",
            FileState::Active => "active",
            FileState::Ignored => "ignored",
            FileState::Closed => "closed",
            FileState::RotationInProgress => "rotation_in_progress",
            FileState::DelayedDelete => "delayed_delete",
            FileState::Unwatched => "unwatched",
        };
        f.write_str(name)
    }
}

/// Bounds of one read pass: `count` reads of `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopControl {
    pub count: usize,
    pub size: usize,
    more: bool,
    read_error: bool,
}

impl LoopControl {
    fn new(count: usize, size: usize, more: bool) -> Self {
        Self {
            count,
            size,
            more,
            read_error: false,
        }
    }

    /// Stop after this pass, EOF or a failed read was hit.
    pub fn flag_read_error(&mut self) {
        self.read_error = true;
    }

    /// More data remained beyond this pass and nothing went wrong.
    pub fn keep_looping(&self) -> bool {
        self.more && !self.read_error
    }
}

pub struct WatchedFile {
    path: PathBuf,
    filename: String,
    config: Arc<TailConfig>,
    /// Latest stat of the path
    stat: FileStat,
    /// Identity this entry tracks; differs from `stat.id` once rotated
    key: FileId,
    size: u64,
    /// Size before the last restat
    previous_size: u64,
    bytes_read: u64,
    bytes_unread: u64,
    accessed_at: Instant,
    state: FileState,
    recent_states: VecDeque<FileState>,
    initial: bool,
    file: Option<File>,
    buffer: BufferedTokenizer,
    listener: Option<Box<dyn Listener>>,
    last_warning_at: Option<Instant>,
    read_loop_count: usize,
}

impl WatchedFile {
    pub fn new(path: PathBuf, stat: FileStat, config: Arc<TailConfig>) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let buffer = BufferedTokenizer::new(config.delimiter_bytes());
        let read_loop_count = config.file_chunk_count;

        Self {
            path,
            filename,
            config,
            stat,
            key: stat.id,
            size: stat.size,
            previous_size: stat.size,
            bytes_read: 0,
            bytes_unread: 0,
            accessed_at: Instant::now(),
            state: FileState::Watched,
            recent_states: VecDeque::with_capacity(STATE_HISTORY_LEN),
            initial: true,
            file: None,
            buffer,
            listener: None,
            last_warning_at: None,
            read_loop_count,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Identity of the file this entry is reading.
    pub fn key(&self) -> FileId {
        self.key
    }

    /// Identity of the file the path names right now.
    pub fn stat_key(&self) -> FileId {
        self.stat.id
    }

    pub fn rotation_detected(&self) -> bool {
        self.stat.id != self.key
    }

    pub fn modified_at(&self) -> SystemTime {
        self.stat.modified
    }

    /// Size seen by the last stat that did not detect rotation.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_unread(&self) -> u64 {
        self.bytes_unread
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn recent_states(&self) -> &VecDeque<FileState> {
        &self.recent_states
    }

    /// Found by the first discovery of its pattern and never associated with a record.
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn initial_completed(&mut self) {
        self.initial = false;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("gz") | Some("gzip")
        )
    }

    /// Re-stat the path. A different identity switches the file to
    /// `RotationInProgress` and leaves the size of the file being read alone.
    pub fn restat(&mut self) -> io::Result<()> {
        self.stat = FileStat::from_path(&self.path)?;
        if self.rotation_detected() {
            if self.state != FileState::RotationInProgress {
                self.set_state(FileState::RotationInProgress);
            }
        } else {
            self.previous_size = self.size;
            self.size = self.stat.size;
            self.update_bytes_unread();
        }
        Ok(())
    }

    /// Take the size from the open handle, which still names the rotated file.
    pub fn refresh_size_from_handle(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            self.size = file.metadata()?.len();
            self.update_bytes_unread();
        }
        Ok(())
    }

    fn set_stat(&mut self, stat: FileStat) {
        self.stat = stat;
        self.key = stat.id;
        self.size = stat.size;
        self.previous_size = stat.size;
        self.update_bytes_unread();
    }

    pub fn shrunk(&self) -> bool {
        self.size < self.bytes_read
    }

    pub fn grown(&self) -> bool {
        self.size > self.bytes_read
    }

    pub fn size_changed(&self) -> bool {
        self.size != self.bytes_read
    }

    /// Bytes that were on disk past the cursor when a truncation was noticed.
    pub fn bytes_lost_to_truncation(&self) -> u64 {
        if self.shrunk() {
            self.previous_size.saturating_sub(self.bytes_read)
        } else {
            0
        }
    }

    pub fn all_read(&self) -> bool {
        self.bytes_read >= self.size
    }

    /// Strictly older than `ignore_older` at `now`.
    pub fn file_ignorable_at(&self, now: SystemTime) -> bool {
        let Some(threshold) = self.config.ignore_older else {
            return false;
        };
        now.duration_since(self.stat.modified)
            .map(|age| age > threshold)
            .unwrap_or(false)
    }

    pub fn file_ignorable(&self) -> bool {
        self.file_ignorable_at(SystemTime::now())
    }

    pub fn file_can_close(&self) -> bool {
        self.config
            .close_older
            .is_some_and(|threshold| self.accessed_at.elapsed() > threshold)
    }

    pub fn file_closable(&self) -> bool {
        self.file_can_close() && self.all_read()
    }

    /// Where a brand new position record for this file starts.
    pub fn position_for_new_record(&self) -> u64 {
        if self.initial {
            match self.config.start_at {
                StartAt::Beginning => 0,
                StartAt::End => self.size,
            }
        } else {
            0
        }
    }

    fn set_state(&mut self, state: FileState) {
        if self.recent_states.len() == STATE_HISTORY_LEN {
            self.recent_states.pop_front();
        }
        self.recent_states.push_back(self.state);
        self.state = state;
    }

    pub fn activate(&mut self) {
        self.set_state(FileState::Active);
    }

    /// Stop reading until the size changes, as if read to the end.
    pub fn ignore(&mut self) {
        self.set_state(FileState::Ignored);
        self.bytes_read = self.size;
        self.bytes_unread = 0;
    }

    pub fn close(&mut self) {
        self.set_state(FileState::Closed);
    }

    pub fn watch(&mut self) {
        self.set_state(FileState::Watched);
    }

    pub fn unwatch(&mut self) {
        self.close_file();
        self.set_state(FileState::Unwatched);
    }

    pub fn delay_delete(&mut self) {
        self.set_state(FileState::DelayedDelete);
    }

    pub fn rotation_in_progress(&mut self) {
        self.set_state(FileState::RotationInProgress);
    }

    /// The path showed up again after a failed stat.
    pub fn file_at_path_found_again(&mut self) {
        let previous = self
            .recent_states
            .back()
            .copied()
            .filter(|s| *s != FileState::DelayedDelete)
            .unwrap_or(FileState::Watched);
        self.set_state(previous);
    }

    pub fn is_watched(&self) -> bool {
        self.state == FileState::Watched
    }

    pub fn is_active(&self) -> bool {
        self.state == FileState::Active
    }

    pub fn is_ignored(&self) -> bool {
        self.state == FileState::Ignored
    }

    pub fn is_closed(&self) -> bool {
        self.state == FileState::Closed
    }

    pub fn is_rotation_in_progress(&self) -> bool {
        self.state == FileState::RotationInProgress
    }

    pub fn is_delayed_delete(&self) -> bool {
        self.state == FileState::DelayedDelete
    }

    pub fn is_unwatched(&self) -> bool {
        self.state == FileState::Unwatched
    }

    pub fn open(&mut self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        self.file = Some(file);
        self.accessed_at = Instant::now();
        Ok(())
    }

    /// Release the handle. Buffered partial data is kept.
    pub fn close_file(&mut self) {
        self.file = None;
    }

    pub fn seek(&mut self, position: u64) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(position))?;
        }
        Ok(())
    }

    fn read_chunk(&mut self, amount: usize) -> io::Result<Vec<u8>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file is not open"))?;
        let mut buf = vec![0u8; amount];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        self.accessed_at = Instant::now();
        Ok(buf)
    }

    /// Read up to `amount` bytes and return the records they completed.
    /// `None` means the handle is at EOF.
    pub fn read_extract_records(&mut self, amount: usize) -> io::Result<Option<Vec<Bytes>>> {
        let data = self.read_chunk(amount)?;
        if data.is_empty() {
            return Ok(None);
        }
        let records = self.buffer.extract(&data);
        self.increment_bytes_read(data.len() as u64);
        Ok(Some(records))
    }

    /// Take the buffered partial record.
    pub fn flush_buffer(&mut self) -> Bytes {
        self.buffer.flush()
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    pub fn update_bytes_read(&mut self, position: u64) {
        self.bytes_read = position;
        self.update_bytes_unread();
    }

    pub fn increment_bytes_read(&mut self, delta: u64) {
        self.bytes_read += delta;
        self.update_bytes_unread();
    }

    fn update_bytes_unread(&mut self) {
        self.bytes_unread = self.size.saturating_sub(self.bytes_read);
    }

    /// Continue the stream under the file now at this path, from `position`.
    /// The handle is released and reopened by the next `create`.
    pub fn rotate_as_file(&mut self, position: u64) {
        self.set_standard_read_loop();
        self.close_file();
        self.buffer.clear();
        self.initial = false;
        self.recent_states.clear();
        let stat = self.stat;
        self.set_stat(stat);
        self.update_bytes_read(position);
        self.watch();
    }

    /// Take over the identity `previous` was reading, continuing from `position`.
    pub fn rotate_from(&mut self, previous: &WatchedFile, position: u64) {
        self.set_standard_read_loop();
        self.close_file();
        self.buffer.clear();
        self.initial = false;
        self.recent_states = previous.recent_states.clone();
        self.accessed_at = previous.accessed_at;
        let stat = self.stat;
        self.set_stat(stat);
        self.update_bytes_read(position);
        self.watch();
    }

    /// Read the remaining content in one go, used to drain a rotated handle.
    pub fn set_maximum_read_loop(&mut self) {
        self.read_loop_count = usize::MAX;
    }

    pub fn set_standard_read_loop(&mut self) {
        self.read_loop_count = self.config.file_chunk_count;
    }

    pub fn loop_control_adjusted_for_stat_size(&self) -> LoopControl {
        let to_read = self.size.saturating_sub(self.bytes_read);
        if to_read == 0 {
            return LoopControl::new(0, 0, false);
        }
        let chunk_size = self.config.file_chunk_size;
        let needed = to_read.div_ceil(chunk_size as u64);
        let count = needed.min(self.read_loop_count as u64);
        LoopControl::new(count as usize, chunk_size, needed > count)
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub fn set_listener(&mut self, observer: &mut dyn Observer) {
        self.listener = Some(observer.listener_for(&self.path));
    }

    /// Run `f` against the bound listener, if any.
    pub fn notify(&mut self, f: impl FnOnce(&mut dyn Listener)) {
        if let Some(listener) = self.listener.as_mut() {
            f(listener.as_mut());
        }
    }

    /// True at most once per `interval`.
    pub fn should_warn(&mut self, interval: Duration) -> bool {
        match self.last_warning_at {
            Some(at) if at.elapsed() < interval => false,
            _ => {
                self.last_warning_at = Some(Instant::now());
                true
            }
        }
    }
}

impl fmt::Debug for WatchedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedFile")
            .field("path", &self.path)
            .field("key", &self.key)
            .field("stat_key", &self.stat.id)
            .field("state", &self.state)
            .field("size", &self.size)
            .field("bytes_read", &self.bytes_read)
            .field("bytes_unread", &self.bytes_unread)
            .field("open", &self.file.is_some())
            .field("initial", &self.initial)
            .field("recent_states", &self.recent_states)
            .finish()
    }
}
