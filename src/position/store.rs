// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::identity::FileId;
use crate::position::record::{PositionRecord, now_epoch_seconds};
use crate::position::serializer::RecordSerializer;
use crate::registry::WatchedFiles;
use crate::watched_file::WatchedFile;

/// Outcome of binding a newly discovered file to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    /// No record for this identity; one is created when the file is opened
    Unmatched,
    /// An unowned record was taken over and its offset copied into the file
    Adopted,
    /// Another live entry is still reading this identity; left to the hand-off
    Deferred,
    /// Record belonged to a different path; dropped so a new one is written
    Collision,
    /// Read mode: the record already covers the whole file
    Consumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMethod {
    /// Write a temp file next to the target and rename it over
    Atomic,
    /// Truncate and rewrite the target
    InPlace,
}

pub struct PositionStore {
    config: Arc<TailConfig>,
    path: PathBuf,
    records: HashMap<FileId, PositionRecord>,
    serializer: RecordSerializer,
    write_method: WriteMethod,
    last_write: Option<Instant>,
    write_requested: bool,
}

impl PositionStore {
    /// Open the store at the configured path, loading any records it holds.
    pub fn open(config: Arc<TailConfig>) -> Result<Self> {
        let path = config.position_store_path.clone();
        let write_method = if is_special_device(&path) {
            WriteMethod::InPlace
        } else {
            WriteMethod::Atomic
        };

        if write_method == WriteMethod::Atomic {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).map_err(|e| {
                        Error::Persistence(format!(
                            "failed to create position store directory: {}",
                            e
                        ))
                    })?;
                }
            }
        }

        let mut store = Self {
            serializer: RecordSerializer::new(config.position_retention),
            config,
            path,
            records: HashMap::new(),
            write_method,
            last_write: None,
            write_requested: false,
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<()> {
        if self.write_method == WriteMethod::InPlace || !self.path.is_file() {
            debug!(path = ?self.path, "No position store to load, starting fresh");
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|e| {
            Error::Persistence(format!("failed to open position store: {}", e))
        })?;
        let entries = self
            .serializer
            .deserialize(BufReader::new(file))
            .map_err(|e| Error::Persistence(format!("failed to read position store: {}", e)))?;

        let opened_at = now_epoch_seconds();
        let retention = self.config.position_retention;
        let mut expired = 0;
        for (key, record) in entries {
            if record.is_expired(retention, opened_at) {
                trace!(file_id = %key, "Dropping expired position record");
                expired += 1;
                continue;
            }
            self.records.insert(key, record);
        }

        info!(
            path = ?self.path,
            loaded = self.records.len(),
            expired,
            "Loaded position store"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind a newly discovered file to any record sharing its identity.
    pub fn associate(&mut self, file: &mut WatchedFile, registry: &WatchedFiles) -> Association {
        let key = file.key();
        let Some(record) = self.records.get_mut(&key) else {
            trace!(path = ?file.path(), file_id = %key, "associate: unmatched");
            return Association::Unmatched;
        };

        match record.owner() {
            None => {
                if let Some(hint) = record.path_hint() {
                    if hint != file.path() {
                        debug!(
                            path = ?file.path(),
                            stored_path = ?hint,
                            file_id = %key,
                            "associate: identity recorded for another path, treating as a new file"
                        );
                        self.records.remove(&key);
                        return Association::Collision;
                    }
                }

                if self.config.is_read_mode() && record.position() >= file.size() {
                    trace!(path = ?file.path(), "associate: already consumed");
                    return Association::Consumed;
                }

                file.update_bytes_read(record.position());
                record.set_owner(file.path());
                file.initial_completed();
                if file.all_read() {
                    file.ignore();
                }
                trace!(
                    path = ?file.path(),
                    position = record.position(),
                    "associate: adopted record"
                );
                Association::Adopted
            }
            Some(owner) if owner == file.path() => Association::Adopted,
            Some(owner) => {
                let live = registry.get(owner).is_some_and(|o| {
                    o.key() == key
                        && !o.is_unwatched()
                        && (o.is_open() || o.is_rotation_in_progress() || o.is_delayed_delete())
                });
                if live {
                    debug!(
                        path = ?file.path(),
                        owner = ?owner,
                        file_id = %key,
                        "associate: identity still being read under its old path, deferring"
                    );
                    file.initial_completed();
                    Association::Deferred
                } else {
                    debug!(
                        path = ?file.path(),
                        owner = ?owner,
                        file_id = %key,
                        "associate: stale owner, dropping record"
                    );
                    self.delete(&key);
                    Association::Collision
                }
            }
        }
    }

    pub fn get(&self, key: &FileId) -> Option<&PositionRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &FileId) -> bool {
        self.records.contains_key(key)
    }

    pub fn position(&self, key: &FileId) -> Option<u64> {
        self.records.get(key).map(|r| r.position())
    }

    pub fn set(&mut self, key: FileId, record: PositionRecord) {
        self.records.insert(key, record);
    }

    pub fn delete(&mut self, key: &FileId) -> Option<PositionRecord> {
        self.records.remove(key)
    }

    pub fn increment(&mut self, key: &FileId, delta: u64) {
        if let Some(record) = self.records.get_mut(key) {
            record.increment_position(delta);
        }
    }

    pub fn store_last_read(&mut self, key: &FileId, position: u64) {
        if let Some(record) = self.records.get_mut(key) {
            record.update_position(position);
        }
    }

    pub fn set_owner(&mut self, key: &FileId, path: &Path) {
        if let Some(record) = self.records.get_mut(key) {
            record.set_owner(path);
        }
    }

    /// Unbind `path` from the record, leaving the record to whoever owns it otherwise.
    pub fn unset_owner(&mut self, key: &FileId, path: &Path) {
        if let Some(record) = self.records.get_mut(key) {
            if record.owner() == Some(path) {
                record.unset_owner();
            }
        }
    }

    pub fn reading_completed(&mut self, key: &FileId, path: &Path, position: u64) {
        if let Some(record) = self.records.get_mut(key) {
            record.reading_completed(path, position);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FileId> {
        self.records.keys()
    }

    /// Write if the write interval has passed since the last write.
    pub fn request_flush(&mut self) {
        self.write_requested = true;
        self.flush_at_interval();
    }

    pub fn flush_at_interval(&mut self) {
        let due = self
            .last_write
            .is_none_or(|at| at.elapsed() >= self.config.position_write_interval);
        if due {
            self.write("interval");
        }
    }

    pub fn is_write_requested(&self) -> bool {
        self.write_requested
    }

    /// Write immediately. Failures are logged and retried on the next flush.
    pub fn write(&mut self, reason: &str) {
        debug!(path = ?self.path, reason, records = self.records.len(), "Writing position store");
        let as_of = now_epoch_seconds();

        if let Err(e) = self.write_records(as_of) {
            warn!(path = ?self.path, error = %e, "Failed to write position store");
            return;
        }

        let expired: Vec<FileId> = self.serializer.expired_keys().to_vec();
        for key in expired {
            trace!(file_id = %key, "Removing expired position record");
            self.records.remove(&key);
        }
        self.last_write = Some(Instant::now());
        self.write_requested = false;
    }

    fn write_records(&mut self, as_of: f64) -> io::Result<()> {
        match self.write_method {
            WriteMethod::InPlace => self.in_place_write(as_of),
            WriteMethod::Atomic => match self.atomic_write(as_of) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    warn!(
                        path = ?self.path,
                        error = %e,
                        "Unable to write position store atomically, falling back to in-place writes"
                    );
                    self.write_method = WriteMethod::InPlace;
                    self.in_place_write(as_of)
                }
                Err(e) => {
                    warn!(
                        path = ?self.path,
                        error = %e,
                        "Unable to write position store atomically, attempting in-place write"
                    );
                    self.in_place_write(as_of)
                }
            },
        }
    }

    /// Write to a temp file, then rename it over the target.
    fn atomic_write(&mut self, as_of: f64) -> io::Result<()> {
        use portable_atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_path = self
            .path
            .with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

        let result = (|| {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            self.serializer.serialize(&self.records, &mut writer, as_of)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            drop(writer);
            fs::rename(&temp_path, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn in_place_write(&mut self, as_of: f64) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        self.serializer.serialize(&self.records, &mut writer, as_of)?;
        writer.flush()
    }
}

/// Character and block devices cannot be renamed over.
#[cfg(unix)]
fn is_special_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    fs::metadata(path)
        .map(|m| m.file_type().is_char_device() || m.file_type().is_block_device())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_special_device(_path: &Path) -> bool {
    false
}
