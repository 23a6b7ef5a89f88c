// SPDX-License-Identifier: Apache-2.0

//! Text encoding of the position store.
//!
//! One record per line:
//!
//! ```text
//! <inode> <dev_major> <dev_minor> <position> [<last_changed_at> [<path>]]
//! ```
//!
//! Lines with only the first four fields come from older writers; they are
//! accepted and stamped with the load time. The path is the remainder of the
//! line and may contain spaces.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::identity::FileId;
use crate::position::record::{PositionRecord, now_epoch_seconds};

pub fn serialize_record(key: &FileId, record: &PositionRecord) -> String {
    match record.serialized_path() {
        Some(path) => format!(
            "{} {} {} {}\n",
            key,
            record.position(),
            record.last_changed_at(),
            path.display()
        ),
        None => format!(
            "{} {} {}\n",
            key,
            record.position(),
            record.last_changed_at()
        ),
    }
}

/// Parse one line, returning `None` for anything malformed.
pub fn parse_record(line: &str) -> Option<(FileId, PositionRecord)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(6, ' ');

    let ino = parts.next()?.parse::<u64>().ok()?;
    let dev_major = parts.next()?.parse::<u32>().ok()?;
    let dev_minor = parts.next()?.parse::<u32>().ok()?;
    let position = parts.next()?.parse::<u64>().ok()?;
    let key = FileId::new(ino, dev_major, dev_minor);

    let record = match parts.next() {
        None => PositionRecord::restored(position, now_epoch_seconds(), None),
        Some(ts) => {
            let last_changed_at = ts.parse::<f64>().ok()?;
            let path_hint = parts
                .next()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from);
            PositionRecord::restored(position, last_changed_at, path_hint)
        }
    };
    Some((key, record))
}

/// Writes the store, leaving out and remembering records past retention.
#[derive(Debug)]
pub struct RecordSerializer {
    retention: Duration,
    expired_keys: Vec<FileId>,
}

impl RecordSerializer {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            expired_keys: Vec::new(),
        }
    }

    pub fn serialize<W: Write>(
        &mut self,
        records: &HashMap<FileId, PositionRecord>,
        out: &mut W,
        as_of: f64,
    ) -> io::Result<()> {
        self.expired_keys.clear();
        let mut keys: Vec<&FileId> = records.keys().collect();
        keys.sort();

        for key in keys {
            let record = &records[key];
            if record.is_expired(self.retention, as_of) {
                self.expired_keys.push(*key);
                continue;
            }
            out.write_all(serialize_record(key, record).as_bytes())?;
        }
        Ok(())
    }

    /// Keys skipped by the last [`RecordSerializer::serialize`].
    pub fn expired_keys(&self) -> &[FileId] {
        &self.expired_keys
    }

    pub fn deserialize<R: BufRead>(&self, reader: R) -> io::Result<Vec<(FileId, PositionRecord)>> {
        let mut records = Vec::new();
        for line in reader.split(b'\n') {
            let line = line?;
            let line = String::from_utf8_lossy(&line);
            if line.trim().is_empty() {
                continue;
            }
            match parse_record(&line) {
                Some(entry) => records.push(entry),
                None => debug!(line = %line, "Skipping malformed position record"),
            }
        }
        Ok(records)
    }
}
