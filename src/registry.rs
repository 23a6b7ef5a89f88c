// SPDX-License-Identifier: Apache-2.0

//! The set of watched files, keyed by path.
//!
//! Only discovery inserts and only the state processor removes. Each tick
//! works from a [`WatchedFiles::snapshot`], an ordered list of paths taken
//! before any phase runs; entries are looked up again by path as they are
//! processed so that hand-offs made earlier in the tick are visible.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::config::{SortBy, SortDirection, TailConfig};
use crate::watched_file::{FileState, WatchedFile};

#[derive(Debug)]
pub struct WatchedFiles {
    files: HashMap<PathBuf, WatchedFile>,
    sort_by: SortBy,
    sort_direction: SortDirection,
}

impl WatchedFiles {
    pub fn new(config: &TailConfig) -> Self {
        Self {
            files: HashMap::new(),
            sort_by: config.sort_by,
            sort_direction: config.sort_direction,
        }
    }

    /// Insert, replacing any entry for the same path.
    pub fn add(&mut self, file: WatchedFile) -> Option<WatchedFile> {
        trace!(path = ?file.path(), state = %file.state(), "Adding watched file");
        self.files.insert(file.path().to_path_buf(), file)
    }

    pub fn get(&self, path: &Path) -> Option<&WatchedFile> {
        self.files.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut WatchedFile> {
        self.files.get_mut(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Take an entry out, for hand-off or to process it alongside the rest.
    pub fn take(&mut self, path: &Path) -> Option<WatchedFile> {
        self.files.remove(path)
    }

    /// Put back an entry obtained with [`WatchedFiles::take`].
    pub fn restore(&mut self, file: WatchedFile) {
        self.files.insert(file.path().to_path_buf(), file);
    }

    /// Drop entries for the given paths, returning how many were present.
    pub fn remove_paths(&mut self, paths: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in paths {
            if self.files.remove(path).is_some() {
                trace!(path = ?path, "Removed watched file");
                removed += 1;
            }
        }
        removed
    }

    /// Paths ordered by the configured sort key and direction.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        let mut entries: Vec<&WatchedFile> = self.files.values().collect();
        entries.sort_by(|a, b| {
            let ord = match self.sort_by {
                SortBy::LastModified => a
                    .modified_at()
                    .cmp(&b.modified_at())
                    .then_with(|| a.path().cmp(b.path())),
                SortBy::Path => a.path().cmp(b.path()),
            };
            match self.sort_direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        entries.into_iter().map(|f| f.path().to_path_buf()).collect()
    }

    /// Entries holding an open handle, whatever their state, plus active
    /// entries about to open one.
    pub fn count_open(&self) -> usize {
        self.files
            .values()
            .filter(|f| f.is_open() || f.is_active())
            .count()
    }

    pub fn count_in_state(&self, state: FileState) -> usize {
        self.files.values().filter(|f| f.state() == state).count()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(|p| p.as_path())
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Release every open handle.
    pub fn close_all(&mut self) {
        for file in self.files.values_mut() {
            file.close_file();
        }
    }
}
