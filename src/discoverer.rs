// SPDX-License-Identifier: Apache-2.0

//! Glob expansion and registration of newly found files.

use std::path::Path;
use std::sync::Arc;

use glob::Pattern;
use tracing::{debug, trace, warn};

use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::position::{Association, PositionStore};
use crate::registry::WatchedFiles;
use crate::stat::{self, FileStat};
use crate::watched_file::WatchedFile;

/// Expands the watched patterns and feeds new files into the registry.
#[derive(Debug)]
pub struct Discoverer {
    config: Arc<TailConfig>,
    watching: Vec<String>,
    exclude: Vec<Pattern>,
}

impl Discoverer {
    pub fn new(config: Arc<TailConfig>) -> Result<Self> {
        let exclude = config
            .exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            watching: Vec::new(),
            exclude,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.watching
    }

    /// Register `pattern` and expand it right away. Registering a pattern
    /// twice does nothing. Returns the number of files added.
    pub fn add_path(
        &mut self,
        pattern: &str,
        registry: &mut WatchedFiles,
        store: &mut PositionStore,
    ) -> Result<usize> {
        if self.watching.iter().any(|p| p == pattern) {
            return Ok(0);
        }
        Pattern::new(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;

        self.watching.push(pattern.to_string());
        Ok(self.discover_any_files(pattern, false, registry, store))
    }

    /// Forget `pattern`. Files it found stay until the caller retires them.
    pub fn remove_path(&mut self, pattern: &str) -> bool {
        let before = self.watching.len();
        self.watching.retain(|p| p != pattern);
        self.watching.len() != before
    }

    /// Re-expand every registered pattern. Returns the number of files added.
    pub fn discover(&self, registry: &mut WatchedFiles, store: &mut PositionStore) -> usize {
        self.watching
            .iter()
            .map(|pattern| self.discover_any_files(pattern, true, registry, store))
            .sum()
    }

    /// Exclusions match the file name only.
    pub fn can_exclude(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.exclude.iter().any(|p| p.matches(name))
    }

    fn discover_any_files(
        &self,
        pattern: &str,
        ongoing: bool,
        registry: &mut WatchedFiles,
        store: &mut PositionStore,
    ) -> usize {
        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pattern, error = %e, "Invalid glob pattern");
                return 0;
            }
        };

        let mut added = 0;
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!(pattern, error = %e, "Skipping unreadable glob entry");
                    continue;
                }
            };

            if registry.contains(&path) || !stat::is_regular_file(&path) {
                continue;
            }
            if self.can_exclude(&path) {
                trace!(path = ?path, "Excluding file");
                continue;
            }

            let stat = match FileStat::from_path(&path) {
                Ok(stat) => stat,
                Err(e) => {
                    debug!(path = ?path, error = %e, "Unable to stat discovered file");
                    continue;
                }
            };

            let mut file = WatchedFile::new(path, stat, Arc::clone(&self.config));
            if ongoing {
                // found after startup, so read from the start whatever start_at says
                file.initial_completed();
            }

            if store.associate(&mut file, registry) == Association::Consumed {
                continue;
            }

            if file.file_ignorable() {
                debug!(
                    path = ?file.path(),
                    ignore_older = ?self.config.ignore_older,
                    "Skipping file because it is too old"
                );
                file.ignore();
            }

            debug!(path = ?file.path(), file_id = %file.key(), state = %file.state(), "Discovered file");
            registry.add(file);
            added += 1;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::position::PositionRecord;
    use crate::watched_file::FileState;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        config: Arc<TailConfig>,
        registry: WatchedFiles,
        store: PositionStore,
    }

    fn fixture(config: TailConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(TailConfig {
            position_store_path: dir.path().join("positions"),
            ..config
        });
        let registry = WatchedFiles::new(&config);
        let store = PositionStore::open(Arc::clone(&config)).unwrap();
        Fixture {
            dir,
            config,
            registry,
            store,
        }
    }

    fn pattern(f: &Fixture) -> String {
        format!("{}/*.log", f.dir.path().display())
    }

    #[test]
    fn test_add_path_expands_immediately() {
        let mut f = fixture(TailConfig::default());
        fs::write(f.dir.path().join("a.log"), b"a\n").unwrap();
        fs::write(f.dir.path().join("b.log"), b"b\n").unwrap();
        fs::write(f.dir.path().join("c.txt"), b"c\n").unwrap();
        fs::create_dir(f.dir.path().join("dir.log")).unwrap();

        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        let added = discoverer
            .add_path(&pattern(&f), &mut f.registry, &mut f.store)
            .unwrap();

        assert_eq!(added, 2);
        assert!(f.registry.iter().all(|wf| wf.is_watched() && wf.is_initial()));
    }

    #[test]
    fn test_add_path_is_idempotent() {
        let mut f = fixture(TailConfig::default());
        fs::write(f.dir.path().join("a.log"), b"a\n").unwrap();
        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();

        discoverer
            .add_path(&pattern(&f), &mut f.registry, &mut f.store)
            .unwrap();
        let again = discoverer
            .add_path(&pattern(&f), &mut f.registry, &mut f.store)
            .unwrap();

        assert_eq!(again, 0);
        assert_eq!(discoverer.patterns().len(), 1);
    }

    #[test]
    fn test_discover_twice_creates_no_duplicates() {
        let mut f = fixture(TailConfig::default());
        fs::write(f.dir.path().join("a.log"), b"a\n").unwrap();
        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        discoverer
            .add_path(&pattern(&f), &mut f.registry, &mut f.store)
            .unwrap();

        assert_eq!(discoverer.discover(&mut f.registry, &mut f.store), 0);
        assert_eq!(discoverer.discover(&mut f.registry, &mut f.store), 0);
        assert_eq!(f.registry.len(), 1);
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_later_discoveries_are_not_initial() {
        let mut f = fixture(TailConfig::default());
        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        discoverer
            .add_path(&pattern(&f), &mut f.registry, &mut f.store)
            .unwrap();
        assert!(f.registry.is_empty());

        fs::write(f.dir.path().join("late.log"), b"late\n").unwrap();
        assert_eq!(discoverer.discover(&mut f.registry, &mut f.store), 1);
        let wf = f.registry.get(&f.dir.path().join("late.log")).unwrap();
        assert!(!wf.is_initial());
    }

    #[test]
    fn test_exclude_matches_file_name_only() {
        let mut f = fixture(TailConfig {
            exclude: vec!["*.gz".to_string(), "debug-*".to_string()],
            ..Default::default()
        });
        for name in ["app.log", "debug-app.log", "old.log.gz"] {
            fs::write(f.dir.path().join(name), b"x\n").unwrap();
        }

        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        discoverer
            .add_path(
                &format!("{}/*", f.dir.path().display()),
                &mut f.registry,
                &mut f.store,
            )
            .unwrap();

        // positions file is not created until the first write
        let names: Vec<_> = f.registry.paths().map(|p| p.to_path_buf()).collect();
        assert_eq!(names, vec![f.dir.path().join("app.log")]);
        assert!(!discoverer.can_exclude(Path::new("/debug-dir/app.log")));
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        let config = Arc::new(TailConfig {
            exclude: vec!["[".to_string()],
            ..Default::default()
        });
        assert!(matches!(Discoverer::new(config), Err(Error::InvalidGlob(_))));

        let mut f = fixture(TailConfig::default());
        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        let err = discoverer
            .add_path("/tmp/[", &mut f.registry, &mut f.store)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGlob(_)));
        assert!(discoverer.patterns().is_empty());
    }

    #[test]
    fn test_old_files_are_ignored_at_size() {
        let mut f = fixture(TailConfig {
            ignore_older: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let old = f.dir.path().join("old.log");
        fs::write(&old, b"old content\n").unwrap();
        let file = fs::File::options().write(true).open(&old).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(file);
        fs::write(f.dir.path().join("new.log"), b"new\n").unwrap();

        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        discoverer
            .add_path(&pattern(&f), &mut f.registry, &mut f.store)
            .unwrap();

        let wf = f.registry.get(&old).unwrap();
        assert_eq!(wf.state(), FileState::Ignored);
        assert_eq!(wf.bytes_read(), 12);
        assert!(f.registry.get(&f.dir.path().join("new.log")).unwrap().is_watched());
    }

    #[test]
    fn test_read_mode_skips_consumed_files() {
        let mut f = fixture(TailConfig {
            mode: Mode::Read,
            ..Default::default()
        });
        let done = f.dir.path().join("done.log");
        fs::write(&done, b"done\n").unwrap();
        let key = FileStat::from_path(&done).unwrap().id;
        f.store.set(key, PositionRecord::new(5));

        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        let added = discoverer
            .add_path(&pattern(&f), &mut f.registry, &mut f.store)
            .unwrap();

        assert_eq!(added, 0);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_remove_path() {
        let f = fixture(TailConfig::default());
        let mut discoverer = Discoverer::new(Arc::clone(&f.config)).unwrap();
        assert!(!discoverer.remove_path("nope"));
        discoverer.watching.push("x".to_string());
        assert!(discoverer.remove_path("x"));
    }
}
