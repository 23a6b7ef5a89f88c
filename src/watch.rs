// SPDX-License-Identifier: Apache-2.0

//! The tick loop.
//!
//! [`Watch`] owns the discoverer, the registry, the position store and the
//! state processor behind one mutex. The thread running
//! [`Watch::subscribe`] is the steady-state mutator; other threads only come
//! in through [`Watch::watch`] and [`Watch::unwatch`], which take the same
//! lock and do a bounded amount of work.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use glob::Pattern;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::TailConfig;
use crate::discoverer::Discoverer;
use crate::error::{Error, Result};
use crate::listener::Observer;
use crate::position::PositionStore;
use crate::processor::{StateProcessor, Tick, create_processor};
use crate::registry::WatchedFiles;
use crate::watched_file::FileState;

/// Longest uninterrupted sleep between cancellation checks.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

struct WatchCore {
    discoverer: Discoverer,
    registry: WatchedFiles,
    store: PositionStore,
    processor: Box<dyn StateProcessor>,
}

/// Shared handle to one watch. Clones refer to the same state.
#[derive(Clone)]
pub struct Watch {
    config: Arc<TailConfig>,
    core: Arc<Mutex<WatchCore>>,
}

impl Watch {
    /// Validate `config`, load the position store and set up an empty watch.
    /// Patterns are added with [`Watch::watch`].
    pub fn new(config: Arc<TailConfig>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let discoverer = Discoverer::new(Arc::clone(&config))?;
        let store = PositionStore::open(Arc::clone(&config))?;
        let core = WatchCore {
            discoverer,
            registry: WatchedFiles::new(&config),
            store,
            processor: create_processor(&config),
        };

        Ok(Self {
            config,
            core: Arc::new(Mutex::new(core)),
        })
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, WatchCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a glob pattern and pick up what it matches right away.
    /// Returns the number of files added.
    pub fn watch(&self, pattern: &str) -> Result<usize> {
        let mut guard = self.lock();
        let core = &mut *guard;
        let added = core
            .discoverer
            .add_path(pattern, &mut core.registry, &mut core.store)?;
        debug!(pattern, added, "Watching pattern");
        Ok(added)
    }

    /// Stop watching a pattern and retire every file it matches.
    /// Returns the number of files retired.
    pub fn unwatch(&self, pattern: &str) -> Result<usize> {
        let matcher =
            Pattern::new(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;

        let mut guard = self.lock();
        let core = &mut *guard;
        core.discoverer.remove_path(pattern);

        let matching: Vec<PathBuf> = core
            .registry
            .paths()
            .filter(|p| matcher.matches_path(p))
            .map(Path::to_path_buf)
            .collect();
        for path in &matching {
            if let Some(file) = core.registry.get_mut(path) {
                let key = file.key();
                file.unwatch();
                core.store.unset_owner(&key, path);
            }
        }
        let retired = core.registry.remove_paths(&matching);
        debug!(pattern, retired, "Unwatched pattern");
        Ok(retired)
    }

    /// Re-expand every registered pattern. Returns the number of files added.
    pub fn discover(&self) -> usize {
        let mut guard = self.lock();
        let core = &mut *guard;
        let added = core.discoverer.discover(&mut core.registry, &mut core.store);
        if added > 0 {
            debug!(added, "Discovered new files");
        }
        added
    }

    /// Run one tick of the state machine. Returns the paths that left the
    /// watch during the tick.
    pub fn iterate_on_state(
        &self,
        observer: &mut dyn Observer,
        cancel: &CancellationToken,
    ) -> Vec<PathBuf> {
        let started = Instant::now();
        let mut guard = self.lock();
        let core = &mut *guard;

        let tick = Tick::new(
            &self.config,
            &mut core.registry,
            &mut core.store,
            observer,
            cancel,
        );
        let removed = core.processor.process_all_states(tick);
        if core.store.is_write_requested() {
            core.store.flush_at_interval();
        }

        trace!(
            elapsed = ?started.elapsed(),
            files = core.registry.len(),
            removed = removed.len(),
            "Tick complete"
        );
        removed
    }

    /// Run ticks until `cancel` fires, or in read mode with `exit_after_read`,
    /// until every file has been read. Open handles are closed on the way
    /// out; positions are not written, see [`Watch::write_positions`].
    pub fn subscribe(&self, observer: &mut dyn Observer, cancel: &CancellationToken) {
        info!(
            mode = ?self.config.mode,
            patterns = ?self.patterns(),
            stat_interval = ?self.config.stat_interval,
            discover_interval = self.config.discover_interval,
            "Starting watch"
        );

        let mut ticks: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                debug!("Cancellation received, stopping watch");
                break;
            }

            self.iterate_on_state(observer, cancel);
            if cancel.is_cancelled() {
                break;
            }
            if self.config.is_read_mode() && self.config.exit_after_read && self.is_empty() {
                info!("All files read, stopping watch");
                break;
            }

            ticks += 1;
            if ticks % self.config.discover_interval.max(1) == 0 {
                self.discover();
            }
            sleep_unless_cancelled(self.config.stat_interval, cancel);
        }

        self.close_all();
        info!("Watch stopped");
    }

    /// Write the position store now.
    pub fn write_positions(&self, reason: &str) {
        self.lock().store.write(reason);
    }

    /// Release every open handle.
    pub fn close_all(&self) {
        self.lock().registry.close_all();
    }

    pub fn patterns(&self) -> Vec<String> {
        self.lock().discoverer.patterns().to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().registry.is_empty()
    }

    pub fn file_state(&self, path: &Path) -> Option<FileState> {
        self.lock().registry.get(path).map(|f| f.state())
    }

    /// Stored position for the file currently at `path`.
    pub fn position(&self, path: &Path) -> Option<u64> {
        let core = self.lock();
        let key = core.registry.get(path)?.key();
        core.store.position(&key)
    }
}

fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
