// SPDX-License-Identifier: Apache-2.0

//! Per-tick state walk.
//!
//! Two processors exist, one per [`Mode`]. Each tick they work from one
//! ordered snapshot of the registry and run their phases in a fixed order.
//! A file is taken out of the registry while it is handled so the handler
//! can look at, and take over, the other entries.

mod read;
mod tail;

pub use read::ReadProcessor;
pub use tail::TailProcessor;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{Mode, TailConfig};
use crate::handlers::{HandlerContext, Transition, dispatch};
use crate::listener::Observer;
use crate::position::PositionStore;
use crate::registry::WatchedFiles;
use crate::watched_file::{FileState, WatchedFile};

/// Drives every watched file one step through its state machine.
pub trait StateProcessor: Send {
    /// Run one tick. Returns the paths removed from the registry.
    fn process_all_states(&mut self, tick: Tick<'_>) -> Vec<PathBuf>;
}

/// Build the processor for the configured mode.
pub fn create_processor(config: &TailConfig) -> Box<dyn StateProcessor> {
    match config.mode {
        Mode::Tail => Box::new(TailProcessor::new()),
        Mode::Read => Box::new(ReadProcessor::new()),
    }
}

/// What happens to a file after a phase has handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Keep,
    /// Drop from the registry at the end of the tick
    Remove,
}

/// Borrowed state for one tick.
pub struct Tick<'a> {
    config: &'a TailConfig,
    registry: &'a mut WatchedFiles,
    store: &'a mut PositionStore,
    observer: &'a mut dyn Observer,
    cancel: &'a CancellationToken,
    deletable: Vec<PathBuf>,
}

impl<'a> Tick<'a> {
    pub fn new(
        config: &'a TailConfig,
        registry: &'a mut WatchedFiles,
        store: &'a mut PositionStore,
        observer: &'a mut dyn Observer,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            observer,
            cancel,
            deletable: Vec::new(),
        }
    }

    fn quit(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle the file at `path` if it is still registered and `select`
    /// accepts it. Returns whether it was handled.
    fn visit(
        &mut self,
        path: &Path,
        select: impl Fn(&WatchedFile) -> bool,
        handle: impl FnOnce(&mut WatchedFile, &mut HandlerContext<'_>) -> Disposition,
    ) -> bool {
        if !self.registry.get(path).is_some_and(&select) {
            return false;
        }
        let Some(mut file) = self.registry.take(path) else {
            return false;
        };

        let mut ctx = HandlerContext {
            config: self.config,
            registry: &mut *self.registry,
            store: &mut *self.store,
            observer: &mut *self.observer,
            cancel: self.cancel,
        };
        let disposition = handle(&mut file, &mut ctx);

        if disposition == Disposition::Remove {
            self.deletable.push(file.path().to_path_buf());
        }
        self.registry.restore(file);
        true
    }

    /// Drop everything marked for removal during the tick.
    fn finish(self) -> Vec<PathBuf> {
        let removed = self.registry.remove_paths(&self.deletable);
        if removed > 0 {
            debug!(removed, "Removed files from the watch");
        }
        self.deletable
    }
}

/// Re-stat, moving a vanished file to `delayed_delete` instead of dropping it.
fn restat_with_delay(file: &mut WatchedFile, config: &TailConfig, phase: &str) -> bool {
    match file.restat() {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(phase, path = ?file.path(), "Stat failed, delaying delete");
            file.delay_delete();
            false
        }
        Err(e) => {
            stat_error(file, config, phase, &e);
            false
        }
    }
}

/// Re-stat, dropping a vanished file right away.
fn restat_or_delete(
    file: &mut WatchedFile,
    ctx: &mut HandlerContext<'_>,
    phase: &str,
) -> Result<(), Disposition> {
    match file.restat() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(phase, path = ?file.path(), "Stat failed, removing from the watch");
            Err(deleted(file, ctx))
        }
        Err(e) => {
            stat_error(file, ctx.config, phase, &e);
            Err(Disposition::Keep)
        }
    }
}

fn deleted(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) -> Disposition {
    dispatch(Transition::Delete, file, ctx);
    file.unwatch();
    Disposition::Remove
}

fn stat_error(file: &mut WatchedFile, config: &TailConfig, phase: &str, e: &io::Error) {
    if file.should_warn(config.open_warn_interval) {
        error!(phase, path = ?file.path(), error = %e, "Failed to stat file");
    } else {
        debug!(phase, path = ?file.path(), error = %e, "Failed to stat file, warning suppressed");
    }
}

/// Promote up to the free `max_active` slots worth of watched files.
/// `promote` is called for each, in snapshot order.
fn promote_watched(
    tick: &mut Tick<'_>,
    snapshot: &[PathBuf],
    last_warning: &mut Option<Instant>,
    mut promote: impl FnMut(&mut WatchedFile, &mut HandlerContext<'_>) -> Disposition,
) {
    let max_active = tick.config.effective_max_active();
    // delayed deletes still hold their handle for a tick
    let open = tick.registry.count_open();
    let to_take = max_active.saturating_sub(open);

    if to_take == 0 {
        let waiting = tick.registry.count_in_state(FileState::Watched);
        let due = last_warning.is_none_or(|at| at.elapsed() > tick.config.max_files_warn_interval);
        if waiting > 0 && due {
            warn!(
                max_active,
                waiting,
                "Reached the open files limit, increase max_active to read more files at once"
            );
            *last_warning = Some(Instant::now());
        }
        return;
    }

    let mut taken = 0;
    for path in snapshot {
        if taken == to_take || tick.quit() {
            break;
        }
        if tick.visit(path, WatchedFile::is_watched, &mut promote) {
            taken += 1;
        }
    }
}
