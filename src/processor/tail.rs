// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::{
    Disposition, StateProcessor, Tick, deleted, promote_watched, restat_with_delay, stat_error,
};
use crate::handlers::{HandlerContext, Transition, dispatch, drain, take_live};
use crate::watched_file::WatchedFile;

/// Streaming mode: follow files as they grow and rotate.
///
/// Phases, in order: closed, ignored, delayed delete, restat, rotation,
/// watched, active.
#[derive(Debug, Default)]
pub struct TailProcessor {
    last_max_files_warning: Option<Instant>,
}

impl TailProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn process_closed(&self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Closed processing");
        for path in snapshot {
            if tick.quit() {
                break;
            }
            tick.visit(path, WatchedFile::is_closed, |file, ctx| {
                if restat_with_delay(file, ctx.config, "closed")
                    && !file.is_rotation_in_progress()
                    && file.size_changed()
                {
                    trace!(path = ?file.path(), "Closed file changed size, watching again");
                    file.watch();
                }
                Disposition::Keep
            });
        }
    }

    fn process_ignored(&self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Ignored processing");
        for path in snapshot {
            if tick.quit() {
                break;
            }
            tick.visit(path, WatchedFile::is_ignored, |file, ctx| {
                if restat_with_delay(file, ctx.config, "ignored")
                    && !file.is_rotation_in_progress()
                    && file.size_changed()
                {
                    file.watch();
                    dispatch(Transition::Unignore, file, ctx);
                }
                Disposition::Keep
            });
        }
    }

    /// Second stat after a miss: the file is back, has been replaced, or is gone.
    fn process_delayed_delete(&self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Delayed delete processing");
        for path in snapshot {
            if tick.quit() {
                break;
            }
            tick.visit(path, WatchedFile::is_delayed_delete, |file, ctx| {
                match file.restat() {
                    Ok(()) => {
                        if !file.is_rotation_in_progress() {
                            debug!(path = ?file.path(), "File found again after a failed stat");
                            file.file_at_path_found_again();
                        }
                        Disposition::Keep
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(path = ?file.path(), "Stat failed twice, removing from the watch");
                        deleted(file, ctx)
                    }
                    Err(e) => {
                        stat_error(file, ctx.config, "delayed_delete", &e);
                        Disposition::Keep
                    }
                }
            });
        }
    }

    /// Stat watched and active files so rotation is noticed before reading.
    fn process_restat(&self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Restat processing");
        for path in snapshot {
            if tick.quit() {
                break;
            }
            tick.visit(
                path,
                |f| f.is_watched() || f.is_active(),
                |file, ctx| {
                    restat_with_delay(file, ctx.config, "restat");
                    Disposition::Keep
                },
            );
        }
    }

    fn process_rotation(&self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Rotation in progress processing");
        for path in snapshot {
            if tick.quit() {
                break;
            }
            tick.visit(path, WatchedFile::is_rotation_in_progress, |file, ctx| {
                // finish the old content before the path moves on
                drain(file, ctx);
                let transition = rotation_transition(file, ctx);
                debug!(
                    path = ?file.path(),
                    from = %file.key(),
                    to = %file.stat_key(),
                    transition = transition.name(),
                    "Rotation detected"
                );
                dispatch(transition, file, ctx);
                Disposition::Keep
            });
        }
    }

    fn process_watched(&mut self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Watched processing");
        promote_watched(
            tick,
            snapshot,
            &mut self.last_max_files_warning,
            |file, ctx| {
                file.activate();
                let transition = if file.is_initial() {
                    Transition::CreateInitial
                } else {
                    Transition::Create
                };
                dispatch(transition, file, ctx);
                Disposition::Keep
            },
        );
    }

    fn process_active(&self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Active processing");
        for path in snapshot {
            if tick.quit() {
                break;
            }
            tick.visit(path, WatchedFile::is_active, |file, ctx| {
                trace!(
                    path = ?file.path(),
                    file_id = %file.key(),
                    size = file.size(),
                    read = file.bytes_read(),
                    unread = file.bytes_unread(),
                    "Active file"
                );
                if file.grown() {
                    dispatch(Transition::Grow, file, ctx);
                } else if file.shrunk() {
                    let lost = file.bytes_lost_to_truncation();
                    if lost > 0 {
                        warn!(
                            path = ?file.path(),
                            unread_bytes = lost,
                            "File truncated with unread bytes, they will not be read"
                        );
                    }
                    debug!(
                        path = ?file.path(),
                        size = file.size(),
                        read = file.bytes_read(),
                        "File shrunk"
                    );
                    dispatch(Transition::Shrink, file, ctx);
                }

                if file.file_closable() {
                    debug!(path = ?file.path(), "File idle past close_older, closing");
                    dispatch(Transition::Timeout, file, ctx);
                    file.close();
                }
                Disposition::Keep
            });
        }
    }
}

/// Decide how the path continues after its identity changed.
fn rotation_transition(file: &WatchedFile, ctx: &mut HandlerContext<'_>) -> Transition {
    let new_key = file.stat_key();
    let Some(record) = ctx.store.get(&new_key) else {
        return Transition::RotateAsFile { position: None };
    };
    let position = record.position();
    let owner = record.owner().map(Path::to_path_buf);

    match owner {
        Some(owner) if owner != file.path() => match take_live(ctx.registry, &owner, new_key) {
            Some(previous) => Transition::RotateFrom {
                previous: Box::new(previous),
            },
            None => Transition::RotateAsFile {
                position: Some(position),
            },
        },
        _ => Transition::RotateAsFile {
            position: Some(position),
        },
    }
}

impl StateProcessor for TailProcessor {
    fn process_all_states(&mut self, mut tick: Tick<'_>) -> Vec<PathBuf> {
        let snapshot = tick.registry.snapshot();

        self.process_closed(&mut tick, &snapshot);
        if !tick.quit() {
            self.process_ignored(&mut tick, &snapshot);
        }
        if !tick.quit() {
            self.process_delayed_delete(&mut tick, &snapshot);
        }
        if !tick.quit() {
            self.process_restat(&mut tick, &snapshot);
        }
        if !tick.quit() {
            self.process_rotation(&mut tick, &snapshot);
        }
        if !tick.quit() {
            self.process_watched(&mut tick, &snapshot);
        }
        if !tick.quit() {
            self.process_active(&mut tick, &snapshot);
        }

        tick.finish()
    }
}
