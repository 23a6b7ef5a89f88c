// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, trace};

use super::{Disposition, StateProcessor, Tick, promote_watched, restat_or_delete};
use crate::handlers::{HandlerContext, Transition, dispatch};
use crate::watched_file::WatchedFile;

/// Batch mode: read every file once, to its end, then forget it.
#[derive(Debug, Default)]
pub struct ReadProcessor {
    last_max_files_warning: Option<Instant>,
}

impl ReadProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn process_watched(&mut self, tick: &mut Tick<'_>, snapshot: &[PathBuf]) {
        trace!("Watched processing");
        promote_watched(
            tick,
            snapshot,
            &mut self.last_max_files_warning,
            |file, ctx| {
                if let Err(disposition) = restat(file, ctx, "watched") {
                    return disposition;
                }
                file.activate();
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
                if let Err(disposition) = restat(file, ctx, "active") {
                    return disposition;
                }
                let transition = if file.is_compressed() {
                    Transition::ReadCompressedFile
                } else {
                    Transition::ReadFile
                };
                dispatch(transition, file, ctx);

                // abandoned archives stay registered so discovery skips them,
                // unless the watch is about to exit
                if file.is_unwatched() && (file.all_read() || ctx.config.exit_after_read) {
                    Disposition::Remove
                } else {
                    Disposition::Keep
                }
            });
        }
    }
}

/// Stat the file. A file replaced under its path is dropped and left for
/// discovery to pick up as new.
fn restat(
    file: &mut WatchedFile,
    ctx: &mut HandlerContext<'_>,
    phase: &str,
) -> Result<(), Disposition> {
    restat_or_delete(file, ctx, phase)?;
    if file.rotation_detected() {
        debug!(
            phase,
            path = ?file.path(),
            from = %file.key(),
            to = %file.stat_key(),
            "Another file now lives at this path, dropping it from the watch"
        );
        ctx.store.unset_owner(&file.key(), file.path());
        file.unwatch();
        return Err(Disposition::Remove);
    }
    Ok(())
}

impl StateProcessor for ReadProcessor {
    fn process_all_states(&mut self, mut tick: Tick<'_>) -> Vec<PathBuf> {
        let snapshot = tick.registry.snapshot();

        self.process_watched(&mut tick, &snapshot);
        if !tick.quit() {
            self.process_active(&mut tick, &snapshot);
        }

        tick.finish()
    }
}
