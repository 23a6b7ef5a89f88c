// SPDX-License-Identifier: Apache-2.0

//! Transition handlers.
//!
//! The state processor decides *that* a file changed and hands the decision
//! over as a [`Transition`]. [`dispatch`] selects the handler with one
//! exhaustive match; handlers do the reading, deliver records to the file's
//! listener and keep the position store in step with what was delivered.

mod read;
mod tail;

use std::io;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::{StartAt, TailConfig};
use crate::identity::FileId;
use crate::listener::Observer;
use crate::position::{PositionRecord, PositionStore};
use crate::registry::WatchedFiles;
use crate::watched_file::{LoopControl, WatchedFile};

/// Everything a state change can turn into.
#[derive(Debug)]
pub enum Transition {
    /// Open a file whose identity has been seen before
    Create,
    /// Open a file found by the first discovery, honoring `start_at`
    CreateInitial,
    /// Read what was appended since the last pass
    Grow,
    /// The file got shorter; start over from the top
    Shrink,
    /// The path is gone
    Delete,
    /// Idle past `close_older` with nothing left to read
    Timeout,
    /// An ignored file changed size
    Unignore,
    /// The path now names another identity; continue from `position`, or
    /// from 0 with a fresh record when there is none
    RotateAsFile { position: Option<u64> },
    /// The path now names an identity that `previous` was reading
    RotateFrom { previous: Box<WatchedFile> },
    /// Read mode: consume a plain file to its end
    ReadFile,
    /// Read mode: decode and consume a gzip file
    ReadCompressedFile,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Create => "create",
            Transition::CreateInitial => "create_initial",
            Transition::Grow => "grow",
            Transition::Shrink => "shrink",
            Transition::Delete => "delete",
            Transition::Timeout => "timeout",
            Transition::Unignore => "unignore",
            Transition::RotateAsFile { .. } => "rotate_as_file",
            Transition::RotateFrom { .. } => "rotate_from",
            Transition::ReadFile => "read_file",
            Transition::ReadCompressedFile => "read_compressed_file",
        }
    }
}

/// Shared state a handler works against.
///
/// The file being handled has been taken out of `registry` by the caller, so
/// the registry only holds the other entries.
pub struct HandlerContext<'a> {
    pub config: &'a TailConfig,
    pub registry: &'a mut WatchedFiles,
    pub store: &'a mut PositionStore,
    pub observer: &'a mut dyn Observer,
    pub cancel: &'a CancellationToken,
}

impl HandlerContext<'_> {
    fn quit(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Run the handler for `transition` against `file`.
pub fn dispatch(transition: Transition, file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    trace!(path = ?file.path(), transition = transition.name(), "Handling transition");
    if !file.has_listener() {
        file.set_listener(ctx.observer);
    }

    match transition {
        Transition::Create => tail::create(file, ctx),
        Transition::CreateInitial => tail::create_initial(file, ctx),
        Transition::Grow => tail::grow(file, ctx),
        Transition::Shrink => tail::shrink(file, ctx),
        Transition::Delete => tail::delete(file, ctx),
        Transition::Timeout => tail::timeout(file),
        Transition::Unignore => tail::unignore(file, ctx),
        Transition::RotateAsFile { position } => tail::rotate_as_file(file, position, ctx),
        Transition::RotateFrom { previous } => tail::rotate_from(file, *previous, ctx),
        Transition::ReadFile => read::read_file(file, ctx),
        Transition::ReadCompressedFile => read::read_compressed_file(file, ctx),
    }
}

/// Read whatever is left behind an open handle, without the per-tick cap.
///
/// Used before a path is handed to another identity, and before a deleted
/// file is reported, so bytes written before the change are not lost.
pub fn drain(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    if !file.is_open() {
        return;
    }
    if !file.has_listener() {
        file.set_listener(ctx.observer);
    }
    if let Err(e) = file.refresh_size_from_handle() {
        debug!(path = ?file.path(), error = %e, "Unable to stat open handle before draining");
        return;
    }
    if file.all_read() {
        return;
    }

    debug!(
        path = ?file.path(),
        unread = file.bytes_unread(),
        "Draining remaining content from open handle"
    );
    file.set_maximum_read_loop();
    read_from_cursor(file, ctx);
    file.set_standard_read_loop();
}

/// Open the file unless it already is. Failures put it back to watched.
fn open_file(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) -> bool {
    if file.is_open() {
        return true;
    }
    trace!(path = ?file.path(), "Opening file");

    match file.open() {
        Ok(()) => {
            file.notify(|l| l.opened());
            true
        }
        Err(e) => {
            if file.should_warn(ctx.config.open_warn_interval) {
                warn!(path = ?file.path(), error = %e, "Failed to open file");
            } else {
                debug!(path = ?file.path(), error = %e, "Failed to open file, warning suppressed");
            }
            file.watch();
            false
        }
    }
}

/// Seek to the cursor and run one bounded read pass.
fn read_from_cursor(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) -> LoopControl {
    let mut control = file.loop_control_adjusted_for_stat_size();
    if let Err(e) = file.seek(file.bytes_read()) {
        error!(path = ?file.path(), error = %e, "Failed to seek");
        file.notify(|l| l.error());
        control.flag_read_error();
        return control;
    }
    controlled_read(file, control, ctx)
}

/// Read up to `control.count` chunks, delivering each complete record and
/// advancing its position record by the record plus its delimiter.
fn controlled_read(
    file: &mut WatchedFile,
    mut control: LoopControl,
    ctx: &mut HandlerContext<'_>,
) -> LoopControl {
    let key = file.key();
    let delimiter_len = ctx.config.delimiter_bytes().len() as u64;
    let mut changed = false;
    trace!(
        path = ?file.path(),
        iterations = control.count,
        amount = control.size,
        "Reading file"
    );

    for _ in 0..control.count {
        if ctx.quit() {
            debug!(path = ?file.path(), "Stopped reading, watch is shutting down");
            break;
        }

        match file.read_extract_records(control.size) {
            Ok(Some(records)) => {
                changed = true;
                for record in records {
                    let len = record.len() as u64;
                    file.notify(|l| l.accept(record));
                    ctx.store.increment(&key, len + delimiter_len);
                }
            }
            Ok(None) => {
                trace!(path = ?file.path(), "Reached end of file");
                control.flag_read_error();
                break;
            }
            Err(e) if is_transient(&e) => {
                debug!(path = ?file.path(), error = %e, "Read interrupted");
                file.notify(|l| l.error());
                control.flag_read_error();
                break;
            }
            Err(e) => {
                error!(path = ?file.path(), error = %e, "General error reading file");
                file.notify(|l| l.error());
                control.flag_read_error();
                break;
            }
        }
    }

    if changed {
        ctx.store.request_flush();
    }
    control
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Which handler is binding the file to its position record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordUpdate {
    Create,
    CreateInitial,
    Shrink,
    Unignore,
}

/// Make sure `file` owns the position record of its identity and that the
/// cursor and the record agree.
fn add_or_update_record(file: &mut WatchedFile, update: RecordUpdate, ctx: &mut HandlerContext<'_>) {
    let key = file.key();
    let owner = ctx
        .store
        .get(&key)
        .map(|r| r.owner().map(Path::to_path_buf));

    match owner {
        None => {
            let position = match update {
                RecordUpdate::Unignore => file.bytes_read(),
                _ => file.position_for_new_record(),
            };
            let mut record = PositionRecord::new(position);
            record.set_owner(file.path());
            ctx.store.set(key, record);
            file.update_bytes_read(position);
            trace!(path = ?file.path(), file_id = %key, position, "Added position record");
        }
        Some(Some(owner)) if owner == file.path() => {
            update_existing(file, update, ctx);
        }
        Some(owner) => {
            if let Some(owner) = owner {
                // the identity moved here while still bound to a live entry elsewhere
                if let Some(previous) = take_live(ctx.registry, &owner, key) {
                    debug!(
                        path = ?file.path(),
                        previous = ?owner,
                        file_id = %key,
                        "Identity found under a new path, taking it over"
                    );
                    supersede(previous, ctx);
                }
            }
            ctx.store.set_owner(&key, file.path());
            update_existing(file, update, ctx);
        }
    }
    file.initial_completed();
}

fn update_existing(file: &mut WatchedFile, update: RecordUpdate, ctx: &mut HandlerContext<'_>) {
    let key = file.key();
    let recorded = ctx.store.position(&key).unwrap_or(0);
    let position = match update {
        RecordUpdate::Create => {
            // the record stops at the last delivered record, so a buffered
            // partial one is read again from the file
            file.clear_buffer();
            file.update_bytes_read(recorded);
            return;
        }
        RecordUpdate::CreateInitial => match ctx.config.start_at {
            StartAt::Beginning => 0,
            StartAt::End => file.size(),
        },
        RecordUpdate::Shrink => {
            debug!(path = ?file.path(), "File was truncated, seeking to beginning");
            file.clear_buffer();
            0
        }
        RecordUpdate::Unignore => {
            if file.shrunk() {
                0
            } else {
                file.bytes_read()
            }
        }
    };
    trace!(path = ?file.path(), recorded, position, "Updating position record");
    file.update_bytes_read(position);
    ctx.store.store_last_read(&key, position);
}

/// Remove a live entry reading `key` at `path` from the registry.
pub(crate) fn take_live(registry: &mut WatchedFiles, path: &Path, key: FileId) -> Option<WatchedFile> {
    let live = registry
        .get(path)
        .is_some_and(|f| f.key() == key && !f.is_unwatched());
    if live { registry.take(path) } else { None }
}

/// Finish an entry whose identity has been taken over by another path.
fn supersede(mut previous: WatchedFile, ctx: &mut HandlerContext<'_>) {
    drain(&mut previous, ctx);
    previous.unwatch();
    debug!(path = ?previous.path(), "Superseded watched file removed");
}
