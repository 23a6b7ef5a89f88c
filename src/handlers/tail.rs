// SPDX-License-Identifier: Apache-2.0

use tracing::{debug, trace, warn};

use super::{
    HandlerContext, RecordUpdate, add_or_update_record, drain, open_file, read_from_cursor,
};
use crate::position::PositionRecord;
use crate::watched_file::WatchedFile;

pub(super) fn create(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    if open_file(file, ctx) {
        add_or_update_record(file, RecordUpdate::Create, ctx);
    }
}

pub(super) fn create_initial(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    if open_file(file, ctx) {
        add_or_update_record(file, RecordUpdate::CreateInitial, ctx);
    }
}

pub(super) fn grow(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    trace!(path = ?file.path(), size = file.size(), read = file.bytes_read(), "File grew");
    read_from_cursor(file, ctx);
}

pub(super) fn shrink(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    add_or_update_record(file, RecordUpdate::Shrink, ctx);
    read_from_cursor(file, ctx);
}

pub(super) fn delete(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    drain(file, ctx);
    debug!(
        path = ?file.path(),
        file_id = %file.key(),
        size = file.size(),
        read = file.bytes_read(),
        unread = file.bytes_unread(),
        "File deleted"
    );
    if file.bytes_unread() > 0 {
        warn!(
            path = ?file.path(),
            unread_bytes = file.bytes_unread(),
            "File deleted or renamed with unread bytes, if it is found again it will be read from the last position"
        );
    }
    file.notify(|l| l.deleted());
    ctx.store.unset_owner(&file.key(), file.path());
    file.close_file();
}

pub(super) fn timeout(file: &mut WatchedFile) {
    file.notify(|l| l.timed_out());
    file.close_file();
}

pub(super) fn unignore(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    add_or_update_record(file, RecordUpdate::Unignore, ctx);
}

/// Bind the path to the identity that now lives there.
pub(super) fn rotate_as_file(
    file: &mut WatchedFile,
    position: Option<u64>,
    ctx: &mut HandlerContext<'_>,
) {
    let old_key = file.key();
    let new_key = file.stat_key();
    ctx.store.unset_owner(&old_key, file.path());

    let position = match position {
        Some(position) => {
            ctx.store.set_owner(&new_key, file.path());
            position
        }
        None => {
            let mut record = PositionRecord::new(0);
            record.set_owner(file.path());
            ctx.store.set(new_key, record);
            0
        }
    };

    debug!(
        path = ?file.path(),
        from = %old_key,
        to = %new_key,
        position,
        "Rotation handled, continuing with the file now at this path"
    );
    file.rotate_as_file(position);
    ctx.store.request_flush();
}

/// Take over the identity, and the position, that `previous` was reading.
pub(super) fn rotate_from(
    file: &mut WatchedFile,
    mut previous: WatchedFile,
    ctx: &mut HandlerContext<'_>,
) {
    drain(&mut previous, ctx);

    let old_key = file.key();
    let new_key = file.stat_key();
    ctx.store.unset_owner(&old_key, file.path());
    ctx.store.set_owner(&new_key, file.path());
    let position = ctx.store.position(&new_key).unwrap_or(0);

    debug!(
        path = ?file.path(),
        previous = ?previous.path(),
        from = %old_key,
        to = %new_key,
        position,
        "Rotation handled, taking over from the previous path"
    );
    file.rotate_from(&previous, position);
    previous.unwatch();
    ctx.store.request_flush();
}
