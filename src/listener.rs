// SPDX-License-Identifier: Apache-2.0

//! Delivery side of a watch.
//!
//! Every path-stream gets its own [`Listener`], obtained from the
//! [`Observer`] the first time a transition needs one. Callbacks run
//! synchronously on the watch thread.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::bounded_channel::BoundedSender;

/// Receives the records and lifecycle notifications of one path.
pub trait Listener: Send {
    fn opened(&mut self) {}

    /// A complete record, without its delimiter.
    fn accept(&mut self, record: Bytes);

    fn eof(&mut self) {}

    fn error(&mut self) {}

    fn deleted(&mut self) {}

    fn timed_out(&mut self) {}

    /// Read mode only: the file has been consumed to its end.
    fn reading_completed(&mut self) {}
}

/// Hands out one listener per watched path.
pub trait Observer {
    fn listener_for(&mut self, path: &Path) -> Box<dyn Listener>;
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

struct NullListener;

impl Listener for NullListener {
    fn accept(&mut self, _record: Bytes) {}
}

impl Observer for NullObserver {
    fn listener_for(&mut self, _path: &Path) -> Box<dyn Listener> {
        Box::new(NullListener)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEventKind {
    Opened,
    Line(Bytes),
    Eof,
    Error,
    Deleted,
    TimedOut,
    ReadingCompleted,
}

/// A listener callback captured as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailEvent {
    pub path: PathBuf,
    pub kind: TailEventKind,
}

/// Observer that forwards every callback into a bounded channel.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: BoundedSender<TailEvent>,
}

impl ChannelObserver {
    pub fn new(tx: BoundedSender<TailEvent>) -> Self {
        Self { tx }
    }
}

impl Observer for ChannelObserver {
    fn listener_for(&mut self, path: &Path) -> Box<dyn Listener> {
        Box::new(ChannelListener {
            path: path.to_path_buf(),
            tx: self.tx.clone(),
        })
    }
}

struct ChannelListener {
    path: PathBuf,
    tx: BoundedSender<TailEvent>,
}

impl ChannelListener {
    fn send(&self, kind: TailEventKind) {
        let event = TailEvent {
            path: self.path.clone(),
            kind,
        };
        if self.tx.send_blocking(event).is_err() {
            debug!(path = ?self.path, "Event channel closed, dropping event");
        }
    }
}

impl Listener for ChannelListener {
    fn opened(&mut self) {
        self.send(TailEventKind::Opened);
    }

    fn accept(&mut self, record: Bytes) {
        self.send(TailEventKind::Line(record));
    }

    fn eof(&mut self) {
        self.send(TailEventKind::Eof);
    }

    fn error(&mut self) {
        self.send(TailEventKind::Error);
    }

    fn deleted(&mut self) {
        self.send(TailEventKind::Deleted);
    }

    fn timed_out(&mut self) {
        self.send(TailEventKind::TimedOut);
    }

    fn reading_completed(&mut self) {
        self.send(TailEventKind::ReadingCompleted);
    }
}
