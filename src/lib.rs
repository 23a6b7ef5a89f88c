// SPDX-License-Identifier: Apache-2.0

//! Glob based file tailing.
//!
//! A [`Watch`] expands glob patterns into a registry of watched files, walks
//! every file through its state machine once per tick, hands complete
//! records to a per-file [`Listener`] and remembers how far each file
//! identity has been read in a [`PositionStore`], so a restart resumes where
//! the last run stopped and a rotated file is not read twice.

pub mod bounded_channel;
pub mod config;
pub mod discoverer;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod listener;
pub mod position;
pub mod processor;
pub mod registry;
pub mod service;
pub mod stat;
pub mod tokenizer;
pub mod watch;
pub mod watched_file;

pub use config::{Mode, StartAt, TailConfig};
pub use error::{Error, Result};
pub use identity::FileId;
pub use listener::{ChannelObserver, Listener, NullObserver, Observer, TailEvent, TailEventKind};
pub use position::PositionStore;
pub use service::TailService;
pub use watch::Watch;
pub use watched_file::{FileState, WatchedFile};
