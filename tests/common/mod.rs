// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use filewatch::config::{StartAt, TailConfig};
use filewatch::listener::{Listener, Observer};
use filewatch::watch::Watch;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Shared log of every listener callback, as `"<file name>:<event>"`.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Delivered records only, in order, tagged with their file name.
    pub fn take_lines(&self) -> Vec<String> {
        self.take()
            .into_iter()
            .filter_map(|e| {
                let (name, event) = e.split_once(':')?;
                let line = event.strip_prefix("accept(")?.strip_suffix(')')?;
                Some(format!("{}:{}", name, line))
            })
            .collect()
    }
}

struct RecordingListener {
    name: String,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    fn push(&self, event: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, event));
    }
}

impl Listener for RecordingListener {
    fn opened(&mut self) {
        self.push("opened");
    }
    fn accept(&mut self, record: Bytes) {
        self.push(&format!("accept({})", String::from_utf8_lossy(&record)));
    }
    fn eof(&mut self) {
        self.push("eof");
    }
    fn error(&mut self) {
        self.push("error");
    }
    fn deleted(&mut self) {
        self.push("deleted");
    }
    fn timed_out(&mut self) {
        self.push("timed_out");
    }
    fn reading_completed(&mut self) {
        self.push("reading_completed");
    }
}

impl Observer for RecordingObserver {
    fn listener_for(&mut self, path: &Path) -> Box<dyn Listener> {
        Box::new(RecordingListener {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            events: Arc::clone(&self.events),
        })
    }
}

/// A watch over a temp directory, ticked by hand.
pub struct Fixture {
    pub dir: TempDir,
    pub watch: Watch,
    pub observer: RecordingObserver,
    pub cancel: CancellationToken,
}

impl Fixture {
    pub fn new(config: TailConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let watch = Watch::new(Arc::new(Self::config_in(&dir, config))).unwrap();
        Self {
            dir,
            watch,
            observer: RecordingObserver::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a second watch over the same directory and position store.
    pub fn restart(self, config: TailConfig) -> Self {
        drop(self.watch);
        let watch = Watch::new(Arc::new(Self::config_in(&self.dir, config))).unwrap();
        Self {
            dir: self.dir,
            watch,
            observer: RecordingObserver::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn config_in(dir: &TempDir, config: TailConfig) -> TailConfig {
        TailConfig {
            position_store_path: dir.path().join("positions"),
            stat_interval: Duration::from_millis(10),
            discover_interval: 1,
            ..config
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn pattern(&self, glob: &str) -> String {
        format!("{}/{}", self.dir.path().display(), glob)
    }

    pub fn watch(&self, glob: &str) -> usize {
        self.watch.watch(&self.pattern(glob)).unwrap()
    }

    pub fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn append(&self, name: &str, content: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.path(name))
            .unwrap();
        file.write_all(content).unwrap();
    }

    pub fn rename(&self, from: &str, to: &str) {
        fs::rename(self.path(from), self.path(to)).unwrap();
    }

    pub fn tick(&mut self) -> Vec<PathBuf> {
        self.watch.iterate_on_state(&mut self.observer, &self.cancel)
    }

    /// One scheduler round: a tick followed by a discovery pass.
    pub fn round(&mut self) {
        self.tick();
        self.watch.discover();
    }
}

pub fn beginning() -> TailConfig {
    TailConfig {
        start_at: StartAt::Beginning,
        ..Default::default()
    }
}
