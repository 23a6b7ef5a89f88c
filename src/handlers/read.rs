// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::{debug, error, trace, warn};

use super::{HandlerContext, open_file, read_from_cursor};
use crate::config::{CompletedAction, TailConfig};
use crate::position::PositionRecord;
use crate::tokenizer::BufferedTokenizer;
use crate::watched_file::WatchedFile;

pub(super) fn read_file(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    if !open_file(file, ctx) {
        return;
    }
    ensure_record(file, ctx);

    loop {
        if ctx.quit() {
            break;
        }
        let control = read_from_cursor(file, ctx);
        if !control.keep_looping() {
            break;
        }
    }

    if file.all_read() {
        // no trailing delimiter, deliver what is left
        let remainder = file.flush_buffer();
        if !remainder.is_empty() {
            let len = remainder.len() as u64;
            file.notify(|l| l.accept(remainder));
            ctx.store.increment(&file.key(), len);
        }
        let position = file.bytes_read();
        complete(file, position, ctx);
    }
}

pub(super) fn read_compressed_file(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    if !open_file(file, ctx) {
        return;
    }
    ensure_record(file, ctx);

    if ctx.config.check_archive_validity {
        if let Err(e) = check_archive(file.path()) {
            abandon(file, &e, ctx);
            return;
        }
        trace!(path = ?file.path(), "Archive is valid");
    }

    match deliver_compressed(file, ctx) {
        Ok(records) => {
            debug!(path = ?file.path(), records, "Finished reading compressed file");
            let size = file.size();
            file.update_bytes_read(size);
            complete(file, size, ctx);
        }
        Err(e) => abandon(file, &e, ctx),
    }
}

/// Read mode binds a record on open; there is no start position to honor.
fn ensure_record(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) {
    let key = file.key();
    if ctx.store.contains(&key) {
        ctx.store.set_owner(&key, file.path());
    } else {
        let mut record = PositionRecord::new(file.bytes_read());
        record.set_owner(file.path());
        ctx.store.set(key, record);
    }
    file.initial_completed();
}

fn complete(file: &mut WatchedFile, position: u64, ctx: &mut HandlerContext<'_>) {
    file.notify(|l| l.eof());
    file.close_file();
    ctx.store.reading_completed(&file.key(), file.path(), position);
    ctx.store.request_flush();
    file.notify(|l| l.reading_completed());
    file.unwatch();
    if let Some(action) = ctx.config.file_completed_action {
        run_completed_action(action, file.path(), ctx.config);
    }
}

/// Failures are logged; the file counts as read either way.
fn run_completed_action(action: CompletedAction, path: &Path, config: &TailConfig) {
    if action.logs() {
        if let Some(log_path) = config.file_completed_log_path.as_deref() {
            if let Err(e) = append_completed(log_path, path) {
                warn!(path = ?path, log = ?log_path, error = %e, "Failed to log completed file");
            }
        }
    }
    if action.deletes() {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = ?path, "Deleted completed file"),
            Err(e) => warn!(path = ?path, error = %e, "Failed to delete completed file"),
        }
    }
}

fn append_completed(log_path: &Path, path: &Path) -> io::Result<()> {
    let mut log = OpenOptions::new().create(true).append(true).open(log_path)?;
    writeln!(log, "{}", path.display())
}

fn abandon(file: &mut WatchedFile, e: &io::Error, ctx: &mut HandlerContext<'_>) {
    error!(path = ?file.path(), error = %e, "Cannot decompress gzip file, abandoning it");
    file.notify(|l| l.error());
    ctx.store.unset_owner(&file.key(), file.path());
    file.unwatch();
}

fn gz_reader(path: &Path) -> io::Result<MultiGzDecoder<BufReader<File>>> {
    Ok(MultiGzDecoder::new(BufReader::new(File::open(path)?)))
}

/// Decode the whole archive without delivering anything.
fn check_archive(path: &Path) -> io::Result<u64> {
    io::copy(&mut gz_reader(path)?, &mut io::sink())
}

fn deliver_compressed(file: &mut WatchedFile, ctx: &mut HandlerContext<'_>) -> io::Result<usize> {
    let mut reader = gz_reader(file.path())?;
    let mut tokenizer = BufferedTokenizer::new(ctx.config.delimiter_bytes());
    let mut buf = vec![0u8; ctx.config.file_chunk_size];
    let mut delivered = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for record in tokenizer.extract(&buf[..n]) {
            file.notify(|l| l.accept(record));
            delivered += 1;
        }
    }

    let remainder = tokenizer.flush();
    if !remainder.is_empty() {
        file.notify(|l| l.accept(remainder));
        delivered += 1;
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::sync::Arc;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::config::{CompletedAction, Mode, TailConfig};
    use crate::handlers::test_support::RecordingObserver;
    use crate::handlers::{HandlerContext, Transition, dispatch};
    use crate::position::PositionStore;
    use crate::registry::WatchedFiles;
    use crate::stat::FileStat;
    use crate::watched_file::WatchedFile;

    struct Harness {
        dir: TempDir,
        config: Arc<TailConfig>,
        registry: WatchedFiles,
        store: PositionStore,
        observer: RecordingObserver,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(config: TailConfig) -> Self {
            let dir = TempDir::new().unwrap();
            let config = Arc::new(TailConfig {
                mode: Mode::Read,
                position_store_path: dir.path().join("positions"),
                ..config
            });
            Self {
                registry: WatchedFiles::new(&config),
                store: PositionStore::open(Arc::clone(&config)).unwrap(),
                observer: RecordingObserver::default(),
                cancel: CancellationToken::new(),
                config,
                dir,
            }
        }

        fn file(&self, name: &str, content: &[u8]) -> WatchedFile {
            let path = self.dir.path().join(name);
            fs::write(&path, content).unwrap();
            let stat = FileStat::from_path(&path).unwrap();
            let mut file = WatchedFile::new(path, stat, Arc::clone(&self.config));
            file.activate();
            file
        }

        fn dispatch(&mut self, transition: Transition, file: &mut WatchedFile) {
            let mut ctx = HandlerContext {
                config: &self.config,
                registry: &mut self.registry,
                store: &mut self.store,
                observer: &mut self.observer,
                cancel: &self.cancel,
            };
            dispatch(transition, file, &mut ctx);
        }
    }

    fn gzip(content: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_read_file_to_completion() {
        let mut h = Harness::new(TailConfig {
            file_chunk_size: 4,
            file_chunk_count: 1,
            ..Default::default()
        });
        let mut file = h.file("a.log", b"one\ntwo\nlast");

        h.dispatch(Transition::ReadFile, &mut file);

        assert_eq!(
            h.observer.take(),
            vec![
                "a.log:opened",
                "a.log:accept(one)",
                "a.log:accept(two)",
                "a.log:accept(last)",
                "a.log:eof",
                "a.log:reading_completed"
            ]
        );
        assert!(file.is_unwatched());
        assert!(!file.is_open());
        let record = h.store.get(&file.key()).unwrap();
        assert_eq!(record.position(), 12);
        assert!(!record.is_owned());
        assert_eq!(record.path_hint(), Some(file.path()));
    }

    #[test]
    fn test_completed_file_is_logged_and_deleted() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("completed.log");
        let mut h = Harness::new(TailConfig {
            file_completed_action: Some(CompletedAction::LogAndDelete),
            file_completed_log_path: Some(log_path.clone()),
            ..Default::default()
        });
        let mut file = h.file("a.log", b"one\n");

        h.dispatch(Transition::ReadFile, &mut file);

        assert!(!file.path().exists());
        let logged = fs::read_to_string(&log_path).unwrap();
        assert_eq!(logged, format!("{}\n", file.path().display()));
    }

    #[test]
    fn test_read_file_resumes_from_adopted_position() {
        let mut h = Harness::new(TailConfig::default());
        let mut file = h.file("a.log", b"one\ntwo\n");
        file.update_bytes_read(4);

        h.dispatch(Transition::ReadFile, &mut file);
        let events = h.observer.take();
        assert!(events.contains(&"a.log:accept(two)".to_string()));
        assert!(!events.contains(&"a.log:accept(one)".to_string()));
    }

    #[test]
    fn test_read_compressed_file() {
        let mut h = Harness::new(TailConfig::default());
        let mut file = h.file("a.log.gz", &gzip(b"alpha\nbeta\n"));

        h.dispatch(Transition::ReadCompressedFile, &mut file);
        assert_eq!(
            h.observer.take(),
            vec![
                "a.log.gz:opened",
                "a.log.gz:accept(alpha)",
                "a.log.gz:accept(beta)",
                "a.log.gz:eof",
                "a.log.gz:reading_completed"
            ]
        );
        assert!(file.is_unwatched());
        assert_eq!(h.store.position(&file.key()), Some(file.size()));
    }

    #[test]
    fn test_corrupt_archive_is_abandoned() {
        let mut h = Harness::new(TailConfig::default());
        let mut data = gzip(b"alpha\nbeta\ngamma\n");
        let len = data.len();
        data.truncate(len - 6);
        let mut file = h.file("bad.gz", &data);

        h.dispatch(Transition::ReadCompressedFile, &mut file);
        let events = h.observer.take();
        assert_eq!(events.last().map(String::as_str), Some("bad.gz:error"));
        assert!(!events.iter().any(|e| e.ends_with("reading_completed")));
        assert!(file.is_unwatched());
    }

    #[test]
    fn test_archive_validity_check_delivers_nothing_on_failure() {
        let mut h = Harness::new(TailConfig {
            check_archive_validity: true,
            ..Default::default()
        });
        let mut file = h.file("bad.gz", b"this is not gzip\n");

        h.dispatch(Transition::ReadCompressedFile, &mut file);
        assert_eq!(h.observer.take(), vec!["bad.gz:opened", "bad.gz:error"]);
        assert!(file.is_unwatched());
    }
}
