// SPDX-License-Identifier: Apache-2.0

//! Read mode: every file is consumed once and then forgotten.

mod common;

use std::fs;
use std::io::Write;
use std::time::Duration;

use common::Fixture;
use filewatch::bounded_channel::bounded;
use filewatch::config::{CompletedAction, Mode, TailConfig};
use filewatch::listener::{ChannelObserver, TailEventKind};
use filewatch::service::TailService;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn read_mode() -> TailConfig {
    TailConfig {
        mode: Mode::Read,
        close_older: None,
        ..Default::default()
    }
}

fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn test_file_is_read_once_and_forgotten() {
    let mut fx = Fixture::new(read_mode());
    let log = fx.write("batch.log", b"one\ntwo");
    fx.watch("*.log");

    assert_eq!(fx.tick(), vec![log.clone()]);
    assert_eq!(
        fx.observer.take(),
        vec![
            "batch.log:opened",
            "batch.log:accept(one)",
            "batch.log:accept(two)",
            "batch.log:eof",
            "batch.log:reading_completed"
        ]
    );

    // rediscovery finds the consumed record and skips the file
    fx.round();
    assert!(fx.watch.is_empty());
    assert!(fx.observer.take().is_empty());
}

#[test]
fn test_gzip_file_is_decoded() {
    let mut fx = Fixture::new(read_mode());
    fx.write("batch.log.gz", &gzip(b"x\ny\n"));
    fx.watch("*.gz");
    fx.tick();

    assert_eq!(fx.observer.take_lines(), vec!["batch.log.gz:x", "batch.log.gz:y"]);
    fx.round();
    assert!(fx.watch.is_empty());
}

#[test]
fn test_corrupt_gzip_stays_registered() {
    let mut fx = Fixture::new(TailConfig {
        check_archive_validity: true,
        ..read_mode()
    });
    let mut data = gzip(b"x\ny\n");
    data.truncate(data.len() - 4);
    let gz = fx.write("broken.gz", &data);
    fx.watch("*.gz");

    assert!(fx.tick().is_empty());
    assert!(fx.observer.take_lines().is_empty());

    // abandoned, but kept so discovery does not pick it up again
    fx.round();
    assert!(fx.watch.file_state(&gz).is_some());
    assert!(fx.observer.take().is_empty());
}

#[test]
fn test_restart_reads_only_appended_content() {
    let mut fx = Fixture::new(read_mode());
    fx.write("batch.log", b"one\n");
    fx.watch("*.log");
    fx.tick();
    assert_eq!(fx.observer.take_lines(), vec!["batch.log:one"]);
    fx.watch.write_positions("test");

    fx.append("batch.log", b"two\n");
    let mut fx = fx.restart(read_mode());
    fx.watch("*.log");
    fx.tick();

    assert_eq!(fx.observer.take_lines(), vec!["batch.log:two"]);
}

#[test]
fn test_exit_after_read_returns_from_subscribe() {
    let mut fx = Fixture::new(TailConfig {
        exit_after_read: true,
        ..read_mode()
    });
    fx.write("a.log", b"a\n");
    fx.write("b.log", b"b\n");
    fx.watch("*.log");

    fx.watch.subscribe(&mut fx.observer, &fx.cancel);

    let mut lines = fx.observer.take_lines();
    lines.sort();
    assert_eq!(lines, vec!["a.log:a", "b.log:b"]);
    assert!(fx.watch.is_empty());
}

#[test]
fn test_exit_after_read_returns_despite_corrupt_archive() {
    let mut fx = Fixture::new(TailConfig {
        exit_after_read: true,
        ..read_mode()
    });
    fx.write("bad.gz", b"this is not gzip\n");
    fx.write("good.log", b"ok\n");
    fx.watch("*.gz");
    fx.watch("*.log");

    fx.watch.subscribe(&mut fx.observer, &fx.cancel);

    assert_eq!(fx.observer.take_lines(), vec!["good.log:ok"]);
    assert!(fx.watch.is_empty());
}

#[test]
fn test_completed_files_are_logged_and_deleted() {
    let done = TempDir::new().unwrap();
    let log_path = done.path().join("completed.log");
    let mut fx = Fixture::new(TailConfig {
        file_completed_action: Some(CompletedAction::LogAndDelete),
        file_completed_log_path: Some(log_path.clone()),
        ..read_mode()
    });
    let a = fx.write("a.log", b"a\n");
    let b = fx.write("b.log", b"b\n");
    fx.watch("*.log");
    fx.tick();

    assert!(!a.exists());
    assert!(!b.exists());
    let mut logged: Vec<String> = fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    logged.sort();
    assert_eq!(
        logged,
        vec![a.display().to_string(), b.display().to_string()]
    );

    fx.round();
    assert!(fx.watch.is_empty());
}

#[test]
fn test_completed_action_log_keeps_the_file() {
    let done = TempDir::new().unwrap();
    let log_path = done.path().join("completed.log");
    let mut fx = Fixture::new(TailConfig {
        file_completed_action: Some(CompletedAction::Log),
        file_completed_log_path: Some(log_path.clone()),
        ..read_mode()
    });
    let a = fx.write("a.log", b"a\n");
    fx.watch("*.log");
    fx.tick();

    assert!(a.exists());
    assert_eq!(
        fs::read_to_string(&log_path).unwrap(),
        format!("{}\n", a.display())
    );
}

#[tokio::test]
async fn test_events_arrive_on_async_receiver() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.log"), b"first\nsecond\n").unwrap();

    let (tx, mut rx) = bounded(16);
    let service = TailService::spawn(
        TailConfig {
            paths: vec![format!("{}/*.log", dir.path().display())],
            position_store_path: dir.path().join("positions"),
            stat_interval: Duration::from_millis(10),
            exit_after_read: true,
            ..read_mode()
        },
        ChannelObserver::new(tx),
    )
    .unwrap();

    let mut lines = Vec::new();
    let received = timeout(TEST_TIMEOUT, async {
        while let Some(event) = rx.next().await {
            match event.kind {
                TailEventKind::Line(line) => lines.push(line),
                TailEventKind::ReadingCompleted => break,
                _ => {}
            }
        }
    })
    .await;
    assert!(received.is_ok(), "timed out waiting for events");
    assert_eq!(lines, vec!["first", "second"]);

    tokio::task::spawn_blocking(move || service.wait())
        .await
        .unwrap()
        .unwrap();
}
