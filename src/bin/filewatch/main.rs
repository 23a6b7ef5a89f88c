// SPDX-License-Identifier: Apache-2.0

mod args;

use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;

use clap::Parser;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tracing::metadata::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use args::{Arguments, LogFormatArg};
use filewatch::bounded_channel::{BoundedReceiver, bounded};
use filewatch::listener::{ChannelObserver, TailEvent, TailEventKind};
use filewatch::service::TailService;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> ExitCode {
    let opt = Arguments::parse();

    if let Err(e) = setup_logging(&opt.log_format) {
        eprintln!("ERROR: failed to setup logging: {}", e);
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(opt)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exited with error");
            ExitCode::from(1)
        }
    }
}

async fn run(opt: Arguments) -> Result<(), BoxError> {
    let config = opt.build_config();
    info!(
        version = get_version(),
        paths = ?config.paths,
        mode = ?config.mode,
        "Starting filewatch"
    );

    let (tx, rx) = bounded(opt.event_queue_size.max(1));
    let service = TailService::spawn(config, ChannelObserver::new(tx))?;
    let printer = tokio::spawn(print_events(rx, opt.verbose_events));

    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;
    select! {
        _ = sig_term.recv() => info!("Shutting down on SIGTERM"),
        _ = sig_int.recv() => info!("Shutting down on SIGINT"),
        _ = wait_finished(&service) => info!("All files read"),
    }

    // joins the watch thread and writes positions, both blocking
    tokio::task::spawn_blocking(move || service.shutdown()).await??;
    printer.await?;
    info!("Stopped");
    Ok(())
}

async fn wait_finished(service: &TailService) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(100));
    loop {
        interval.tick().await;
        if service.is_finished() {
            return;
        }
    }
}

/// Print lines to stdout until the watch drops its sender.
async fn print_events(mut rx: BoundedReceiver<TailEvent>, verbose: bool) {
    let stdout = io::stdout();
    while let Some(event) = rx.next().await {
        let mut out = stdout.lock();
        let written = match event.kind {
            TailEventKind::Line(line) => out
                .write_all(&line)
                .and_then(|_| out.write_all(b"\n")),
            kind if verbose => writeln!(out, "# {} {:?}", event.path.display(), kind),
            _ => Ok(()),
        };
        if let Err(e) = written {
            error!(error = %e, "Failed to write to stdout");
            return;
        }
    }
}

fn setup_logging(log_format: &LogFormatArg) -> Result<(), BoxError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    // stdout carries the records, logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true);

    match log_format {
        LogFormatArg::Json => builder.json().try_init()?,
        LogFormatArg::Text => builder
            .with_ansi(io::stderr().is_terminal())
            .compact()
            .try_init()?,
    }
    Ok(())
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}
