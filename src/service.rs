// SPDX-License-Identifier: Apache-2.0

//! Runs a [`Watch`] on a dedicated OS thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::listener::Observer;
use crate::watch::Watch;

/// Handle to a running watch thread.
///
/// Dropping the handle cancels the watch and waits for the thread, but does
/// not write positions. Use [`TailService::shutdown`] for that.
pub struct TailService {
    watch: Watch,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TailService {
    /// Register `config.paths` and start ticking on a new thread.
    pub fn spawn<O>(config: TailConfig, mut observer: O) -> Result<Self>
    where
        O: Observer + Send + 'static,
    {
        let watch = Watch::new(Arc::new(config))?;
        for pattern in watch.config().paths.clone() {
            watch.watch(&pattern)?;
        }

        let cancel = CancellationToken::new();
        let runner = watch.clone();
        let runner_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("filewatch".into())
            .spawn(move || runner.subscribe(&mut observer, &runner_cancel))?;

        info!(files = watch.len(), "Tail service started");
        Ok(Self {
            watch,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn watch(&self, pattern: &str) -> Result<usize> {
        self.watch.watch(pattern)
    }

    pub fn unwatch(&self, pattern: &str) -> Result<usize> {
        self.watch.unwatch(pattern)
    }

    pub fn handle(&self) -> &Watch {
        &self.watch
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once the watch thread has returned, e.g. after `exit_after_read`.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the watch, wait for the thread and write positions.
    pub fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        self.join()?;
        self.watch.write_positions("subscribe complete - shutting down");
        info!("Tail service stopped");
        Ok(())
    }

    /// Wait for the watch to stop on its own, then write positions.
    pub fn wait(mut self) -> Result<()> {
        self.join()?;
        self.watch.write_positions("subscribe complete - shutting down");
        Ok(())
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(()) => {
                debug!("Watch thread joined");
                Ok(())
            }
            Err(_) => {
                error!("Watch thread panicked");
                Err(Error::ThreadPanicked)
            }
        }
    }
}

impl Drop for TailService {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
            let _ = self.join();
        }
    }
}
