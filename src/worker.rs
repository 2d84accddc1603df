//! Background worker for UI-driving callers
//!
//! The whole build or install runs linearly on one spawned thread. Progress
//! comes back over an unbounded channel, so the caller's event loop only
//! ever polls [`WorkerHandle::events`] and never runs library code itself.

use crate::builder::{BuildReport, Builder};
use crate::config::BuildConfig;
use crate::error::{InspaError, Result};
use crate::progress::{CancelToken, ProgressEvent};
use crate::runtime::{InstallOptions, InstallOutcome, Installer};
use crossbeam_channel::{unbounded, Receiver};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Handle to a running background operation
pub struct WorkerHandle<T> {
    pub events: Receiver<ProgressEvent>,
    pub cancel: CancelToken,
    join: JoinHandle<Result<T>>,
}

impl<T> WorkerHandle<T> {
    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker to finish and take its result
    pub fn join(self) -> Result<T> {
        self.join
            .join()
            .map_err(|_| InspaError::Io(std::io::Error::new(std::io::ErrorKind::Other, "worker thread panicked")))?
    }
}

/// Run a build on a background thread
pub fn spawn_build(config: BuildConfig, stub: Option<Vec<u8>>) -> Result<WorkerHandle<BuildReport>> {
    let (tx, rx) = unbounded();
    let cancel = CancelToken::new();

    let mut builder = Builder::new(config)
        .with_progress(tx)
        .with_cancel(cancel.clone());
    if let Some(stub) = stub {
        builder = builder.with_stub(stub);
    }

    let join = thread::Builder::new()
        .name("inspa-build".to_string())
        .spawn(move || {
            debug!("Build worker started");
            builder.build()
        })?;

    Ok(WorkerHandle {
        events: rx,
        cancel,
        join,
    })
}

/// Run an installation on a background thread
pub fn spawn_install(
    source: impl Into<PathBuf>,
    options: InstallOptions,
) -> Result<WorkerHandle<InstallOutcome>> {
    let (tx, rx) = unbounded();
    let cancel = CancelToken::new();

    let mut installer = Installer::new(source, options)
        .with_progress(tx)
        .with_cancel(cancel.clone());

    let join = thread::Builder::new()
        .name("inspa-install".to_string())
        .spawn(move || {
            debug!("Install worker started");
            installer.run()
        })?;

    Ok(WorkerHandle {
        events: rx,
        cancel,
        join,
    })
}
