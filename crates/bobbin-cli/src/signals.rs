//! Unix signal wiring for the daemon.
//!
//! - SIGTERM / SIGINT: request shutdown (idempotent)
//! - SIGHUP: reload settings and publish them live
//! - SIGUSR1: start a cycle now

use std::sync::Arc;

use anyhow::{Context, Result};
use bobbin_core::Shutdown;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

pub fn spawn<F>(shutdown: Shutdown, wake: Arc<Notify>, reload: F) -> Result<JoinHandle<()>>
where
    F: Fn() + Send + 'static,
{
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut hup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = term.recv() => request_shutdown(&shutdown, "SIGTERM"),
                _ = int.recv() => request_shutdown(&shutdown, "SIGINT"),
                _ = hup.recv() => {
                    info!("received SIGHUP, reloading settings");
                    reload();
                }
                _ = usr1.recv() => {
                    info!("received SIGUSR1, waking scheduler");
                    wake.notify_one();
                }
            }
        }
    }))
}

fn request_shutdown(shutdown: &Shutdown, name: &str) {
    if shutdown.request() {
        info!(signal = name, "received shutdown signal");
    } else {
        info!(signal = name, "shutdown already requested");
    }
}
