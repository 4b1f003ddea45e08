//! SIGINT / SIGTERM delivery.
//!
//! Both signals are installed once, before the stale-instance reap and the
//! lock, and stay installed for the life of the process. A forwarding task
//! turns them into names on a channel; the first one starts the teardown
//! sequence, one arriving while teardown is running is the force-exit escape
//! hatch (see [`Lifecycle::on_signal`]).
//!
//! [`Lifecycle::on_signal`]: crate::lifecycle::Lifecycle::on_signal

use std::io;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::debug;

pub struct ShutdownSignals {
    rx: mpsc::UnboundedReceiver<&'static str>,
}

/// Sending half of [`ShutdownSignals::channel`].
pub type SignalSender = mpsc::UnboundedSender<&'static str>;

impl ShutdownSignals {
    /// Install the OS handlers. Must be called from within the runtime.
    pub fn install() -> io::Result<Self> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let (tx, signals) = Self::channel();

        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                };
                if tx.send(name).is_err() {
                    debug!("signal receiver gone, stopping forwarder");
                    return;
                }
            }
        });
        Ok(signals)
    }

    /// Signals fed by hand instead of by the OS.
    pub fn channel() -> (SignalSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next shutdown signal and return its name. Never resolves
    /// once every sender is gone.
    pub async fn recv(&mut self) -> &'static str {
        match self.rx.recv().await {
            Some(name) => name,
            None => std::future::pending().await,
        }
    }
}
