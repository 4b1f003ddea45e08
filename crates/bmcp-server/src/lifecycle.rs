//! Process lifecycle owner and shutdown coordinator.
//!
//! [`Lifecycle`] holds the `is_shutting_down` flag together with everything
//! teardown touches (the connection supervisor and the instance lock), so
//! independent lifecycles can coexist in tests. Teardown runs at most once:
//!
//! 1. close the quote and trade sessions
//! 2. release the instance lock
//! 3. sweep leftover lock/PID artifacts
//!
//! Every entry point (normal exit, SIGINT, SIGTERM, startup failure) calls
//! [`Lifecycle::teardown`]; only the first caller does any work.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bmcp_core::lock::InstanceLock;
use tracing::{info, warn};

use crate::supervisor::Supervisor;

/// What a shutdown signal should do given the current lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: run the teardown sequence.
    Teardown,
    /// Teardown already underway: abandon it and exit immediately.
    ForceExit,
}

/// Result of racing teardown against an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownRace {
    /// Teardown finished; `true` if this call performed it.
    Completed(bool),
    /// The interrupt fired first; teardown was abandoned.
    Interrupted,
}

pub struct Lifecycle {
    is_shutting_down: AtomicBool,
    supervisor: Arc<Supervisor>,
    lock: Mutex<InstanceLock>,
}

impl Lifecycle {
    pub fn new(supervisor: Arc<Supervisor>, lock: InstanceLock) -> Self {
        Self { is_shutting_down: AtomicBool::new(false), supervisor, lock: Mutex::new(lock) }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Run `f` against the instance lock.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut InstanceLock) -> T) -> T {
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut lock)
    }

    pub fn on_signal(&self) -> SignalAction {
        if self.is_shutting_down() { SignalAction::ForceExit } else { SignalAction::Teardown }
    }

    /// Run the teardown sequence if nobody has started it yet.
    ///
    /// Returns `true` for the caller that performed teardown, `false` for
    /// every later (or concurrent) caller.
    pub async fn teardown(&self) -> bool {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("shutting down");

        self.supervisor.shutdown().await;
        self.with_lock(|lock| {
            lock.release();
            lock.sweep_artifacts();
        });

        info!("shutdown complete");
        true
    }

    /// Run teardown unless `interrupt` resolves first.
    ///
    /// The caller decides what an interrupt means; the binary exits with
    /// status 1 without waiting for the abandoned teardown.
    pub async fn teardown_or<F>(&self, interrupt: F) -> TeardownRace
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            ran = self.teardown() => TeardownRace::Completed(ran),
            () = interrupt => {
                warn!("interrupted during shutdown, abandoning teardown");
                TeardownRace::Interrupted
            }
        }
    }
}
