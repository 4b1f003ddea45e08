//! Single-instance lock manager.
//!
//! Mutual exclusion across processes uses two files in the project root:
//!
//! - `.instance.lock`: held with a non-blocking exclusive `flock` for the
//!   lifetime of the owning process
//! - `.instance.pid`: decimal PID of the holder, used to recognize (and
//!   reap) a previous instance that is still running
//!
//! ```text
//! Unlocked ──acquire()──► Acquiring ──ok──► Held ──release()──► Released
//!                             │
//!                             └──err──► Unlocked
//! ```
//!
//! The kernel drops the `flock` when the holder dies, so a crashed instance
//! never blocks a restart; its leftover PID file is what [`InstanceLock::reap_stale`]
//! cleans up.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{BmcpError, Result};
use crate::process::{self, Termination};

/// How long a stale instance gets to exit after SIGTERM.
pub const DEFAULT_REAP_GRACE: Duration = Duration::from_secs(3);

/// Lock attempts before giving up on a lock file that keeps being replaced.
const LOCK_ATTEMPTS: usize = 3;

/// Lock manager state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    Released,
}

/// Cross-process instance lock (lock file + PID file).
#[derive(Debug)]
pub struct InstanceLock {
    lock_path: PathBuf,
    pid_path: PathBuf,
    identity: String,
    pid: u32,
    reap_grace: Duration,
    state: LockState,
    held: Option<Flock<File>>,
}

impl InstanceLock {
    pub fn new(lock_path: impl Into<PathBuf>, pid_path: impl Into<PathBuf>, identity: impl Into<String>) -> Self {
        Self {
            lock_path: lock_path.into(),
            pid_path: pid_path.into(),
            identity: identity.into(),
            pid: std::process::id(),
            reap_grace: DEFAULT_REAP_GRACE,
            state: LockState::Unlocked,
            held: None,
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self::new(cfg.lock_file(), cfg.pid_file(), cfg.identity.clone())
    }

    /// Act on behalf of `pid` instead of the current process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_reap_grace(mut self, grace: Duration) -> Self {
        self.reap_grace = grace;
        self
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == LockState::Held
    }

    pub fn owner_pid(&self) -> u32 {
        self.pid
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// PID recorded in the PID file, if it exists and parses.
    fn recorded_pid(&self) -> Option<u32> {
        match fs::read_to_string(&self.pid_path) {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) => Some(pid),
                Err(_) => {
                    debug!("ignoring malformed pid file {}: {content:?}", self.pid_path.display());
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("failed to read pid file {}: {e}", self.pid_path.display());
                None
            }
        }
    }

    /// A different, live process that looks like another instance of us.
    fn live_instance(&self) -> Option<u32> {
        let pid = self.recorded_pid()?;
        (pid != self.pid && process::is_alive(pid) && process::matches_identity(pid, &self.identity)).then_some(pid)
    }

    /// Take the instance lock.
    ///
    /// Fails with [`BmcpError::AlreadyRunning`] if the PID file names a live
    /// instance or the `flock` is contended. Calling it while already held is
    /// a no-op.
    pub fn acquire(&mut self) -> Result<()> {
        if self.state == LockState::Held {
            return Ok(());
        }
        self.state = LockState::Acquiring;
        match self.try_acquire() {
            Ok(flock) => {
                self.held = Some(flock);
                self.state = LockState::Held;
                info!("instance lock acquired — pid={}, lock={}", self.pid, self.lock_path.display());
                Ok(())
            }
            Err(e) => {
                self.state = LockState::Unlocked;
                Err(e)
            }
        }
    }

    fn try_acquire(&self) -> Result<Flock<File>> {
        if let Some(pid) = self.live_instance() {
            return Err(BmcpError::AlreadyRunning(Some(pid)));
        }

        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BmcpError::LockAcquisitionFailed(format!("{}: {e}", parent.display())))?;
        }
        for _ in 0..LOCK_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.lock_path)
                .map_err(|e| BmcpError::LockAcquisitionFailed(format!("{}: {e}", self.lock_path.display())))?;

            let flock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => flock,
                Err((_, Errno::EAGAIN)) => return Err(BmcpError::AlreadyRunning(None)),
                Err((_, e)) => {
                    return Err(BmcpError::LockAcquisitionFailed(format!("flock {}: {e}", self.lock_path.display())));
                }
            };
            // The previous holder unlinks before unlocking, so a lock won on
            // an unlinked inode means someone else may hold the new file.
            if !self.is_current(&flock) {
                debug!("lock file {} was replaced while locking, retrying", self.lock_path.display());
                continue;
            }

            if let Err(e) = fs::write(&self.pid_path, self.pid.to_string()) {
                // Dropping the flock releases it.
                return Err(BmcpError::LockAcquisitionFailed(format!("write {}: {e}", self.pid_path.display())));
            }
            return Ok(flock);
        }
        Err(BmcpError::LockAcquisitionFailed(format!("{} kept changing while locking", self.lock_path.display())))
    }

    /// Whether `file` is still the inode found at the lock path.
    fn is_current(&self, file: &File) -> bool {
        match (file.metadata(), fs::metadata(&self.lock_path)) {
            (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
            _ => false,
        }
    }

    /// Release the lock and delete both files. No-op unless held.
    pub fn release(&mut self) {
        if self.state != LockState::Held {
            return;
        }
        // Unlink while still locked so a waiter cannot win the old inode.
        remove_quietly(&self.lock_path);
        remove_quietly(&self.pid_path);
        if let Some(flock) = self.held.take() {
            if let Err((_, e)) = flock.unlock() {
                warn!("failed to unlock {}: {e}", self.lock_path.display());
            }
        }
        self.state = LockState::Released;
        info!("instance lock released — pid={}", self.pid);
    }

    /// Terminate a previous instance recorded in the PID file and remove the
    /// lock artifacts.
    ///
    /// Best-effort: every failure is logged and swallowed.
    pub fn reap_stale(&self) {
        if let Some(old_pid) = self.recorded_pid() {
            if old_pid != self.pid && process::is_alive(old_pid) && process::matches_identity(old_pid, &self.identity) {
                info!("found stale instance {old_pid}, terminating");
                match process::terminate(old_pid, self.reap_grace) {
                    Ok(Termination::AlreadyGone) => debug!("stale instance {old_pid} already gone"),
                    Ok(Termination::Exited) => info!("stale instance {old_pid} exited"),
                    Ok(Termination::Killed) => warn!("stale instance {old_pid} killed"),
                    Err(e) => warn!("{e}"),
                }
            }
        }
        remove_quietly(&self.pid_path);
        remove_quietly(&self.lock_path);
    }

    /// Teardown-time cleanup of leftover artifacts.
    ///
    /// Leaves the files alone when the PID file names another live process.
    pub fn sweep_artifacts(&self) {
        if let Some(pid) = self.recorded_pid().filter(|pid| *pid != self.pid && process::is_alive(*pid)) {
            debug!("not sweeping lock artifacts owned by live process {pid}");
            return;
        }
        remove_quietly(&self.pid_path);
        remove_quietly(&self.lock_path);
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {e}", path.display()),
    }
}
