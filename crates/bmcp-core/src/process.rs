//! Process probing and termination for single-instance enforcement.
//!
//! Liveness is checked with `kill(pid, 0)` (an `EPERM` reply still means the
//! process exists) and refined through `sysinfo`, which also supplies the
//! command line used to recognize another instance of this program. Zombies
//! count as dead: they hold no resources worth waiting for.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sysinfo::{ProcessStatus, System};
use tracing::{debug, warn};

use crate::error::{BmcpError, Result};

/// Poll interval while waiting for a terminated process to exit.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// How a stale process was dealt with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process was gone before any signal was delivered.
    AlreadyGone,
    /// The process exited after SIGTERM.
    Exited,
    /// The process ignored SIGTERM and was sent SIGKILL.
    Killed,
}

fn to_nix_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

fn sysinfo_pid(pid: u32) -> sysinfo::Pid {
    sysinfo::Pid::from_u32(pid)
}

/// Whether `pid` names a running (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    let Some(nix_pid) = to_nix_pid(pid) else {
        return false;
    };
    match kill(nix_pid, None) {
        Ok(()) | Err(Errno::EPERM) => {}
        Err(_) => return false,
    }
    let mut sys = System::new();
    if !sys.refresh_process(sysinfo_pid(pid)) {
        // Exists per kill(2) but not visible to sysinfo; trust kill(2).
        return true;
    }
    sys.process(sysinfo_pid(pid)).map(|p| p.status() != ProcessStatus::Zombie).unwrap_or(true)
}

/// Command line of `pid`, falling back to the process name when the
/// arguments are unreadable.
pub fn command_line(pid: u32) -> Option<Vec<String>> {
    let mut sys = System::new();
    if !sys.refresh_process(sysinfo_pid(pid)) {
        return None;
    }
    sys.process(sysinfo_pid(pid)).map(|p| {
        let cmd = p.cmd();
        if cmd.is_empty() { vec![p.name().to_string()] } else { cmd.to_vec() }
    })
}

/// Whether the live process `pid` carries `identity` in its command line.
pub fn matches_identity(pid: u32, identity: &str) -> bool {
    command_line(pid).map(|cmd| cmd.iter().any(|arg| arg.contains(identity))).unwrap_or(false)
}

/// SIGTERM `pid`, wait up to `grace` for it to exit, then SIGKILL.
pub fn terminate(pid: u32, grace: Duration) -> Result<Termination> {
    let nix_pid = to_nix_pid(pid).ok_or_else(|| BmcpError::StaleProcessReapFailed(format!("invalid pid {pid}")))?;

    match kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(Termination::AlreadyGone),
        Err(e) => return Err(BmcpError::StaleProcessReapFailed(format!("SIGTERM {pid}: {e}"))),
    }
    debug!("sent SIGTERM to {pid}, waiting up to {grace:?}");

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(Termination::Exited);
        }
        std::thread::sleep(EXIT_POLL);
    }
    if !is_alive(pid) {
        return Ok(Termination::Exited);
    }

    warn!("process {pid} ignored SIGTERM for {grace:?}, sending SIGKILL");
    match kill(nix_pid, Signal::SIGKILL) {
        Ok(()) => Ok(Termination::Killed),
        Err(Errno::ESRCH) => Ok(Termination::Exited),
        Err(e) => Err(BmcpError::StaleProcessReapFailed(format!("SIGKILL {pid}: {e}"))),
    }
}
