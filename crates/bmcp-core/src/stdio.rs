//! File-descriptor level control of the error channel.
//!
//! In guarded mode the process must emit zero bytes on stderr, including
//! output from code we do not control. Re-pointing fd 2 covers everything
//! that writes to it directly, which a logging filter alone cannot.
//!
//! - [`silence_stderr`] points fd 2 at `/dev/null` for the rest of the
//!   process and hands back the original descriptor.
//! - [`StderrCapture`] temporarily points fd 2 at a log file (used while the
//!   upstream sessions are brought up) and restores the previous target on
//!   drop.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::unistd::dup2;
use tracing::debug;

fn stderr_fd() -> RawFd {
    io::stderr().as_raw_fd()
}

/// Duplicate the current stderr target so it can be restored later.
fn save_stderr() -> io::Result<OwnedFd> {
    io::stderr().as_fd().try_clone_to_owned()
}

fn redirect_stderr_to(target: RawFd) -> io::Result<()> {
    dup2(target, stderr_fd())?;
    Ok(())
}

/// Point fd 2 at `/dev/null` for the remainder of the process.
///
/// Returns the original stderr so an operator-facing path could still reach
/// it; in guarded mode nothing does.
pub fn silence_stderr() -> io::Result<OwnedFd> {
    let devnull = OpenOptions::new().write(true).open("/dev/null")?;
    let saved = save_stderr()?;
    redirect_stderr_to(devnull.as_raw_fd())?;
    Ok(saved)
}

/// Scoped redirection of fd 2 into an append-only log file.
///
/// The previous target (normally `/dev/null`) is restored when the guard is
/// dropped.
#[derive(Debug)]
pub struct StderrCapture {
    saved: Option<OwnedFd>,
}

impl StderrCapture {
    /// Start capturing stderr into `path`, creating the file if needed.
    pub fn to_file(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        let saved = save_stderr()?;
        redirect_stderr_to(file.as_raw_fd())?;
        Ok(Self { saved: Some(saved) })
    }

    /// Restore the previous stderr target now instead of on drop.
    pub fn restore(mut self) {
        self.restore_inner();
    }

    fn restore_inner(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = redirect_stderr_to(saved.as_raw_fd()) {
                debug!("failed to restore stderr: {e}");
            }
        }
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        self.restore_inner();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn capture_writes_to_file_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("connection.log");

        let capture = StderrCapture::to_file(&path).unwrap();
        {
            // Write through a duplicate of fd 2; the test harness intercepts
            // `eprintln!` but not raw descriptor writes.
            let mut fd2 = File::from(save_stderr().unwrap());
            fd2.write_all(b"gateway banner\n").unwrap();
        }
        capture.restore();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "gateway banner\n");
    }
}
