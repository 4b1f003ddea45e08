//! Size-based rotating log file.
//!
//! `tracing-appender` only rotates on time boundaries, while the diagnostic
//! log rotates on size (500 MB) and prunes rotated files by age (10 days).
//! [`SizeRotatingWriter`] is a plain `io::Write` that does both; the logging
//! module wraps it in `tracing_appender::non_blocking` so the rotation and
//! disk I/O happen on the appender's worker thread, never on the caller's.
//!
//! Rotated files are named `<file>.<YYYYmmdd-HHMMSS.ffffff>` next to the live
//! file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Rotation threshold used by the server.
pub const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// Age after which rotated files are deleted.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// Append-only file writer that rotates once the file exceeds `max_bytes`.
///
/// Write failures are swallowed: a full or read-only disk must never surface
/// as an error in code that merely logs.
#[derive(Debug)]
pub struct SizeRotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    retention: Duration,
    file: Option<File>,
    written: u64,
}

impl SizeRotatingWriter {
    /// Open (or create) the live file at `path`.
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, retention: Duration) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        let writer = Self { path, max_bytes, retention, file: Some(file), written };
        writer.prune();
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated_name(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.6f");
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{stamp}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        let rotated = self.rotated_name();
        let renamed = fs::rename(&self.path, &rotated);
        // Reopen even if the rename failed so logging continues.
        self.file = Some(open_append(&self.path)?);
        self.written = match renamed {
            Ok(()) => 0,
            Err(_) => self.file.as_ref().and_then(|f| f.metadata().ok()).map(|m| m.len()).unwrap_or(0),
        };
        self.prune();
        renamed
    }

    /// Delete rotated siblings older than the retention window.
    fn prune(&self) {
        let (Some(dir), Some(base)) = (self.path.parent(), self.path.file_name()) else {
            return;
        };
        let prefix = format!("{}.", base.to_string_lossy());
        let Some(cutoff) = SystemTime::now().checked_sub(self.retention) else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if expired {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            let _ = self.rotate();
        }
        if self.file.is_none() {
            self.file = open_append(&self.path).ok();
        }
        if let Some(file) = self.file.as_mut() {
            match file.write_all(buf) {
                Ok(()) => self.written += buf.len() as u64,
                Err(_) => self.file = None,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
