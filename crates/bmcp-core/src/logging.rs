//! Diagnostic sink built on the `tracing` ecosystem.
//!
//! Provides:
//! - File output to `<home>/logs/<service>.log`, size-rotated through
//!   [`SizeRotatingWriter`] behind `tracing_appender::non_blocking`
//! - Optional stderr mirror, only when `DEBUG_MODE=1` and not guarded
//! - A declarative mute list of third-party targets (`target=off`)
//! - [`DiagnosticSink`], which also forwards messages over a request-scoped
//!   protocol logging channel when running guarded
//!
//! Nothing here ever writes to stdout. When guarded, nothing writes to stderr
//! either, whatever the debug flag says.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::OutputSettings;
use crate::rotating::{DEFAULT_MAX_BYTES, DEFAULT_RETENTION, SizeRotatingWriter};

/// Log targets muted unless explicitly overridden.
pub const DEFAULT_MUTED_TARGETS: &[&str] = &["mio", "tokio", "runtime", "tokio_util", "sysinfo"];

/// Settings for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level if `RUST_LOG` is not set (e.g. `"debug"`).
    pub level: String,
    /// Live log file path.
    pub log_file: PathBuf,
    /// Rotation threshold in bytes.
    pub max_bytes: u64,
    /// Age after which rotated files are pruned.
    pub retention: Duration,
    /// Guarded mode: never touch stderr.
    pub guarded: bool,
    /// Mirror INFO+ to stderr when not guarded.
    pub debug_mode: bool,
    /// Targets whose events are dropped entirely.
    pub muted_targets: Vec<String>,
}

impl LogConfig {
    pub fn for_output(output: &OutputSettings) -> Self {
        Self {
            level: "debug".into(),
            log_file: output.log_file(),
            max_bytes: DEFAULT_MAX_BYTES,
            retention: DEFAULT_RETENTION,
            guarded: output.guarded,
            debug_mode: output.debug_mode,
            muted_targets: DEFAULT_MUTED_TARGETS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether the stderr mirror layer is installed.
    pub fn mirrors_to_stderr(&self) -> bool {
        self.debug_mode && !self.guarded
    }
}

/// Keeps the non-blocking file writer alive; dropping it flushes pending
/// lines.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// Build the level filter: `RUST_LOG` (or `level`) plus one `target=off`
/// directive per muted target. Invalid target names are skipped.
pub fn build_filter(level: &str, muted_targets: &[String]) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    for target in muted_targets {
        if let Ok(directive) = format!("{target}=off").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start, after guarded mode has been
/// entered. If the log file cannot be opened, file logging is skipped rather
/// than failing startup. A second call is a no-op.
pub fn init_logging(cfg: &LogConfig) -> LogGuard {
    let env_filter = build_filter(&cfg.level, &cfg.muted_targets);

    let (file_layer, worker) = match SizeRotatingWriter::new(&cfg.log_file, cfg.max_bytes, cfg.retention) {
        Ok(writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let stderr_layer = cfg.mirrors_to_stderr().then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
            .with_filter(LevelFilter::INFO)
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();
    if installed {
        debug!("logging initialized — file={}, guarded={}", cfg.log_file.display(), cfg.guarded);
    }

    LogGuard { _worker: worker }
}

// ---------------------------------------------------------------------------
// Protocol logging channel
// ---------------------------------------------------------------------------

/// Request-scoped channel to the protocol writer, used to surface log lines
/// to the client as `notifications/message`.
#[derive(Debug, Clone)]
pub struct LogChannel {
    tx: mpsc::Sender<serde_json::Value>,
    logger: String,
}

impl LogChannel {
    pub fn new(tx: mpsc::Sender<serde_json::Value>, logger: impl Into<String>) -> Self {
        Self { tx, logger: logger.into() }
    }

    /// Queue a notification without waiting. A full or closed queue drops it.
    pub fn forward(&self, level: Level, message: &str) {
        let note = json!({
            "jsonrpc": "2.0",
            "method": "notifications/message",
            "params": {
                "level": protocol_level(level),
                "logger": self.logger,
                "data": message,
            },
        });
        let _ = self.tx.try_send(note);
    }
}

/// Map a tracing level onto the protocol's syslog-style level names.
pub fn protocol_level(level: Level) -> &'static str {
    match level {
        Level::TRACE | Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warning",
        _ => "error",
    }
}

/// Front door for operation-level diagnostics.
///
/// Every message goes to the tracing subscriber (file, plus the stderr
/// mirror when allowed). In guarded mode it is additionally forwarded over
/// the caller's [`LogChannel`], if one is supplied.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticSink {
    guarded: bool,
}

impl DiagnosticSink {
    pub fn new(guarded: bool) -> Self {
        Self { guarded }
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    pub fn log(&self, level: Level, message: &str, channel: Option<&LogChannel>) {
        match level {
            Level::TRACE => trace!("{message}"),
            Level::DEBUG => debug!("{message}"),
            Level::INFO => info!("{message}"),
            Level::WARN => warn!("{message}"),
            _ => error!("{message}"),
        }
        if self.guarded {
            if let Some(channel) = channel {
                channel.forward(level, message);
            }
        }
    }

    pub fn info(&self, message: &str, channel: Option<&LogChannel>) {
        self.log(Level::INFO, message, channel);
    }

    pub fn error(&self, message: &str, channel: Option<&LogChannel>) {
        self.log(Level::ERROR, message, channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_mutes_targets() {
        let muted = vec!["mio".to_string(), "sysinfo".to_string()];
        let rendered = build_filter("debug", &muted).to_string();
        assert!(rendered.contains("mio=off"));
        assert!(rendered.contains("sysinfo=off"));
    }

    #[test]
    fn config_follows_output_settings() {
        let output = OutputSettings { guarded: false, debug_mode: true, log_dir: PathBuf::from("/var/tmp/bmcp") };
        let cfg = LogConfig::for_output(&output);
        assert_eq!(cfg.log_file, PathBuf::from("/var/tmp/bmcp/bmcp_server.log"));
        assert!(cfg.mirrors_to_stderr());
        assert!(cfg.muted_targets.iter().any(|t| t == "sysinfo"));
    }

    #[test]
    fn stderr_mirror_requires_debug_and_unguarded() {
        let mut cfg = LogConfig {
            level: "info".into(),
            log_file: PathBuf::from("/tmp/unused.log"),
            max_bytes: DEFAULT_MAX_BYTES,
            retention: DEFAULT_RETENTION,
            guarded: true,
            debug_mode: true,
            muted_targets: Vec::new(),
        };
        assert!(!cfg.mirrors_to_stderr());
        cfg.guarded = false;
        assert!(cfg.mirrors_to_stderr());
        cfg.debug_mode = false;
        assert!(!cfg.mirrors_to_stderr());
    }

    #[test]
    fn guarded_sink_forwards_to_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let channel = LogChannel::new(tx, "bmcp");
        DiagnosticSink::new(true).log(Level::WARN, "quota low", Some(&channel));

        let note = rx.try_recv().unwrap();
        assert_eq!(note["method"], "notifications/message");
        assert_eq!(note["params"]["level"], "warning");
        assert_eq!(note["params"]["logger"], "bmcp");
        assert_eq!(note["params"]["data"], "quota low");
    }

    #[test]
    fn unguarded_sink_does_not_forward() {
        let (tx, mut rx) = mpsc::channel(4);
        let channel = LogChannel::new(tx, "bmcp");
        DiagnosticSink::new(false).info("hello", Some(&channel));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_or_closed_channel_is_swallowed() {
        let (tx, rx) = mpsc::channel(1);
        let channel = LogChannel::new(tx, "bmcp");
        let sink = DiagnosticSink::new(true);
        sink.info("one", Some(&channel));
        sink.info("two", Some(&channel));
        drop(rx);
        sink.error("three", Some(&channel));
    }
}
