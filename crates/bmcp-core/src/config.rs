//! Configuration for the bmcp server.
//!
//! All settings come from environment variables; the server takes no config
//! file. Reading goes through a lookup closure so tests can build a config
//! from a plain map without touching the process environment.
//!
//! | Variable         | Default          | Meaning                                   |
//! |------------------|------------------|-------------------------------------------|
//! | `UPSTREAM_HOST`  | `127.0.0.1`      | gateway host                              |
//! | `UPSTREAM_PORT`  | `11111`          | gateway port                              |
//! | `ENABLE_TRADING` | `0`              | bring the trade session up at startup     |
//! | `TRADE_ENV`      | `SIMULATE`       | `SIMULATE` or `REAL`                      |
//! | `SECURITY_FIRM`  | `FUTUSECURITIES` | `FUTUSECURITIES` or `FUTUINC`             |
//! | `TRD_MARKET`     | `HK`             | `HK` or `US`                              |
//! | `DEBUG_MODE`     | `0`              | mirror diagnostics to stderr when unguarded |
//! | `MCP_MODE`       | `1`              | guarded mode (stdout reserved for protocol) |
//! | `PROJECT_ROOT`   | executable dir   | where the lock and PID files live         |

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{BmcpError, Result};
use crate::types::{SecurityFirm, TradeEnv, TrdMarket, parse_or_default};

/// Default gateway port.
pub const DEFAULT_PORT: u16 = 11111;

/// Default gateway host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Program identity matched against other processes' command lines.
pub const PROGRAM_IDENTITY: &str = "bmcp-server";

/// Service name used for log file names.
pub const SERVICE_NAME: &str = "bmcp_server";

/// Host/port of the upstream gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parameters a trade session is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TradeSettings {
    pub env: TradeEnv,
    pub firm: SecurityFirm,
    pub market: TrdMarket,
}

/// What has to be known before the first log line: whether stdio is
/// guarded, whether to mirror to stderr, and where log files go.
///
/// Reading these never fails, so logging can be up before the rest of the
/// configuration is parsed and any problem with it gets logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub guarded: bool,
    pub debug_mode: bool,
    pub log_dir: PathBuf,
}

impl OutputSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            guarded: flag(lookup("MCP_MODE"), true),
            debug_mode: flag(lookup("DEBUG_MODE"), false),
            log_dir: default_log_dir(),
        }
    }

    /// Override the log directory (CLI `--log-dir`).
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(format!("{SERVICE_NAME}.log"))
    }

    /// Capture file for upstream-library output during connection bring-up.
    pub fn connection_log_file(&self) -> PathBuf {
        self.log_dir.join(format!("{SERVICE_NAME}_connection.log"))
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Gateway endpoint shared by quote and trade sessions.
    pub endpoint: Endpoint,
    /// Open the trade session eagerly at startup.
    pub enable_trading: bool,
    /// Settings for the (lazy) trade session.
    pub trade: TradeSettings,
    /// Mirror diagnostics to stderr (only honored when not guarded).
    pub debug_mode: bool,
    /// Guarded mode: stdout carries protocol messages only, stderr is silent.
    pub guarded: bool,
    /// Directory holding `.instance.lock` and `.instance.pid`.
    pub project_root: PathBuf,
    /// Directory for the diagnostic and connection logs.
    pub log_dir: PathBuf,
    /// Identity string other instances are recognized by.
    pub identity: String,
}

impl ServerConfig {
    /// Build the config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("UPSTREAM_HOST").unwrap_or_else(|| DEFAULT_HOST.into());
        let port = match lookup("UPSTREAM_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| BmcpError::Config(format!("UPSTREAM_PORT={raw:?}: {e}")))?,
            None => DEFAULT_PORT,
        };

        let trade = TradeSettings {
            env: lookup("TRADE_ENV").map(|raw| parse_or_default("TRADE_ENV", &raw)).unwrap_or_default(),
            firm: lookup("SECURITY_FIRM").map(|raw| parse_or_default("SECURITY_FIRM", &raw)).unwrap_or_default(),
            market: lookup("TRD_MARKET").map(|raw| parse_or_default("TRD_MARKET", &raw)).unwrap_or_default(),
        };

        let project_root = match lookup("PROJECT_ROOT") {
            Some(dir) => PathBuf::from(dir),
            None => default_project_root(),
        };

        let output = OutputSettings::from_lookup(&lookup);
        Ok(Self {
            endpoint: Endpoint::new(host, port),
            enable_trading: flag(lookup("ENABLE_TRADING"), false),
            trade,
            debug_mode: output.debug_mode,
            guarded: output.guarded,
            project_root,
            log_dir: output.log_dir,
            identity: PROGRAM_IDENTITY.into(),
        })
    }

    pub fn lock_file(&self) -> PathBuf {
        self.project_root.join(".instance.lock")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.project_root.join(".instance.pid")
    }

    /// The output half of this config.
    pub fn output(&self) -> OutputSettings {
        OutputSettings { guarded: self.guarded, debug_mode: self.debug_mode, log_dir: self.log_dir.clone() }
    }

    pub fn log_file(&self) -> PathBuf {
        self.output().log_file()
    }

    pub fn connection_log_file(&self) -> PathBuf {
        self.output().connection_log_file()
    }

    /// Take guarded mode, debug mode and the log directory from `output`.
    pub fn with_output(mut self, output: &OutputSettings) -> Self {
        self.guarded = output.guarded;
        self.debug_mode = output.debug_mode;
        self.log_dir = output.log_dir.clone();
        self
    }
}

/// `"1"` is on, `"0"` is off, anything else (or unset) keeps the default.
fn flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::trim) {
        Some("1") => true,
        Some("0") => false,
        _ => default,
    }
}

fn default_project_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `<home>/logs`, or `./logs` when the home directory is unknown.
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join("logs")
}
