//! Typed error definitions for the bmcp server.
//!
//! Provides [`BmcpError`], the domain taxonomy shared by the lock manager,
//! the connection supervisor and the operation layer. All variants implement
//! `std::error::Error` via `thiserror`, so they integrate with
//! `anyhow::Result` at the binary boundary.
//!
//! Propagation follows the stage the error belongs to:
//!
//! | Stage    | Variants                                                  | Effect                    |
//! |----------|-----------------------------------------------------------|---------------------------|
//! | startup  | `AlreadyRunning`, `LockAcquisitionFailed`, `UpstreamUnavailable` | logged, exit code 1 |
//! | trading  | `AccountQueryFailed`, `NoAccounts`                        | error envelope to caller  |
//! | cleanup  | `StaleProcessReapFailed`                                  | logged and swallowed      |

use thiserror::Error;

/// Domain-specific errors for the bmcp server.
#[derive(Debug, Error)]
pub enum BmcpError {
    /// Another live instance holds the lock. The PID is known when it was
    /// read from the PID file, unknown when only the `flock` was contended.
    #[error("another instance is already running (pid: {})", fmt_pid(.0))]
    AlreadyRunning(Option<u32>),

    /// The lock file could not be opened or locked for a reason other than
    /// contention.
    #[error("failed to acquire instance lock: {0}")]
    LockAcquisitionFailed(String),

    /// The upstream gateway is unreachable or reports it is not ready.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The trade session's account query itself failed.
    #[error("account query failed: {0}")]
    AccountQueryFailed(String),

    /// The account query succeeded but returned no accounts.
    #[error("no trading accounts available")]
    NoAccounts,

    /// Best-effort cleanup of a stale instance failed.
    #[error("stale process reap failed: {0}")]
    StaleProcessReapFailed(String),

    /// The upstream returned a non-OK code for a request.
    #[error("{0}")]
    Upstream(String),

    /// A session was requested before it reached `Ready`.
    #[error("{0} session is not ready")]
    NotReady(&'static str),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed frame on the bridge or the protocol channel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation argument failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_pid(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => pid.to_string(),
        None => "unknown".into(),
    }
}

pub type Result<T> = std::result::Result<T, BmcpError>;
