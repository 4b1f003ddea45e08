//! # bmcp-server
//!
//! Entry point for the market data / brokerage server.
//!
//! Startup order matters: guarded mode is entered and logging is up before
//! the rest of the configuration is parsed, signal handlers are installed
//! before the single-instance lock is taken, and every exit path after the
//! lock runs the same teardown sequence (see [`bmcp_server::app`]).
//!
//! # Usage
//!
//! ```bash
//! bmcp-server                       # serve JSON-RPC on stdio
//! bmcp-server --log-dir /tmp/logs   # same, logging elsewhere
//! bmcp-server --version
//! ```

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use bmcp_core::config::{OutputSettings, ServerConfig};
use bmcp_core::logging::{LogConfig, LogGuard, init_logging};
use bmcp_core::stdio::silence_stderr;
use bmcp_server::app;
use bmcp_server::cli::Cli;
use bmcp_server::protocol::ServerInfo;
use bmcp_server::signals::ShutdownSignals;
use bmcp_server::supervisor::Supervisor;
use clap::Parser;
use clap::error::ErrorKind;
use tokio::io::BufReader;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // 1. Parse the command line (help/version never enter guarded mode)
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    // 2. Output settings: guarded mode and where the logs go
    let mut output = OutputSettings::from_env();
    if let Some(dir) = &cli.log_dir {
        output = output.with_log_dir(dir);
    }

    // 3. Enter guarded mode
    let _saved_stderr = if output.guarded {
        match silence_stderr() {
            Ok(fd) => Some(fd),
            Err(_) => return ExitCode::FAILURE,
        }
    } else {
        None
    };

    // 4. Initialize logging
    let log_guard = init_logging(&LogConfig::for_output(&output));

    // 5. Load the rest of the configuration
    let cfg = match ServerConfig::from_env() {
        Ok(cfg) => cfg.with_output(&output),
        Err(e) => {
            error!("startup aborted: {e}");
            return exit(log_guard, app::EXIT_FAILURE);
        }
    };
    info!(
        "bmcp-server {VERSION} starting — upstream={}, guarded={}, trading={}",
        cfg.endpoint, cfg.guarded, cfg.enable_trading
    );

    // 6. Signal handlers, before the stale reap and the lock
    let signals = match ShutdownSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("failed to install signal handlers: {e}");
            return exit(log_guard, app::EXIT_FAILURE);
        }
    };

    // 7. Lock, bring-up, serve, teardown
    let supervisor = Arc::new(Supervisor::with_bridge(&cfg));
    let code = app::run(
        cfg,
        supervisor,
        signals,
        ServerInfo { name: "bmcp-server", version: VERSION },
        BufReader::new(tokio::io::stdin()),
        io::stdout(),
    )
    .await;

    // 8. Exit without dropping the runtime: a pending stdin read sits on a
    // blocking thread that runtime shutdown would wait on forever.
    exit(log_guard, code)
}

/// Flush the log and end the process with `code`.
fn exit(log_guard: LogGuard, code: u8) -> ! {
    drop(log_guard);
    std::process::exit(i32::from(code))
}
