//! Everything between "logging is up" and "teardown is done".
//!
//! ```text
//! reap stale ─► lock ─► quote (mandatory) ─► trade (if enabled) ─► serve ─► teardown
//!                  │            │                                      │
//!                  └─ exit 1    └─ teardown, exit 1       signal ──────┴─► teardown, exit 0
//! ```
//!
//! [`run`] reports the exit status instead of exiting; the binary owns the
//! process. Signal handlers are installed by the caller before `run` starts,
//! so a signal during the reap or the lock is held until the first stage
//! that listens for it.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use bmcp_core::config::ServerConfig;
use bmcp_core::lock::InstanceLock;
use bmcp_core::logging::DiagnosticSink;
use bmcp_core::output_guard::GuardedWriter;
use bmcp_core::stdio::StderrCapture;
use tokio::io::AsyncBufRead;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{Lifecycle, SignalAction, TeardownRace};
use crate::operations::OpContext;
use crate::protocol::{Server, ServerInfo};
use crate::signals::ShutdownSignals;
use crate::supervisor::Supervisor;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Take the instance lock, bring the sessions up, serve `reader`/`writer`
/// until EOF or a signal, then tear down. Returns the process exit status.
pub async fn run<R, W>(
    cfg: ServerConfig,
    supervisor: Arc<Supervisor>,
    mut signals: ShutdownSignals,
    info: ServerInfo,
    reader: R,
    writer: W,
) -> u8
where
    R: AsyncBufRead + Unpin,
    W: Write + Send + 'static,
{
    // 1. Reap a stale instance, then take the lock
    let mut lock = InstanceLock::from_config(&cfg);
    lock.reap_stale();
    if let Err(e) = lock.acquire() {
        error!("startup aborted: {e}");
        return EXIT_FAILURE;
    }
    let lifecycle = Lifecycle::new(Arc::clone(&supervisor), lock);

    // 2. Quote session, capturing gateway chatter on stderr
    let capture = if cfg.guarded { capture_stderr(&cfg) } else { None };
    let quote = until_signal(&mut signals, supervisor.init_quote()).await;
    drop(capture);
    match quote {
        None => return shutdown(&lifecycle, &mut signals, EXIT_OK).await,
        Some(Err(e)) => {
            error!("startup aborted: quote connection failed — {e}");
            return shutdown(&lifecycle, &mut signals, EXIT_FAILURE).await;
        }
        Some(Ok(())) => {}
    }

    // 3. Trade session: eager when trading is enabled, otherwise on first use
    if cfg.enable_trading {
        match until_signal(&mut signals, supervisor.init_trade(cfg.trade)).await {
            None => return shutdown(&lifecycle, &mut signals, EXIT_OK).await,
            Some(Err(e)) => warn!("trade session unavailable, will retry on demand — {e}"),
            Some(Ok(())) => {}
        }
    }

    // 4. Serve until input closes or a signal arrives
    let server = Server::new(OpContext::new(Arc::clone(&supervisor), DiagnosticSink::new(cfg.guarded)), info);
    let writer = if cfg.guarded { GuardedWriter::new(writer) } else { GuardedWriter::passthrough(writer) };
    let code = match until_signal(&mut signals, server.serve(reader, writer)).await {
        None | Some(Ok(())) => EXIT_OK,
        Some(Err(e)) => {
            error!("serve loop failed: {e:#}");
            EXIT_FAILURE
        }
    };

    // 5. Teardown
    shutdown(&lifecycle, &mut signals, code).await
}

/// Run `fut` unless a shutdown signal arrives first.
async fn until_signal<F: Future>(signals: &mut ShutdownSignals, fut: F) -> Option<F::Output> {
    tokio::select! {
        out = fut => Some(out),
        name = signals.recv() => {
            info!("{name} received");
            None
        }
    }
}

/// Run teardown; a signal that finds it already underway abandons it with
/// status 1.
async fn shutdown(lifecycle: &Lifecycle, signals: &mut ShutdownSignals, code: u8) -> u8 {
    let interrupt = async {
        loop {
            let name = signals.recv().await;
            match lifecycle.on_signal() {
                SignalAction::ForceExit => {
                    warn!("{name} received during shutdown");
                    return;
                }
                SignalAction::Teardown => debug!("{name} received before teardown started"),
            }
        }
    };
    match lifecycle.teardown_or(interrupt).await {
        TeardownRace::Completed(_) => code,
        TeardownRace::Interrupted => EXIT_FAILURE,
    }
}

fn capture_stderr(cfg: &ServerConfig) -> Option<StderrCapture> {
    match StderrCapture::to_file(&cfg.connection_log_file()) {
        Ok(capture) => Some(capture),
        Err(e) => {
            warn!("could not capture stderr to {}: {e}", cfg.connection_log_file().display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bmcp_core::ConnState;
    use tokio::io::{AsyncWriteExt, BufReader, duplex};

    use super::*;
    use crate::testing::{MockQuote, MockTrade, SharedBuf, supervisor_with, test_config};

    const INFO: ServerInfo = ServerInfo { name: "bmcp-server", version: "0.0.0-test" };
    const PING: &[u8] = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";

    fn config_in(dir: &Path) -> ServerConfig {
        let root = dir.to_string_lossy().into_owned();
        ServerConfig::from_lookup(|key| match key {
            "PROJECT_ROOT" => Some(root.clone()),
            "MCP_MODE" => Some("0".into()),
            _ => None,
        })
        .unwrap()
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn dead_pid_is_reaped_then_quote_ready() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let mut child = Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        fs::write(cfg.pid_file(), dead_pid.to_string()).unwrap();
        fs::write(cfg.lock_file(), "").unwrap();

        let quote = MockQuote::ready();
        let sup = Arc::new(supervisor_with(quote.clone(), MockTrade::with_accounts(1)));
        let (_tx, signals) = ShutdownSignals::channel();
        let (mut client, input) = duplex(4096);
        let out = SharedBuf::default();
        let pid_file = cfg.pid_file();

        let running = run(cfg, Arc::clone(&sup), signals, INFO, BufReader::new(input), out.clone());
        let drive = {
            let (out, sup, pid_file) = (out.clone(), Arc::clone(&sup), pid_file.clone());
            async move {
                client.write_all(PING).await.unwrap();
                wait_for(|| !out.is_empty()).await;
                assert_eq!(fs::read_to_string(&pid_file).unwrap(), std::process::id().to_string());
                assert_eq!(sup.quote_handle().await.state, ConnState::Ready);
                // Closing the client ends the serve loop.
                drop(client);
            }
        };
        let (code, ()) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(running, drive) })
            .await
            .unwrap();

        assert_eq!(code, EXIT_OK);
        assert_eq!(out.messages()[0]["id"], 1);
        assert_eq!(quote.opens.load(Ordering::SeqCst), 2);
        assert!(!pid_file.exists());
        assert_eq!(sup.quote_handle().await.state, ConnState::Closed);
    }

    #[tokio::test]
    async fn quote_not_ready_exits_with_failure_and_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let (lock_file, pid_file) = (cfg.lock_file(), cfg.pid_file());
        let sup = Arc::new(supervisor_with(MockQuote::not_ready(), MockTrade::with_accounts(1)));
        let (_tx, signals) = ShutdownSignals::channel();
        let out = SharedBuf::default();

        let code = run(cfg, Arc::clone(&sup), signals, INFO, &b""[..], out.clone()).await;

        assert_eq!(code, EXIT_FAILURE);
        assert!(out.is_empty());
        assert!(!lock_file.exists());
        assert!(!pid_file.exists());
        assert_eq!(sup.quote_handle().await.state, ConnState::Closed);
    }

    #[tokio::test]
    async fn signal_while_input_stays_open_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let lock_file = cfg.lock_file();
        let quote = MockQuote::ready();
        let sup = Arc::new(supervisor_with(quote.clone(), MockTrade::with_accounts(1)));
        let (tx, signals) = ShutdownSignals::channel();
        let (mut client, input) = duplex(4096);
        let out = SharedBuf::default();

        let running = run(cfg, sup, signals, INFO, BufReader::new(input), out.clone());
        let drive = {
            let out = out.clone();
            async move {
                client.write_all(PING).await.unwrap();
                wait_for(|| !out.is_empty()).await;
                tx.send("SIGTERM").unwrap();
                // Handed back so the input is still open when `run` returns.
                client
            }
        };
        let (code, _client) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(running, drive) })
            .await
            .unwrap();

        assert_eq!(code, EXIT_OK);
        assert!(!lock_file.exists());
        // Readiness check session plus the long-lived one closed at teardown.
        assert_eq!(quote.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_signal_abandons_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let sup = Supervisor::new(&test_config(), MockQuote::ready(), MockTrade::with_accounts(1))
            .with_timings(Duration::ZERO, Duration::from_secs(30));
        let (tx, signals) = ShutdownSignals::channel();
        let (mut client, input) = duplex(4096);
        let out = SharedBuf::default();

        let running = run(cfg, Arc::new(sup), signals, INFO, BufReader::new(input), out.clone());
        let drive = {
            let out = out.clone();
            async move {
                client.write_all(PING).await.unwrap();
                wait_for(|| !out.is_empty()).await;
                tx.send("SIGTERM").unwrap();
                tx.send("SIGINT").unwrap();
                client
            }
        };
        let (code, _client) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(running, drive) })
            .await
            .unwrap();

        assert_eq!(code, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn signal_before_quote_bring_up_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let lock_file = cfg.lock_file();
        let quote = MockQuote::ready();
        let sup = Arc::new(supervisor_with(quote.clone(), MockTrade::with_accounts(1)));
        let (tx, signals) = ShutdownSignals::channel();
        // Delivered while the reap and the lock are still running.
        tx.send("SIGTERM").unwrap();

        let (_client, input) = duplex(4096);
        let code = run(cfg, sup, signals, INFO, BufReader::new(input), SharedBuf::default()).await;

        assert_eq!(code, EXIT_OK);
        assert!(!lock_file.exists());
    }
}
