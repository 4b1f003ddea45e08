//! Command-line interface.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

const ENV_HELP: &str = "\
Environment variables:
  UPSTREAM_HOST     Gateway host (default: 127.0.0.1)
  UPSTREAM_PORT     Gateway port (default: 11111)
  ENABLE_TRADING    Open the trade session at startup: 1 or 0 (default: 0)
  TRADE_ENV         SIMULATE or REAL (default: SIMULATE)
  SECURITY_FIRM     FUTUSECURITIES or FUTUINC (default: FUTUSECURITIES)
  TRD_MARKET        HK or US (default: HK)
  DEBUG_MODE        Mirror logs to stderr when not guarded: 1 or 0 (default: 0)
  MCP_MODE          Guarded stdio mode: 1 or 0 (default: 1)
  PROJECT_ROOT      Directory for the instance lock and PID files
  RUST_LOG          Log filter override";

/// Market data and brokerage server speaking JSON-RPC on stdio.
#[derive(Debug, Parser)]
#[command(
    name = "bmcp-server",
    version,
    about = "Market data and brokerage server speaking JSON-RPC on stdio",
    after_help = ENV_HELP,
    disable_version_flag = true
)]
pub struct Cli {
    /// Print version and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,

    /// Directory for log files (default: ~/logs).
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
