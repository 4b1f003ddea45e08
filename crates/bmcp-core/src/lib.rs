//! # bmcp-core
//!
//! Core crate for the bmcp market-data and brokerage server, providing:
//!
//! - **Types** (`types`): trade env / firm / market enums, symbol utils
//! - **Configuration** (`config`): environment-driven server settings
//! - **Error types** (`error`): domain-specific `BmcpError` via thiserror
//! - **Output guard** (`output_guard`): stdout filter for guarded mode
//! - **Stdio control** (`stdio`): fd-level stderr silencing and capture
//! - **Logging** (`logging`): tracing-based diagnostic sink
//! - **Rotation** (`rotating`): size-rotated log file writer
//! - **Instance lock** (`lock`): lock + PID file single-instance guard
//! - **Process probing** (`process`): liveness, command line, termination
//! - **Bridge** (`bridge`): newline-delimited JSON client for the gateway

pub mod bridge;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod output_guard;
pub mod process;
pub mod rotating;
pub mod stdio;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
