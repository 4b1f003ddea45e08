//! # bmcp-server
//!
//! Process lifecycle and request serving for the bmcp server:
//!
//! - [`app`]: lock, bring-up, serve and teardown in startup order
//! - [`supervisor`]: quote/trade session bring-up and shutdown
//! - [`lifecycle`]: run-once teardown coordinator
//! - [`signals`]: SIGINT/SIGTERM delivery
//! - [`protocol`]: JSON-RPC serve loop on stdio
//! - [`operations`]: tools and prompts
//! - [`cli`]: command-line flags

pub mod app;
pub mod cli;
pub mod lifecycle;
pub mod operations;
pub mod protocol;
pub mod signals;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;
