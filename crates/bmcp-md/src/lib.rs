//! # bmcp-md
//!
//! Quote (market-data) sessions against the upstream gateway.
//!
//! A quote session is mandatory for the server: it is opened at startup and
//! kept for the lifetime of the process. Callers only see the
//! [`QuoteSession`] trait; [`QuoteConnector`] is the factory the connection
//! supervisor opens sessions through, so tests can substitute in-memory
//! sessions.
//!
//! - [`bridge`]: session backed by the gateway bridge
//! - [`kline`]: K-line and subscription type enums
//! - [`methods`]: upstream method names

pub mod bridge;
pub mod kline;
pub mod methods;

use std::sync::Arc;

use async_trait::async_trait;
use bmcp_core::config::Endpoint;
use bmcp_core::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use kline::{KlineType, SubType};

/// Gateway login/readiness report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Quote login completed; the session can serve requests.
    #[serde(default)]
    pub qot_logined: bool,
    #[serde(default)]
    pub trd_logined: bool,
    #[serde(default)]
    pub server_ver: Option<String>,
    #[serde(default)]
    pub market_hk: Option<String>,
    #[serde(default)]
    pub market_us: Option<String>,
}

/// An open quote session.
///
/// All methods take `&self`; sessions are shared as `Arc<dyn QuoteSession>`
/// and must serialize their own upstream traffic.
#[async_trait]
pub trait QuoteSession: Send + Sync {
    /// Query the gateway's readiness.
    async fn global_state(&self) -> Result<GlobalState>;

    /// Issue a quote request. Non-OK upstream codes surface as
    /// [`bmcp_core::error::BmcpError::Upstream`].
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Close the session. Must tolerate repeated calls.
    async fn close(&self);
}

/// Factory for quote sessions.
#[async_trait]
pub trait QuoteConnector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn QuoteSession>>;
}
