//! # bmcp-td
//!
//! Trade (account) sessions against the upstream gateway.
//!
//! Trade sessions are optional and opened lazily by the connection
//! supervisor on the first account operation. The lifecycle is:
//! `TradeConnector::open()` → [`set_trade_env`](TradeSession::set_trade_env)
//! → [`account_list`](TradeSession::account_list) → requests → `close()`.
//!
//! - [`bridge`]: session backed by the gateway bridge
//! - [`methods`]: upstream method names

pub mod bridge;
pub mod methods;

use std::sync::Arc;

use async_trait::async_trait;
use bmcp_core::config::{Endpoint, TradeSettings};
use bmcp_core::error::Result;
use bmcp_core::TradeEnv;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One trading account as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub acc_id: u64,
    #[serde(default)]
    pub acc_type: String,
    #[serde(default)]
    pub acc_state: String,
    pub trd_env: TradeEnv,
    /// Markets the account may trade; may name markets beyond [`TrdMarket`](bmcp_core::TrdMarket).
    #[serde(default)]
    pub trd_market_auth: Vec<String>,
}

/// An open trade session.
///
/// All methods take `&self` so the session can be shared as
/// `Arc<dyn TradeSession>` between the supervisor and in-flight operations.
#[async_trait]
pub trait TradeSession: Send + Sync {
    /// Select simulated or real trading for subsequent requests.
    async fn set_trade_env(&self, env: TradeEnv) -> Result<()>;

    /// Accounts visible to this session.
    async fn account_list(&self) -> Result<Vec<Account>>;

    /// Issue a trade-side request.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Close the session. Must tolerate repeated calls.
    async fn close(&self);
}

/// Factory for trade sessions scoped to a market and security firm.
#[async_trait]
pub trait TradeConnector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint, settings: TradeSettings) -> Result<Arc<dyn TradeSession>>;
}
