//! Trade session over the gateway bridge.
//!
//! Opening a session sends `open_trade_context` with the market filter and
//! security firm; every later request carries the session's current trade
//! environment unless the caller set one explicitly.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bmcp_core::TradeEnv;
use bmcp_core::bridge::BridgeClient;
use bmcp_core::config::{Endpoint, TradeSettings};
use bmcp_core::error::{BmcpError, Result};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{Account, TradeConnector, TradeSession, methods};

/// Trade session holding one bridge connection.
pub struct BridgeTradeSession {
    client: BridgeClient,
    env: Mutex<TradeEnv>,
}

impl BridgeTradeSession {
    pub async fn connect(endpoint: &Endpoint, settings: TradeSettings) -> Result<Self> {
        let client = BridgeClient::connect(endpoint, "trade").await?;
        let params = json!({
            "filter_trdmarket": settings.market,
            "trd_market_id": settings.market.upstream_id(),
            "security_firm": settings.firm,
        });
        if let Err(e) = client.call(methods::OPEN_TRADE_CONTEXT, params).await {
            client.close().await;
            return Err(e);
        }
        info!("[trade] context opened — market={}, firm={}", settings.market, settings.firm);
        Ok(Self { client, env: Mutex::new(settings.env) })
    }

    fn current_env(&self) -> TradeEnv {
        self.env.lock().map(|env| *env).unwrap_or_default()
    }
}

/// Fill in `trd_env` on object params that do not carry one.
fn with_env(params: Value, env: TradeEnv) -> Value {
    match params {
        Value::Object(mut map) => {
            map.entry("trd_env").or_insert_with(|| json!(env));
            Value::Object(map)
        }
        Value::Null => json!({ "trd_env": env }),
        other => other,
    }
}

#[async_trait]
impl TradeSession for BridgeTradeSession {
    async fn set_trade_env(&self, env: TradeEnv) -> Result<()> {
        self.client.call(methods::SET_TRADE_ENV, json!({ "trd_env": env })).await?;
        if let Ok(mut current) = self.env.lock() {
            *current = env;
        }
        Ok(())
    }

    async fn account_list(&self) -> Result<Vec<Account>> {
        let data = self.client.call(methods::GET_ACC_LIST, json!({})).await?;
        serde_json::from_value(data).map_err(|e| BmcpError::Protocol(format!("account list: {e}")))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        debug!("[trade] {method}");
        self.client.call(method, with_env(params, self.current_env())).await
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

/// Opens [`BridgeTradeSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeTradeConnector;

#[async_trait]
impl TradeConnector for BridgeTradeConnector {
    async fn open(&self, endpoint: &Endpoint, settings: TradeSettings) -> Result<Arc<dyn TradeSession>> {
        Ok(Arc::new(BridgeTradeSession::connect(endpoint, settings).await?))
    }
}
