//! Quote session over the gateway bridge.

use std::sync::Arc;

use async_trait::async_trait;
use bmcp_core::bridge::BridgeClient;
use bmcp_core::config::Endpoint;
use bmcp_core::error::{BmcpError, Result};
use serde_json::{Value, json};
use tracing::debug;

use crate::{GlobalState, QuoteConnector, QuoteSession, methods};

/// Quote session holding one bridge connection.
pub struct BridgeQuoteSession {
    client: BridgeClient,
}

impl BridgeQuoteSession {
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let client = BridgeClient::connect(endpoint, "quote").await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl QuoteSession for BridgeQuoteSession {
    async fn global_state(&self) -> Result<GlobalState> {
        let data = self.client.call(methods::GET_GLOBAL_STATE, json!({})).await?;
        serde_json::from_value(data).map_err(|e| BmcpError::Protocol(format!("global state: {e}")))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        debug!("[quote] {method}");
        self.client.call(method, params).await
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

/// Opens [`BridgeQuoteSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeQuoteConnector;

#[async_trait]
impl QuoteConnector for BridgeQuoteConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn QuoteSession>> {
        Ok(Arc::new(BridgeQuoteSession::connect(endpoint).await?))
    }
}
