//! Connection supervisor for the quote and trade sessions.
//!
//! ```text
//! quote:  Uninitialized ──init_quote()──► Connecting ──► Ready ──shutdown()──► Closed
//!                                             └──────► Failed   (fatal at startup)
//!
//! trade:  Uninitialized ──init_trade()──► Connecting ──► Ready ──shutdown()──► Closed
//!               ▲                              │
//!               └────────── any failure ───────┘   (retried on next use)
//! ```
//!
//! The quote session is mandatory and brought up once at startup behind a
//! readiness probe. The trade session is opened lazily on the first account
//! operation (or eagerly when trading is enabled) and concurrent
//! initializations are serialized by the trade slot's mutex.

use std::sync::Arc;
use std::time::Duration;

use bmcp_core::ConnState;
use bmcp_core::config::{Endpoint, ServerConfig, TradeSettings};
use bmcp_core::error::{BmcpError, Result};
use bmcp_md::bridge::BridgeQuoteConnector;
use bmcp_md::{QuoteConnector, QuoteSession};
use bmcp_td::bridge::BridgeTradeConnector;
use bmcp_td::{TradeConnector, TradeSession};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Wait between opening a trade session and using it.
pub const TRADE_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Pause after closing sessions so the gateway sees the disconnects.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Observable state of one upstream session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionHandle {
    pub state: ConnState,
    pub endpoint: Endpoint,
    pub last_error: Option<String>,
}

impl ConnectionHandle {
    fn new(endpoint: Endpoint) -> Self {
        Self { state: ConnState::Uninitialized, endpoint, last_error: None }
    }
}

struct Slot<S: ?Sized> {
    handle: ConnectionHandle,
    session: Option<Arc<S>>,
}

impl<S: ?Sized> Slot<S> {
    fn new(endpoint: Endpoint) -> Self {
        Self { handle: ConnectionHandle::new(endpoint), session: None }
    }
}

/// Owns the quote and trade sessions.
pub struct Supervisor {
    endpoint: Endpoint,
    trade_settings: TradeSettings,
    trading_enabled: bool,
    quote_connector: Arc<dyn QuoteConnector>,
    trade_connector: Arc<dyn TradeConnector>,
    quote: Mutex<Slot<dyn QuoteSession>>,
    trade: Mutex<Slot<dyn TradeSession>>,
    settle_delay: Duration,
    shutdown_grace: Duration,
}

impl Supervisor {
    pub fn new(
        cfg: &ServerConfig,
        quote_connector: Arc<dyn QuoteConnector>,
        trade_connector: Arc<dyn TradeConnector>,
    ) -> Self {
        Self {
            endpoint: cfg.endpoint.clone(),
            trade_settings: cfg.trade,
            trading_enabled: cfg.enable_trading,
            quote_connector,
            trade_connector,
            quote: Mutex::new(Slot::new(cfg.endpoint.clone())),
            trade: Mutex::new(Slot::new(cfg.endpoint.clone())),
            settle_delay: TRADE_SETTLE_DELAY,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Supervisor talking to the gateway bridge.
    pub fn with_bridge(cfg: &ServerConfig) -> Self {
        Self::new(cfg, Arc::new(BridgeQuoteConnector), Arc::new(BridgeTradeConnector))
    }

    pub fn with_timings(mut self, settle_delay: Duration, shutdown_grace: Duration) -> Self {
        self.settle_delay = settle_delay;
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn trading_enabled(&self) -> bool {
        self.trading_enabled
    }

    pub fn trade_settings(&self) -> TradeSettings {
        self.trade_settings
    }

    // -----------------------------------------------------------------------
    // Quote session
    // -----------------------------------------------------------------------

    /// Bring up the quote session.
    ///
    /// A probe session checks `qot_logined` first; only then is the long-lived
    /// session opened. Any failure leaves the slot `Failed` with no open
    /// sessions and is fatal for the caller.
    pub async fn init_quote(&self) -> Result<()> {
        let mut slot = self.quote.lock().await;
        if slot.handle.state == ConnState::Ready && slot.session.is_some() {
            return Ok(());
        }
        slot.handle.state = ConnState::Connecting;
        info!("[quote] connecting — {}", self.endpoint);

        match self.open_quote().await {
            Ok(session) => {
                slot.session = Some(session);
                slot.handle.state = ConnState::Ready;
                slot.handle.last_error = None;
                info!("[quote] session ready");
                Ok(())
            }
            Err(e) => {
                error!("[quote] initialization failed — {e}");
                slot.session = None;
                slot.handle.state = ConnState::Failed;
                slot.handle.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn open_quote(&self) -> Result<Arc<dyn QuoteSession>> {
        let probe = self.quote_connector.open(&self.endpoint).await?;
        let state = probe.global_state().await;
        probe.close().await;
        let state = state?;
        if !state.qot_logined {
            return Err(BmcpError::UpstreamUnavailable("gateway reports quote login incomplete".into()));
        }
        self.quote_connector.open(&self.endpoint).await
    }

    /// The live quote session, for the duration of one operation.
    pub async fn quote_session(&self) -> Result<Arc<dyn QuoteSession>> {
        let slot = self.quote.lock().await;
        match (&slot.session, slot.handle.state) {
            (Some(session), ConnState::Ready) => Ok(Arc::clone(session)),
            _ => Err(BmcpError::NotReady("quote")),
        }
    }

    pub async fn quote_handle(&self) -> ConnectionHandle {
        self.quote.lock().await.handle.clone()
    }

    // -----------------------------------------------------------------------
    // Trade session
    // -----------------------------------------------------------------------

    /// Bring up the trade session with `settings`. No-op when already ready.
    ///
    /// Failures close whatever was opened and reset the slot to
    /// `Uninitialized`, so the next trade operation retries.
    pub async fn init_trade(&self, settings: TradeSettings) -> Result<()> {
        let mut slot = self.trade.lock().await;
        if slot.handle.state == ConnState::Ready && slot.session.is_some() {
            return Ok(());
        }
        slot.handle.state = ConnState::Connecting;
        info!("[trade] connecting — {}, market={}, firm={}", self.endpoint, settings.market, settings.firm);

        match self.open_trade(settings).await {
            Ok(session) => {
                slot.session = Some(session);
                slot.handle.state = ConnState::Ready;
                slot.handle.last_error = None;
                info!("[trade] session ready — env={}, market={}", settings.env, settings.market);
                Ok(())
            }
            Err(e) => {
                warn!("[trade] initialization failed — {e}");
                slot.session = None;
                slot.handle.state = ConnState::Uninitialized;
                slot.handle.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn open_trade(&self, settings: TradeSettings) -> Result<Arc<dyn TradeSession>> {
        let session = self.trade_connector.open(&self.endpoint, settings).await?;
        tokio::time::sleep(self.settle_delay).await;

        if let Err(e) = session.set_trade_env(settings.env).await {
            warn!("[trade] failed to set trade env {}: {e}", settings.env);
        }

        let accounts = match session.account_list().await {
            Ok(accounts) => accounts,
            Err(e) => {
                session.close().await;
                return Err(BmcpError::AccountQueryFailed(e.to_string()));
            }
        };
        if accounts.is_empty() {
            session.close().await;
            return Err(BmcpError::NoAccounts);
        }

        info!("[trade] found {} account(s)", accounts.len());
        for acc in &accounts {
            info!(
                "[trade] account {} — type={}, state={}, env={}",
                acc.acc_id, acc.acc_type, acc.acc_state, acc.trd_env
            );
        }
        Ok(session)
    }

    /// Lazily initialize the trade session with the configured settings and
    /// return it.
    pub async fn ensure_trade(&self) -> Result<Arc<dyn TradeSession>> {
        self.init_trade(self.trade_settings).await?;
        self.trade_session().await.ok_or(BmcpError::NotReady("trade"))
    }

    pub async fn trade_session(&self) -> Option<Arc<dyn TradeSession>> {
        let slot = self.trade.lock().await;
        match slot.handle.state {
            ConnState::Ready => slot.session.clone(),
            _ => None,
        }
    }

    pub async fn trade_handle(&self) -> ConnectionHandle {
        self.trade.lock().await.handle.clone()
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Close both sessions, each independently of the other, then wait the
    /// shutdown grace period.
    pub async fn shutdown(&self) {
        let quote = {
            let mut slot = self.quote.lock().await;
            slot.handle.state = ConnState::Closed;
            slot.session.take()
        };
        if let Some(session) = quote {
            session.close().await;
            info!("[quote] session closed");
        }

        let trade = {
            let mut slot = self.trade.lock().await;
            slot.handle.state = ConnState::Closed;
            slot.session.take()
        };
        if let Some(session) = trade {
            session.close().await;
            info!("[trade] session closed");
        }

        tokio::time::sleep(self.shutdown_grace).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bmcp_core::TradeEnv;

    use super::*;
    use crate::testing::{AccountsReply, MockQuote, MockTrade, supervisor_with};

    #[tokio::test]
    async fn quote_ready_after_probe() {
        let quote = MockQuote::ready();
        let sup = supervisor_with(quote.clone(), MockTrade::with_accounts(1));

        sup.init_quote().await.unwrap();
        let handle = sup.quote_handle().await;
        assert_eq!(handle.state, ConnState::Ready);
        assert!(handle.last_error.is_none());
        // Probe plus the long-lived session; only the probe is closed.
        assert_eq!(quote.opens.load(Ordering::SeqCst), 2);
        assert_eq!(quote.closes.load(Ordering::SeqCst), 1);
        assert!(sup.quote_session().await.is_ok());
    }

    #[tokio::test]
    async fn quote_not_logged_in_fails() {
        let quote = MockQuote::not_ready();
        let sup = supervisor_with(quote.clone(), MockTrade::with_accounts(1));

        let err = sup.init_quote().await.unwrap_err();
        assert!(matches!(err, BmcpError::UpstreamUnavailable(_)));
        assert_eq!(sup.quote_handle().await.state, ConnState::Failed);
        // Only the probe was opened, and it was closed.
        assert_eq!(quote.opens.load(Ordering::SeqCst), 1);
        assert_eq!(quote.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(sup.quote_session().await, Err(BmcpError::NotReady("quote"))));
    }

    #[tokio::test]
    async fn quote_unreachable_fails() {
        let quote = MockQuote::unreachable();
        let sup = supervisor_with(quote.clone(), MockTrade::with_accounts(1));
        assert!(sup.init_quote().await.is_err());
        let handle = sup.quote_handle().await;
        assert_eq!(handle.state, ConnState::Failed);
        assert!(handle.last_error.is_some());
    }

    #[tokio::test]
    async fn trade_init_is_idempotent() {
        let trade = MockTrade::with_accounts(2);
        let sup = supervisor_with(MockQuote::ready(), trade.clone());

        for _ in 0..3 {
            sup.init_trade(sup.trade_settings()).await.unwrap();
        }
        assert_eq!(trade.opens.load(Ordering::SeqCst), 1);
        assert_eq!(trade.account_queries.load(Ordering::SeqCst), 1);
        assert_eq!(sup.trade_handle().await.state, ConnState::Ready);
        assert!(sup.trade_session().await.is_some());
    }

    #[tokio::test]
    async fn concurrent_trade_inits_open_once() {
        let trade = MockTrade::with_accounts(1);
        let sup = Arc::new(supervisor_with(MockQuote::ready(), trade.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let sup = Arc::clone(&sup);
                tokio::spawn(async move { sup.ensure_trade().await.map(|_| ()) })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(trade.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_account_list_resets_state() {
        let trade = MockTrade::with_accounts(0);
        let sup = supervisor_with(MockQuote::ready(), trade.clone());

        let err = sup.init_trade(sup.trade_settings()).await.unwrap_err();
        assert!(matches!(err, BmcpError::NoAccounts));
        let handle = sup.trade_handle().await;
        assert_eq!(handle.state, ConnState::Uninitialized);
        assert_eq!(handle.last_error.as_deref(), Some("no trading accounts available"));
        assert_eq!(trade.closes.load(Ordering::SeqCst), 1);
        assert!(sup.trade_session().await.is_none());

        // Retried on the next call.
        let _ = sup.init_trade(sup.trade_settings()).await;
        assert_eq!(trade.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn account_query_error_is_reported() {
        let trade = MockTrade::new(AccountsReply::Fail("permission denied".into()));
        let sup = supervisor_with(MockQuote::ready(), trade.clone());

        let err = sup.init_trade(sup.trade_settings()).await.unwrap_err();
        assert!(matches!(&err, BmcpError::AccountQueryFailed(m) if m.contains("permission denied")));
        assert_eq!(sup.trade_handle().await.state, ConnState::Uninitialized);
        assert_eq!(trade.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trade_env_failure_is_not_fatal() {
        let trade = MockTrade::with_accounts(1);
        trade.fail_set_env.store(true, Ordering::SeqCst);
        let sup = supervisor_with(MockQuote::ready(), trade.clone());

        sup.init_trade(sup.trade_settings()).await.unwrap();
        assert_eq!(*trade.last_env.lock().unwrap(), Some(TradeEnv::Simulate));
        assert_eq!(sup.trade_handle().await.state, ConnState::Ready);
    }

    #[tokio::test]
    async fn shutdown_closes_both_sessions() {
        let quote = MockQuote::ready();
        let trade = MockTrade::with_accounts(1);
        let sup = supervisor_with(quote.clone(), trade.clone());
        sup.init_quote().await.unwrap();
        sup.init_trade(sup.trade_settings()).await.unwrap();

        sup.shutdown().await;
        assert_eq!(quote.closes.load(Ordering::SeqCst), 2);
        assert_eq!(trade.closes.load(Ordering::SeqCst), 1);
        assert_eq!(sup.quote_handle().await.state, ConnState::Closed);
        assert_eq!(sup.trade_handle().await.state, ConnState::Closed);

        // Second shutdown has nothing left to close.
        sup.shutdown().await;
        assert_eq!(quote.closes.load(Ordering::SeqCst), 2);
        assert_eq!(trade.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_without_trade_session() {
        let quote = MockQuote::ready();
        let trade = MockTrade::with_accounts(1);
        let sup = supervisor_with(quote.clone(), trade.clone());
        sup.init_quote().await.unwrap();

        sup.shutdown().await;
        assert_eq!(quote.closes.load(Ordering::SeqCst), 2);
        assert_eq!(trade.closes.load(Ordering::SeqCst), 0);
    }
}
