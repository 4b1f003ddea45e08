//! In-memory quote/trade connectors that count upstream calls.

use std::io::{self, Write};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bmcp_core::config::{Endpoint, ServerConfig, TradeSettings};
use bmcp_core::error::{BmcpError, Result};
use bmcp_core::{TradeEnv, TrdMarket};
use bmcp_md::{GlobalState, QuoteConnector, QuoteSession};
use bmcp_td::{Account, TradeConnector, TradeSession};
use serde_json::{Value, json};

use crate::supervisor::Supervisor;

pub fn test_config() -> ServerConfig {
    ServerConfig::from_lookup(|key| match key {
        "PROJECT_ROOT" => Some("/tmp".into()),
        _ => None,
    })
    .unwrap()
}

pub fn supervisor_with(quote: Arc<MockQuote>, trade: Arc<MockTrade>) -> Supervisor {
    Supervisor::new(&test_config(), quote, trade).with_timings(Duration::ZERO, Duration::ZERO)
}

/// Ready supervisor with both sessions up.
pub async fn ready_supervisor(quote: Arc<MockQuote>, trade: Arc<MockTrade>) -> Arc<Supervisor> {
    let sup = supervisor_with(quote, trade);
    sup.init_quote().await.unwrap();
    Arc::new(sup)
}

/// `Write` into a buffer the test can still read after a writer thread has
/// taken ownership.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }

    /// Every line written so far, parsed as JSON.
    pub fn messages(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

/// `(method, params)` as seen by a session.
pub type Call = (String, Value);

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

pub struct QuoteShared {
    reachable: bool,
    logged_in: bool,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub calls: Mutex<Vec<Call>>,
    replies: Mutex<Vec<(String, Result<Value>)>>,
}

pub struct MockQuote(Arc<QuoteShared>);

impl Deref for MockQuote {
    type Target = QuoteShared;

    fn deref(&self) -> &QuoteShared {
        &self.0
    }
}

impl MockQuote {
    fn build(reachable: bool, logged_in: bool) -> Arc<Self> {
        Arc::new(Self(Arc::new(QuoteShared {
            reachable,
            logged_in,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
        })))
    }

    pub fn ready() -> Arc<Self> {
        Self::build(true, true)
    }

    pub fn not_ready() -> Arc<Self> {
        Self::build(true, false)
    }

    pub fn unreachable() -> Arc<Self> {
        Self::build(false, false)
    }
}

impl QuoteShared {
    /// Queue the reply for the next call to `method`. Unqueued methods fail
    /// with an upstream error.
    pub fn reply(&self, method: &str, reply: Result<Value>) {
        self.replies.lock().unwrap().push((method.to_string(), reply));
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn params(&self, idx: usize) -> Value {
        self.calls.lock().unwrap()[idx].1.clone()
    }

    fn next_reply(&self, method: &str) -> Result<Value> {
        let mut replies = self.replies.lock().unwrap();
        match replies.iter().position(|(m, _)| m == method) {
            Some(idx) => replies.remove(idx).1,
            None => Err(BmcpError::Upstream(format!("no reply for {method}"))),
        }
    }
}

struct MockQuoteSession(Arc<QuoteShared>);

#[async_trait]
impl QuoteSession for MockQuoteSession {
    async fn global_state(&self) -> Result<GlobalState> {
        Ok(GlobalState { qot_logined: self.0.logged_in, ..Default::default() })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.0.calls.lock().unwrap().push((method.to_string(), params));
        self.0.next_reply(method)
    }

    async fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuoteConnector for MockQuote {
    async fn open(&self, _endpoint: &Endpoint) -> Result<Arc<dyn QuoteSession>> {
        if !self.reachable {
            return Err(BmcpError::UpstreamUnavailable("connection refused".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockQuoteSession(Arc::clone(&self.0))))
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum AccountsReply {
    Count(usize),
    Fail(String),
}

pub struct TradeShared {
    accounts: AccountsReply,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub account_queries: AtomicUsize,
    pub fail_set_env: AtomicBool,
    pub last_env: Mutex<Option<TradeEnv>>,
    pub last_settings: Mutex<Option<TradeSettings>>,
    pub calls: Mutex<Vec<Call>>,
}

pub struct MockTrade(Arc<TradeShared>);

impl Deref for MockTrade {
    type Target = TradeShared;

    fn deref(&self) -> &TradeShared {
        &self.0
    }
}

impl MockTrade {
    pub fn new(accounts: AccountsReply) -> Arc<Self> {
        Arc::new(Self(Arc::new(TradeShared {
            accounts,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            account_queries: AtomicUsize::new(0),
            fail_set_env: AtomicBool::new(false),
            last_env: Mutex::new(None),
            last_settings: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })))
    }

    pub fn with_accounts(n: usize) -> Arc<Self> {
        Self::new(AccountsReply::Count(n))
    }
}

struct MockTradeSession(Arc<TradeShared>);

#[async_trait]
impl TradeSession for MockTradeSession {
    async fn set_trade_env(&self, env: TradeEnv) -> Result<()> {
        *self.0.last_env.lock().unwrap() = Some(env);
        if self.0.fail_set_env.load(Ordering::SeqCst) {
            return Err(BmcpError::Upstream("set_trade_env rejected".into()));
        }
        Ok(())
    }

    async fn account_list(&self) -> Result<Vec<Account>> {
        self.0.account_queries.fetch_add(1, Ordering::SeqCst);
        match &self.0.accounts {
            AccountsReply::Count(n) => Ok((0..*n as u64)
                .map(|i| Account {
                    acc_id: 1000 + i,
                    acc_type: "MARGIN".into(),
                    acc_state: "ACTIVE".into(),
                    trd_env: TradeEnv::Simulate,
                    trd_market_auth: vec![TrdMarket::Hk.to_string()],
                })
                .collect()),
            AccountsReply::Fail(msg) => Err(BmcpError::Upstream(msg.clone())),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.0.calls.lock().unwrap().push((method.to_string(), params.clone()));
        Ok(json!({ "method": method, "params": params }))
    }

    async fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TradeConnector for MockTrade {
    async fn open(&self, _endpoint: &Endpoint, settings: TradeSettings) -> Result<Arc<dyn TradeSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_settings.lock().unwrap() = Some(settings);
        Ok(Arc::new(MockTradeSession(Arc::clone(&self.0))))
    }
}
