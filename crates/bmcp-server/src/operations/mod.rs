//! Operation layer: the tools and prompts exposed over the protocol.
//!
//! Every tool returns an envelope object, never a protocol error:
//!
//! - success: the payload object (lists are keyed, e.g. `{"quote_list": [...]}`)
//! - failure: `{"error": "<description>"}`
//!
//! Tools borrow session handles from the [`Supervisor`] only for the duration
//! of one call.

pub mod prompts;
pub mod quote;
pub mod trade;

use std::sync::Arc;

use bmcp_core::error::{BmcpError, Result};
use bmcp_core::logging::{DiagnosticSink, LogChannel};
use serde_json::{Map, Value, json};
use tracing::Level;

use crate::supervisor::Supervisor;

/// What a tool call gets to work with.
pub struct OpContext {
    pub supervisor: Arc<Supervisor>,
    pub sink: DiagnosticSink,
}

impl OpContext {
    pub fn new(supervisor: Arc<Supervisor>, sink: DiagnosticSink) -> Self {
        Self { supervisor, sink }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

pub fn failure(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

/// Wrap an upstream payload as an object; non-objects go under `data`.
pub fn object_payload(data: Value) -> Value {
    match data {
        Value::Object(_) => data,
        other => json!({ "data": other }),
    }
}

/// Key a list payload. An object that already carries `key` is passed
/// through.
pub fn list_payload(key: &str, data: Value) -> Value {
    match data {
        Value::Object(ref map) if map.contains_key(key) => data,
        other => {
            let mut map = Map::new();
            map.insert(key.to_string(), other);
            Value::Object(map)
        }
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Typed access to a tool's `arguments` object.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(&'a Value);

impl<'a> Args<'a> {
    pub fn new(raw: &'a Value) -> Self {
        Self(raw)
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<&'a str> {
        match self.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
            Some(_) => Err(BmcpError::InvalidParam(format!("{name} must be a non-empty string"))),
            None => Err(BmcpError::InvalidParam(format!("missing required argument: {name}"))),
        }
    }

    pub fn str_list(&self, name: &str) -> Result<Vec<String>> {
        let Some(value) = self.get(name) else {
            return Err(BmcpError::InvalidParam(format!("missing required argument: {name}")));
        };
        let items = value
            .as_array()
            .ok_or_else(|| BmcpError::InvalidParam(format!("{name} must be a list of strings")))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| BmcpError::InvalidParam(format!("{name} must be a list of strings")))
            })
            .collect()
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(v) => v
                .as_f64()
                .filter(|x| x.is_finite())
                .ok_or_else(|| BmcpError::InvalidParam(format!("{name} must be a number"))),
            None => Err(BmcpError::InvalidParam(format!("missing required argument: {name}"))),
        }
    }

    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| BmcpError::InvalidParam(format!("{name} must be an integer"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    StrList,
    Int,
    Num,
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

const fn req(name: &'static str, kind: ParamKind, description: &'static str) -> Param {
    Param { name, kind, required: true, description }
}

const fn opt(name: &'static str, kind: ParamKind, description: &'static str) -> Param {
    Param { name, kind, required: false, description }
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [Param],
}

impl ToolSpec {
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in self.params {
            let schema = match p.kind {
                ParamKind::Str => json!({ "type": "string", "description": p.description }),
                ParamKind::StrList => {
                    json!({ "type": "array", "items": { "type": "string" }, "description": p.description })
                }
                ParamKind::Int => json!({ "type": "integer", "description": p.description }),
                ParamKind::Num => json!({ "type": "number", "description": p.description }),
            };
            properties.insert(p.name.to_string(), schema);
        }
        let required: Vec<&str> = self.params.iter().filter(|p| p.required).map(|p| p.name).collect();
        json!({ "type": "object", "properties": properties, "required": required })
    }

    pub fn describe(&self) -> Value {
        json!({ "name": self.name, "description": self.description, "inputSchema": self.input_schema() })
    }
}

const SYMBOLS: Param = req("symbols", ParamKind::StrList, "Stock codes as {market}.{code}, e.g. [\"HK.00700\", \"US.AAPL\"]");
const SYMBOL: Param = req("symbol", ParamKind::Str, "Stock code as {market}.{code}, e.g. \"HK.00700\"");
const KTYPE: Param = req("ktype", ParamKind::Str, "K-line type: K_1M, K_5M, K_15M, K_30M, K_60M, K_DAY, K_WEEK, K_MON, ...");
const COUNT: Param = opt("count", ParamKind::Int, "Number of K-lines, 1-1000 (default 100)");
const SUB_TYPES: Param = req("sub_types", ParamKind::StrList, "QUOTE, ORDER_BOOK, TICKER, RT_DATA, BROKER or a K-line type");
const START: Param = req("start", ParamKind::Str, "Start date YYYY-MM-DD");
const END: Param = req("end", ParamKind::Str, "End date YYYY-MM-DD");
const EXPIRY: Param = req("expiry", ParamKind::Str, "Expiry date YYYY-MM-DD");
const STRIKE: Param = req("strike_price", ParamKind::Num, "Strike price");
const MARKET: Param = req("market", ParamKind::Str, "Market code: HK, US, SH or SZ");

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec { name: "get_stock_quote", description: "Get stock quote data for the given symbols", params: &[SYMBOLS] },
    ToolSpec { name: "get_market_snapshot", description: "Get market snapshots for the given symbols", params: &[SYMBOLS] },
    ToolSpec {
        name: "get_cur_kline",
        description: "Get current K-line data (requires a K-line subscription)",
        params: &[SYMBOL, KTYPE, COUNT],
    },
    ToolSpec {
        name: "get_history_kline",
        description: "Get historical K-line data between two dates",
        params: &[
            SYMBOL,
            KTYPE,
            START,
            END,
            COUNT,
        ],
    },
    ToolSpec { name: "get_rt_data", description: "Get intraday real-time data (requires RT_DATA subscription)", params: &[SYMBOL] },
    ToolSpec { name: "get_ticker", description: "Get tick-by-tick trades (requires TICKER subscription)", params: &[SYMBOL] },
    ToolSpec { name: "get_order_book", description: "Get the order book (requires ORDER_BOOK subscription)", params: &[SYMBOL] },
    ToolSpec { name: "get_broker_queue", description: "Get the broker queue (requires BROKER subscription)", params: &[SYMBOL] },
    ToolSpec { name: "subscribe", description: "Subscribe to real-time data", params: &[SYMBOLS, SUB_TYPES] },
    ToolSpec { name: "unsubscribe", description: "Unsubscribe from real-time data", params: &[SYMBOLS, SUB_TYPES] },
    ToolSpec { name: "get_market_state", description: "Get the trading state of a market", params: &[MARKET] },
    ToolSpec {
        name: "get_security_info",
        description: "Get static information about a security",
        params: &[MARKET, req("code", ParamKind::Str, "Code without market prefix, e.g. \"00700\"")],
    },
    ToolSpec { name: "get_security_list", description: "List the securities of a market", params: &[MARKET] },
    ToolSpec {
        name: "get_option_chain",
        description: "Get the option chain of an underlying between two expiry dates",
        params: &[SYMBOL, START, END],
    },
    ToolSpec {
        name: "get_option_expiration_date",
        description: "Get the option expiry dates of an underlying",
        params: &[SYMBOL],
    },
    ToolSpec { name: "get_option_condor", description: "Get condor strategy data", params: &[SYMBOL, EXPIRY, STRIKE] },
    ToolSpec {
        name: "get_option_butterfly",
        description: "Get butterfly strategy data",
        params: &[SYMBOL, EXPIRY, STRIKE],
    },
    ToolSpec { name: "get_account_list", description: "Get the trading account list", params: &[] },
    ToolSpec { name: "get_funds", description: "Get account funds", params: &[] },
    ToolSpec { name: "get_positions", description: "Get account positions", params: &[] },
    ToolSpec { name: "get_max_power", description: "Get maximum trading power", params: &[] },
    ToolSpec { name: "get_margin_ratio", description: "Get the margin ratio of a security", params: &[SYMBOL] },
    ToolSpec { name: "get_current_time", description: "Get the current local time", params: &[] },
];

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

pub fn tool_list() -> Vec<Value> {
    TOOLS.iter().map(ToolSpec::describe).collect()
}

/// Run a tool and produce its envelope. `None` if no tool is called `name`.
pub async fn call_tool(ctx: &OpContext, name: &str, raw_args: &Value, channel: Option<&LogChannel>) -> Option<Value> {
    let tool = find_tool(name)?;
    let args = Args::new(raw_args);
    ctx.sink.log(Level::DEBUG, &format!("calling {}", tool.name), channel);

    let outcome = match tool.name {
        "get_stock_quote" => quote::get_stock_quote(ctx, args).await,
        "get_market_snapshot" => quote::get_market_snapshot(ctx, args).await,
        "get_cur_kline" => quote::get_cur_kline(ctx, args).await,
        "get_history_kline" => quote::get_history_kline(ctx, args).await,
        "get_rt_data" => quote::get_rt_data(ctx, args).await,
        "get_ticker" => quote::get_ticker(ctx, args).await,
        "get_order_book" => quote::get_order_book(ctx, args).await,
        "get_broker_queue" => quote::get_broker_queue(ctx, args).await,
        "subscribe" => quote::subscribe(ctx, args).await,
        "unsubscribe" => quote::unsubscribe(ctx, args).await,
        "get_market_state" => quote::get_market_state(ctx, args).await,
        "get_security_info" => quote::get_security_info(ctx, args).await,
        "get_security_list" => quote::get_security_list(ctx, args).await,
        "get_option_chain" => quote::get_option_chain(ctx, args).await,
        "get_option_expiration_date" => quote::get_option_expiration_date(ctx, args).await,
        "get_option_condor" => quote::get_option_condor(ctx, args).await,
        "get_option_butterfly" => quote::get_option_butterfly(ctx, args).await,
        "get_account_list" => return Some(trade::get_account_list(ctx, channel).await),
        "get_funds" => return Some(trade::get_funds(ctx, channel).await),
        "get_positions" => return Some(trade::get_positions(ctx, channel).await),
        "get_max_power" => return Some(trade::get_max_power(ctx, channel).await),
        "get_margin_ratio" => return Some(trade::get_margin_ratio(ctx, args, channel).await),
        "get_current_time" => Ok(current_time()),
        _ => return None,
    };

    Some(match outcome {
        Ok(payload) => payload,
        Err(e) => {
            let message = format!("{}: {e}", tool.name);
            ctx.sink.error(&message, channel);
            failure(message)
        }
    })
}

/// Local wall-clock time; `timezone` is the UTC offset.
pub fn current_time() -> Value {
    let now = chrono::Local::now();
    json!({
        "timestamp": now.timestamp(),
        "datetime": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "timezone": now.format("%:z").to_string(),
    })
}
