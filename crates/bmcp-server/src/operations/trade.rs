//! Account tools backed by the lazily opened trade session.
//!
//! Each tool first makes sure the trade session is up. If that fails the
//! caller gets a fixed error envelope and the supervisor retries on the next
//! call.

use std::sync::Arc;

use bmcp_core::error::Result;
use bmcp_core::logging::LogChannel;
use bmcp_core::types::split_code;
use bmcp_td::{TradeSession, methods};
use serde_json::{Value, json};

use super::{Args, OpContext, failure, object_payload};

pub const TRADE_INIT_FAILED: &str = "Failed to initialize trade connection";

async fn trade_session(ctx: &OpContext, channel: Option<&LogChannel>) -> std::result::Result<Arc<dyn TradeSession>, Value> {
    ctx.supervisor.ensure_trade().await.map_err(|e| {
        ctx.sink.error(&format!("{TRADE_INIT_FAILED}: {e}"), channel);
        failure(TRADE_INIT_FAILED)
    })
}

fn envelope(tool: &str, ctx: &OpContext, channel: Option<&LogChannel>, outcome: Result<Value>) -> Value {
    match outcome {
        Ok(payload) => payload,
        Err(e) => {
            let message = format!("{tool}: {e}");
            ctx.sink.error(&message, channel);
            failure(message)
        }
    }
}

pub async fn get_account_list(ctx: &OpContext, channel: Option<&LogChannel>) -> Value {
    let session = match trade_session(ctx, channel).await {
        Ok(s) => s,
        Err(denied) => return denied,
    };
    let outcome = session.account_list().await.map(|accounts| {
        ctx.sink.info(&format!("retrieved {} account(s)", accounts.len()), channel);
        json!({ "acc_list": accounts })
    });
    envelope("get_account_list", ctx, channel, outcome)
}

pub async fn get_funds(ctx: &OpContext, channel: Option<&LogChannel>) -> Value {
    let session = match trade_session(ctx, channel).await {
        Ok(s) => s,
        Err(denied) => return denied,
    };
    match session.request(methods::ACCINFO_QUERY, json!({})).await {
        Ok(data) if is_empty(&data) => failure("No account information available"),
        outcome => envelope("get_funds", ctx, channel, outcome.map(object_payload)),
    }
}

pub async fn get_positions(ctx: &OpContext, channel: Option<&LogChannel>) -> Value {
    let session = match trade_session(ctx, channel).await {
        Ok(s) => s,
        Err(denied) => return denied,
    };
    let outcome = session.request(methods::POSITION_LIST_QUERY, json!({})).await;
    envelope("get_positions", ctx, channel, outcome.map(object_payload))
}

pub async fn get_max_power(ctx: &OpContext, channel: Option<&LogChannel>) -> Value {
    let session = match trade_session(ctx, channel).await {
        Ok(s) => s,
        Err(denied) => return denied,
    };
    let outcome = session.request(methods::GET_MAX_POWER, json!({})).await;
    envelope("get_max_power", ctx, channel, outcome.map(object_payload))
}

pub async fn get_margin_ratio(ctx: &OpContext, args: Args<'_>, channel: Option<&LogChannel>) -> Value {
    let symbol = match args.str("symbol").and_then(|s| split_code(s).map(|_| s)) {
        Ok(s) => s,
        Err(e) => return envelope("get_margin_ratio", ctx, channel, Err(e)),
    };
    let session = match trade_session(ctx, channel).await {
        Ok(s) => s,
        Err(denied) => return denied,
    };
    let outcome = session.request(methods::GET_MARGIN_RATIO, json!({ "code_list": [symbol] })).await;
    envelope("get_margin_ratio", ctx, channel, outcome.map(object_payload))
}

fn is_empty(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(rows) => rows.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bmcp_core::logging::DiagnosticSink;
    use tokio::sync::mpsc;

    use super::*;
    use crate::operations::call_tool;
    use crate::testing::{MockQuote, MockTrade, ready_supervisor};

    async fn ctx_with(trade: Arc<MockTrade>, guarded: bool) -> OpContext {
        OpContext::new(ready_supervisor(MockQuote::ready(), trade).await, DiagnosticSink::new(guarded))
    }

    #[tokio::test]
    async fn trade_init_failure_gives_fixed_envelope() {
        let trade = MockTrade::with_accounts(0);
        let ctx = ctx_with(trade.clone(), false).await;

        for tool in ["get_account_list", "get_funds", "get_positions", "get_max_power"] {
            let out = call_tool(&ctx, tool, &json!({}), None).await.unwrap();
            assert_eq!(out, json!({"error": TRADE_INIT_FAILED}));
        }
        // Every call retried the initialization.
        assert_eq!(trade.opens.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn account_list_lazily_initializes_once() {
        let trade = MockTrade::with_accounts(2);
        let ctx = ctx_with(trade.clone(), false).await;
        assert_eq!(trade.opens.load(Ordering::SeqCst), 0);

        let out = call_tool(&ctx, "get_account_list", &json!({}), None).await.unwrap();
        assert_eq!(out["acc_list"].as_array().unwrap().len(), 2);
        assert_eq!(out["acc_list"][0]["acc_id"], 1000);

        call_tool(&ctx, "get_positions", &json!({}), None).await.unwrap();
        assert_eq!(trade.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn requests_use_trade_methods() {
        let trade = MockTrade::with_accounts(1);
        let ctx = ctx_with(trade.clone(), false).await;

        let out = call_tool(&ctx, "get_max_power", &json!({}), None).await.unwrap();
        assert_eq!(out["method"], methods::GET_MAX_POWER);

        let out = call_tool(&ctx, "get_margin_ratio", &json!({"symbol": "US.AAPL"}), None).await.unwrap();
        assert_eq!(out["params"]["code_list"], json!(["US.AAPL"]));
    }

    #[tokio::test]
    async fn margin_ratio_rejects_bad_symbol_before_init() {
        let trade = MockTrade::with_accounts(1);
        let ctx = ctx_with(trade.clone(), false).await;

        let out = call_tool(&ctx, "get_margin_ratio", &json!({"symbol": "AAPL"}), None).await.unwrap();
        assert!(out["error"].as_str().unwrap().starts_with("get_margin_ratio: invalid parameter"));
        assert_eq!(trade.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn guarded_failures_reach_the_log_channel() {
        let ctx = ctx_with(MockTrade::with_accounts(0), true).await;
        let (tx, mut rx) = mpsc::channel(16);
        let channel = LogChannel::new(tx, "bmcp");

        call_tool(&ctx, "get_account_list", &json!({}), Some(&channel)).await.unwrap();
        let mut saw_error = false;
        while let Ok(note) = rx.try_recv() {
            if note["params"]["level"] == "error" {
                saw_error = note["params"]["data"].as_str().unwrap().starts_with(TRADE_INIT_FAILED);
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn emptiness() {
        assert!(is_empty(&Value::Null));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!([{"cash": 1}])));
    }
}
