//! Market-data tools backed by the quote session.

use bmcp_core::error::{BmcpError, Result};
use bmcp_core::types::{KNOWN_MARKETS, split_code, validate_codes};
use bmcp_md::{KlineType, SubType, methods};
use chrono::NaiveDate;
use serde_json::{Value, json};
use tracing::debug;

use super::{Args, OpContext, list_payload, object_payload};

pub const DEFAULT_KLINE_COUNT: i64 = 100;
pub const MAX_KLINE_COUNT: i64 = 1000;

/// Upper bound on `page_req_key` round trips for one history request.
pub const MAX_HISTORY_PAGES: usize = 100;

fn kline_count(args: Args<'_>) -> Result<i64> {
    let count = args.opt_i64("count")?.unwrap_or(DEFAULT_KLINE_COUNT);
    if !(1..=MAX_KLINE_COUNT).contains(&count) {
        return Err(BmcpError::InvalidParam(format!("count must be between 1 and {MAX_KLINE_COUNT}, got {count}")));
    }
    Ok(count)
}

fn symbol(args: Args<'_>) -> Result<&str> {
    let symbol = args.str("symbol")?;
    split_code(symbol)?;
    Ok(symbol)
}

fn symbols(args: Args<'_>) -> Result<Vec<String>> {
    let symbols = args.str_list("symbols")?;
    validate_codes(&symbols)?;
    Ok(symbols)
}

fn market(args: Args<'_>) -> Result<String> {
    let market = args.str("market")?.to_ascii_uppercase();
    if !KNOWN_MARKETS.contains(&market.as_str()) {
        return Err(BmcpError::InvalidParam(format!("unknown market: {market}")));
    }
    Ok(market)
}

fn date(args: Args<'_>, name: &str) -> Result<NaiveDate> {
    let raw = args.str(name)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| BmcpError::InvalidParam(format!("{name} must be YYYY-MM-DD, got {raw:?}")))
}

async fn quote_request(ctx: &OpContext, method: &str, params: Value) -> Result<Value> {
    let session = ctx.supervisor.quote_session().await?;
    session.request(method, params).await
}

pub async fn get_stock_quote(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let symbols = symbols(args)?;
    let data = quote_request(ctx, methods::GET_STOCK_QUOTE, json!({ "code_list": symbols })).await?;
    Ok(list_payload("quote_list", data))
}

pub async fn get_market_snapshot(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let symbols = symbols(args)?;
    let data = quote_request(ctx, methods::GET_MARKET_SNAPSHOT, json!({ "code_list": symbols })).await?;
    Ok(list_payload("snapshot_list", data))
}

pub async fn get_cur_kline(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let ktype: KlineType = args.str("ktype")?.parse()?;
    let count = kline_count(args)?;
    let data = quote_request(
        ctx,
        methods::GET_CUR_KLINE,
        json!({ "code": code, "ktype": ktype.as_str(), "num": count }),
    )
    .await?;
    Ok(list_payload("kline_list", data))
}

/// Historical K-lines, following `page_req_key` until the gateway reports no
/// further pages.
pub async fn get_history_kline(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let ktype: KlineType = args.str("ktype")?.parse()?;
    if !ktype.supports_history() {
        return Err(BmcpError::InvalidParam(format!("{ktype} is not available for historical requests")));
    }
    let start = date(args, "start")?;
    let end = date(args, "end")?;
    if start > end {
        return Err(BmcpError::InvalidParam(format!("start {start} is after end {end}")));
    }
    let count = kline_count(args)?;

    let session = ctx.supervisor.quote_session().await?;
    let mut klines = Vec::new();
    let mut page_req_key = Value::Null;
    for page in 0..MAX_HISTORY_PAGES {
        let params = json!({
            "code": code,
            "start": start.to_string(),
            "end": end.to_string(),
            "ktype": ktype.as_str(),
            "max_count": count,
            "page_req_key": page_req_key,
        });
        let reply = session.request(methods::REQUEST_HISTORY_KLINE, params).await?;
        match reply.get("kline_list") {
            Some(Value::Array(rows)) => klines.extend(rows.iter().cloned()),
            Some(_) | None => return Err(BmcpError::Protocol("history reply without kline_list".into())),
        }
        page_req_key = reply.get("page_req_key").cloned().unwrap_or(Value::Null);
        if page_req_key.is_null() {
            debug!("history kline {code} {ktype}: {} row(s) in {} page(s)", klines.len(), page + 1);
            return Ok(json!({ "kline_list": klines }));
        }
    }
    Err(BmcpError::Upstream(format!("history kline paging exceeded {MAX_HISTORY_PAGES} pages")))
}

pub async fn get_rt_data(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let data = quote_request(ctx, methods::GET_RT_DATA, json!({ "code": code })).await?;
    Ok(list_payload("rt_data_list", data))
}

pub async fn get_ticker(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let data = quote_request(ctx, methods::GET_TICKER, json!({ "code": code })).await?;
    Ok(list_payload("ticker_list", data))
}

pub async fn get_order_book(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let data = quote_request(ctx, methods::GET_ORDER_BOOK, json!({ "code": code })).await?;
    Ok(object_payload(data))
}

pub async fn get_broker_queue(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let data = quote_request(ctx, methods::GET_BROKER_QUEUE, json!({ "code": code })).await?;
    Ok(object_payload(data))
}

fn sub_types(args: Args<'_>) -> Result<Vec<SubType>> {
    let raw = args.str_list("sub_types")?;
    if raw.is_empty() {
        return Err(BmcpError::InvalidParam("sub_types must not be empty".into()));
    }
    raw.iter().map(|s| s.parse()).collect()
}

/// One upstream call per (symbol, type) pair; the first failure aborts.
async fn change_subscription(ctx: &OpContext, args: Args<'_>, method: &str) -> Result<Value> {
    let symbols = symbols(args)?;
    let sub_types = sub_types(args)?;
    let session = ctx.supervisor.quote_session().await?;
    for symbol in &symbols {
        for sub_type in &sub_types {
            session
                .request(method, json!({ "code_list": [symbol], "subtype_list": [sub_type.to_string()] }))
                .await?;
        }
    }
    Ok(json!({ "status": "success" }))
}

pub async fn subscribe(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    change_subscription(ctx, args, methods::SUBSCRIBE).await
}

pub async fn unsubscribe(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    change_subscription(ctx, args, methods::UNSUBSCRIBE).await
}

pub async fn get_market_state(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let market = market(args)?;
    let data = quote_request(ctx, methods::GET_MARKET_STATE, json!({ "market": market })).await?;
    Ok(object_payload(data))
}

pub async fn get_security_info(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let market = market(args)?;
    let code = args.str("code")?;
    let data = quote_request(ctx, methods::GET_SECURITY_INFO, json!({ "market": market, "code": code })).await?;
    Ok(object_payload(data))
}

pub async fn get_security_list(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let market = market(args)?;
    let data = quote_request(ctx, methods::GET_SECURITY_LIST, json!({ "market": market })).await?;
    Ok(list_payload("security_list", data))
}

pub async fn get_option_chain(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let start = date(args, "start")?;
    let end = date(args, "end")?;
    if start > end {
        return Err(BmcpError::InvalidParam(format!("start {start} is after end {end}")));
    }
    let params = json!({ "code": code, "start": start.to_string(), "end": end.to_string() });
    let data = quote_request(ctx, methods::GET_OPTION_CHAIN, params).await?;
    Ok(list_payload("option_list", data))
}

pub async fn get_option_expiration_date(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    let code = symbol(args)?;
    let data = quote_request(ctx, methods::GET_OPTION_EXPIRATION_DATE, json!({ "code": code })).await?;
    Ok(list_payload("expiration_list", data))
}

/// Shared shape of the option strategy lookups.
async fn option_strategy(ctx: &OpContext, args: Args<'_>, method: &str) -> Result<Value> {
    let code = symbol(args)?;
    let expiry = date(args, "expiry")?;
    let strike_price = args.f64("strike_price")?;
    if strike_price <= 0.0 {
        return Err(BmcpError::InvalidParam(format!("strike_price must be positive, got {strike_price}")));
    }
    let params = json!({ "code": code, "expiry": expiry.to_string(), "strike_price": strike_price });
    let data = quote_request(ctx, method, params).await?;
    Ok(object_payload(data))
}

pub async fn get_option_condor(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    option_strategy(ctx, args, methods::GET_OPTION_CONDOR).await
}

pub async fn get_option_butterfly(ctx: &OpContext, args: Args<'_>) -> Result<Value> {
    option_strategy(ctx, args, methods::GET_OPTION_BUTTERFLY).await
}
