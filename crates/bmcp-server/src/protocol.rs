//! Line-delimited JSON-RPC 2.0 over stdio.
//!
//! Implements the subset of the MCP stdio transport the server needs:
//! `initialize`, `notifications/initialized`, `ping`, `tools/list`,
//! `tools/call`, `prompts/list` and `prompts/get`.
//!
//! One message per line in both directions. Requests are handled in arrival
//! order; responses and log notifications are queued to a single writer
//! that owns the (guarded) output stream, so nothing else can interleave
//! bytes on it. The writer runs on a blocking thread: a client that stops
//! reading fills the pipe and parks that thread, never the runtime.

use std::io::Write;

use anyhow::Result;
use bmcp_core::logging::LogChannel;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::operations::{self, OpContext, prompts};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Outbound queue depth shared by responses and log notifications.
const OUTBOUND_QUEUE: usize = 256;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, err: RpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": err.code, "message": err.message } })
}

/// Name and version reported in the `initialize` reply.
#[derive(Debug, Clone, Copy)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

pub struct Server {
    ctx: OpContext,
    info: ServerInfo,
}

impl Server {
    pub fn new(ctx: OpContext, info: ServerInfo) -> Self {
        Self { ctx, info }
    }

    /// Handle one inbound message. Returns the response, if one is due.
    pub async fn handle(&self, msg: Value, log: &LogChannel) -> Option<Value> {
        let Value::Object(map) = &msg else {
            return Some(error_response(Value::Null, RpcError::new(INVALID_REQUEST, "expected a JSON object")));
        };
        let id = map.get("id").cloned();
        let method = map.get("method").and_then(Value::as_str);
        let params = map.get("params").cloned().unwrap_or(Value::Null);

        match (id, method) {
            (None, Some(method)) => {
                debug!("notification {method}");
                None
            }
            (Some(id), Some(method)) => Some(match self.dispatch(method, &params, log).await {
                Ok(result) => success(id, result),
                Err(err) => error_response(id, err),
            }),
            // A reply to something we never send.
            (Some(_), None) if map.contains_key("result") || map.contains_key("error") => None,
            (id, None) => Some(error_response(id.unwrap_or(Value::Null), RpcError::new(INVALID_REQUEST, "missing method"))),
        }
    }

    async fn dispatch(&self, method: &str, params: &Value, log: &LogChannel) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                let version = params.get("protocolVersion").and_then(Value::as_str).unwrap_or(PROTOCOL_VERSION);
                Ok(json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": {}, "prompts": {}, "logging": {} },
                    "serverInfo": { "name": self.info.name, "version": self.info.version },
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": operations::tool_list() })),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let envelope = operations::call_tool(&self.ctx, name, &args, Some(log))
                    .await
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, format!("unknown tool: {name}")))?;
                let text = serde_json::to_string(&envelope).unwrap_or_default();
                Ok(json!({
                    "content": [{ "type": "text", "text": text }],
                    "structuredContent": envelope,
                    "isError": false,
                }))
            }
            "prompts/list" => Ok(json!({ "prompts": prompts::prompt_list() })),
            "prompts/get" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, "prompts/get requires a prompt name"))?;
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                match prompts::render(name, &args) {
                    Some(Ok(prompt)) => Ok(prompt),
                    Some(Err(e)) => Err(RpcError::new(INVALID_PARAMS, e.to_string())),
                    None => Err(RpcError::new(INVALID_PARAMS, format!("unknown prompt: {name}"))),
                }
            }
            other => Err(RpcError::new(METHOD_NOT_FOUND, format!("method not found: {other}"))),
        }
    }

    /// Serve until `reader` reaches EOF.
    ///
    /// All output goes through `writer`, owned by a blocking writer thread;
    /// the call returns once every queued message has been written.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Value>(OUTBOUND_QUEUE);
        let writer_task = tokio::task::spawn_blocking(move || write_loop(rx, writer));
        info!("serving on stdio");

        let mut lines = reader.lines();
        let outcome = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(anyhow::Error::new(e).context("reading protocol input")),
            };
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Value>(&line) {
                Ok(msg) => {
                    let log = LogChannel::new(tx.clone(), self.info.name);
                    self.handle(msg, &log).await
                }
                Err(e) => Some(error_response(Value::Null, RpcError::new(PARSE_ERROR, format!("parse error: {e}")))),
            };
            if let Some(response) = response {
                if tx.send(response).await.is_err() {
                    break Err(anyhow::anyhow!("protocol writer stopped"));
                }
            }
        };

        drop(tx);
        if let Err(e) = writer_task.await {
            warn!("protocol writer task failed: {e}");
        }
        info!("protocol input closed");
        outcome
    }
}

fn write_loop<W: Write>(mut rx: mpsc::Receiver<Value>, mut writer: W) {
    while let Some(msg) = rx.blocking_recv() {
        let written = serde_json::to_vec(&msg).map_err(std::io::Error::from).and_then(|mut line| {
            line.push(b'\n');
            writer.write_all(&line)?;
            writer.flush()
        });
        if let Err(e) = written {
            warn!("failed to write protocol message: {e}");
            return;
        }
    }
}
