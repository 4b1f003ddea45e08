//! Client for the local gateway bridge.
//!
//! Wire format is newline-delimited JSON over TCP:
//!
//! ```text
//! → {"id":7,"method":"get_stock_quote","params":{"code_list":["HK.00700"]}}
//! ← {"id":7,"ret":0,"data":{...}}
//! ```
//!
//! `ret == RET_OK` carries the payload in `data`; any other `ret` is an
//! upstream error whose `data` is the message. Calls on one client are
//! serialized through a mutex around the stream, so each session handle has
//! at most one request in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::Endpoint;
use crate::error::{BmcpError, Result};

/// Success code in a bridge reply.
pub const RET_OK: i64 = 0;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct BridgeReply {
    id: u64,
    ret: i64,
    #[serde(default)]
    data: Value,
}

#[derive(Debug)]
struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// One TCP connection to the bridge.
#[derive(Debug)]
pub struct BridgeClient {
    endpoint: Endpoint,
    label: &'static str,
    conn: Mutex<Option<Conn>>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl BridgeClient {
    /// Connect with the default timeouts. `label` tags log lines (`quote`,
    /// `trade`).
    pub async fn connect(endpoint: &Endpoint, label: &'static str) -> Result<Self> {
        Self::connect_with(endpoint, label, DEFAULT_CONNECT_TIMEOUT, DEFAULT_CALL_TIMEOUT).await
    }

    pub async fn connect_with(
        endpoint: &Endpoint,
        label: &'static str,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self> {
        let addr = endpoint.to_string();
        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(BmcpError::UpstreamUnavailable(format!("connect {addr}: {e}"))),
            Err(_) => {
                return Err(BmcpError::UpstreamUnavailable(format!(
                    "connect {addr}: timed out after {connect_timeout:?}"
                )));
            }
        };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        debug!("[{label}] bridge connected — {addr}");

        Ok(Self {
            endpoint: endpoint.clone(),
            label,
            conn: Mutex::new(Some(Conn { reader: BufReader::new(read_half), writer: write_half })),
            next_id: AtomicU64::new(1),
            call_timeout,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one request and wait for its reply.
    ///
    /// I/O failures and timeouts drop the connection; later calls fail fast
    /// with [`BmcpError::UpstreamUnavailable`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(BmcpError::UpstreamUnavailable(format!("{} bridge connection is closed", self.label)));
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let outcome = match timeout(self.call_timeout, exchange(conn, id, method, &params)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BmcpError::UpstreamUnavailable(format!(
                "{method}: no reply within {:?}",
                self.call_timeout
            ))),
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                warn!("[{}] bridge call failed, dropping connection — {e}", self.label);
                *guard = None;
                return Err(e);
            }
        };
        drop(guard);

        if reply.ret == RET_OK {
            Ok(reply.data)
        } else {
            let message = match reply.data {
                Value::String(s) => s,
                Value::Null => format!("{method} failed with ret={}", reply.ret),
                other => other.to_string(),
            };
            Err(BmcpError::Upstream(message))
        }
    }

    /// Shut down the connection. Safe to call more than once.
    pub async fn close(&self) {
        if let Some(mut conn) = self.conn.lock().await.take() {
            let _ = conn.writer.shutdown().await;
            debug!("[{}] bridge closed", self.label);
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_none()
    }
}

async fn exchange(conn: &mut Conn, id: u64, method: &str, params: &Value) -> Result<BridgeReply> {
    let mut frame =
        serde_json::to_vec(&BridgeRequest { id, method, params }).map_err(|e| BmcpError::Protocol(e.to_string()))?;
    frame.push(b'\n');
    conn.writer.write_all(&frame).await?;
    conn.writer.flush().await?;

    let mut line = String::new();
    loop {
        line.clear();
        if conn.reader.read_line(&mut line).await? == 0 {
            return Err(BmcpError::UpstreamUnavailable("bridge closed the connection".into()));
        }
        if line.trim().is_empty() {
            continue;
        }
        let reply: BridgeReply =
            serde_json::from_str(line.trim()).map_err(|e| BmcpError::Protocol(format!("bad bridge frame: {e}")))?;
        if reply.id == id {
            return Ok(reply);
        }
        debug!("skipping reply for request {} while waiting for {id}", reply.id);
    }
}
