//! Chain client adapter.
//!
//! [`ChainClient`] is the boundary the scanner talks to: "latest block" and
//! "logs in a block range for an address set", with range-too-large failures
//! distinguishable from transient ones. [`HttpChainClient`] implements it over
//! JSON-RPC with `reqwest`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use campaignindex_core::error::IndexerError;
use campaignindex_core::types::{ChainId, RawLog};

use crate::rpc::{classify_rpc_error, parse_hex_u64, to_hex, JsonRpcRequest, JsonRpcResponse, WireLog};

/// Read access to one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Current head block number.
    async fn latest_block(&self) -> Result<u64, IndexerError>;

    /// Logs emitted by any of `addresses` in `from..=to`, with block times
    /// filled in. Fails with [`IndexerError::RangeTooLarge`] when the node
    /// refuses the range.
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[String],
    ) -> Result<Vec<RawLog>, IndexerError>;
}

/// Blocks whose timestamps are remembered per client.
const BLOCK_TIME_CACHE: usize = 4_096;

/// JSON-RPC chain client over HTTP.
pub struct HttpChainClient {
    chain_id: ChainId,
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
    block_times: Mutex<BTreeMap<u64, i64>>,
}

impl HttpChainClient {
    pub fn new(chain_id: ChainId, url: impl Into<String>, timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            chain_id,
            url: url.into(),
            http,
            timeout,
            next_id: AtomicU64::new(1),
            block_times: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, IndexerError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(IndexerError::RateLimited(format!("HTTP 429 from {}", self.url)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // some providers send JSON-RPC errors (range limits among them)
            // with a 4xx status; let the caller classify those
            if let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&body) {
                if parsed.error.is_some() {
                    debug!(status = status.as_u16(), "JSON-RPC error behind HTTP error status");
                    return Ok(parsed);
                }
            }
            return Err(IndexerError::Rpc(format!("HTTP {}: {body}", status.as_u16())));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> IndexerError {
        if e.is_timeout() {
            IndexerError::Timeout {
                ms: self.timeout.as_millis() as u64,
            }
        } else {
            IndexerError::Rpc(e.to_string())
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        self.send(&req)
            .await?
            .into_result()
            .map_err(|e| IndexerError::Rpc(e.to_string()))
    }

    fn cached_block_time(&self, number: u64) -> Option<i64> {
        let cache = self.block_times.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(&number).copied()
    }

    fn remember_block_time(&self, number: u64, time: i64) {
        let mut cache = self.block_times.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(number, time);
        while cache.len() > BLOCK_TIME_CACHE {
            cache.pop_first();
        }
    }

    /// Timestamp of a block, from the cache or `eth_getBlockByNumber`.
    pub async fn block_time(&self, number: u64) -> Result<i64, IndexerError> {
        if let Some(t) = self.cached_block_time(number) {
            return Ok(t);
        }
        let block = self
            .call("eth_getBlockByNumber", vec![json!(to_hex(number)), json!(false)])
            .await?;
        let ts = block["timestamp"]
            .as_str()
            .ok_or_else(|| IndexerError::Rpc(format!("block {number} not available")))?;
        let time = i64::try_from(parse_hex_u64(ts)?)
            .map_err(|_| IndexerError::Rpc(format!("block {number} timestamp {ts} out of range")))?;
        self.remember_block_time(number, time);
        Ok(time)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn latest_block(&self) -> Result<u64, IndexerError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        let s = v
            .as_str()
            .ok_or_else(|| IndexerError::Rpc(format!("unexpected eth_blockNumber result {v}")))?;
        parse_hex_u64(s)
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[String],
    ) -> Result<Vec<RawLog>, IndexerError> {
        // an empty address filter would match every contract on the chain
        if addresses.is_empty() {
            return Ok(vec![]);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let filter = json!({
            "fromBlock": to_hex(from),
            "toBlock": to_hex(to),
            "address": addresses,
        });
        let req = JsonRpcRequest::new(id, "eth_getLogs", vec![filter]);
        let result = self
            .send(&req)
            .await?
            .into_result()
            .map_err(|e| classify_rpc_error(&e, from, to))?;

        let wire: Vec<WireLog> = serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("malformed eth_getLogs result: {e}")))?;

        let mut logs = Vec::with_capacity(wire.len());
        for w in wire {
            let block = w.block_number_u64()?;
            let time = match w.block_time()? {
                Some(t) => {
                    self.remember_block_time(block, t);
                    t
                }
                None => self.block_time(block).await?,
            };
            logs.push(w.into_raw(self.chain_id, time)?);
        }
        debug!(chain_id = self.chain_id, from, to, logs = logs.len(), "eth_getLogs");
        Ok(logs)
    }
}
