//! JSON-RPC 2.0 wire types and the `eth_getLogs` log shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use campaignindex_core::error::IndexerError;
use campaignindex_core::types::{normalize_address, ChainId, RawLog};

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the error object.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

// ─── Error classification ────────────────────────────────────────────────────

/// Phrases providers use when an `eth_getLogs` range is too wide or returns
/// too many results.
const RANGE_PHRASES: &[&str] = &[
    "query returned more than",
    "block range",
    "range too large",
    "range is too large",
    "too many results",
    "response size exceeded",
    "limit exceeded",
    "exceed maximum block range",
];

const RATE_PHRASES: &[&str] = &["rate limit", "too many requests", "capacity exceeded"];

/// Map a JSON-RPC error for a log query over `from..=to` onto the indexer
/// taxonomy.
pub fn classify_rpc_error(err: &JsonRpcError, from: u64, to: u64) -> IndexerError {
    let msg = err.message.to_ascii_lowercase();
    if RATE_PHRASES.iter().any(|p| msg.contains(p)) || err.code == 429 {
        return IndexerError::RateLimited(err.message.clone());
    }
    if err.code == -32005 || RANGE_PHRASES.iter().any(|p| msg.contains(p)) {
        return IndexerError::RangeTooLarge {
            from,
            to,
            message: err.message.clone(),
        };
    }
    IndexerError::Rpc(err.to_string())
}

// ─── Logs ────────────────────────────────────────────────────────────────────

/// A log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    #[serde(default)]
    pub block_hash: Option<String>,
    /// Non-standard; returned by some nodes (reth, recent geth).
    #[serde(default)]
    pub block_timestamp: Option<String>,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl WireLog {
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn block_time(&self) -> Result<Option<i64>, IndexerError> {
        self.block_timestamp
            .as_deref()
            .map(|t| {
                let secs = parse_hex_u64(t)?;
                i64::try_from(secs)
                    .map_err(|_| IndexerError::Rpc(format!("blockTimestamp {t} out of range")))
            })
            .transpose()
    }

    /// Convert into the decoder's input, with the block time resolved.
    pub fn into_raw(self, chain_id: ChainId, block_time: i64) -> Result<RawLog, IndexerError> {
        Ok(RawLog {
            chain_id,
            block_number: parse_hex_u64(&self.block_number)?,
            block_time,
            tx_hash: self.transaction_hash.to_ascii_lowercase(),
            log_index: u32::try_from(parse_hex_u64(&self.log_index)?)
                .map_err(|_| IndexerError::Rpc(format!("logIndex {} out of range", self.log_index)))?,
            address: normalize_address(&self.address),
            topics: self.topics,
            data: self.data,
            removed: self.removed.unwrap_or(false),
        })
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexerError::Rpc(format!("invalid hex quantity '{s}': {e}")))
}

pub fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}
