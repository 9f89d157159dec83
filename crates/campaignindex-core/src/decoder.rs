//! Event decoder: raw logs → typed domain events.
//!
//! Dispatch is by `(contract family, topic[0])`. A log whose topic is not
//! known for its family is "not recognised" and dropped silently. A log with
//! a known topic but malformed data is a [`DecodeError`]; [`decode_batch`]
//! logs it and skips that single log.
//!
//! Event shapes:
//!
//! ```text
//! Factory       CampaignCreated(address indexed campaign, address indexed creator, address token)
//! Campaign      TokensPurchased(address indexed buyer,  uint256 tokenAmount, uint256 nativeAmount)
//! Campaign      TokensSold     (address indexed seller, uint256 tokenAmount, uint256 nativeAmount)
//! VoteTreasury  VoteCast(address indexed campaign, address indexed voter, address asset, uint256 amount)
//! ```

use std::sync::OnceLock;

use alloy_primitives::U256;
use tiny_keccak::{Hasher, Keccak};

use crate::error::DecodeError;
use crate::types::{
    CampaignCreated, ContractKind, DecodedEvent, EventStatus, RawLog, TradeEvent, TradeSide,
    VoteEvent,
};

pub const CAMPAIGN_CREATED: &str = "CampaignCreated(address,address,address)";
pub const TOKENS_PURCHASED: &str = "TokensPurchased(address,uint256,uint256)";
pub const TOKENS_SOLD: &str = "TokensSold(address,uint256,uint256)";
pub const VOTE_CAST: &str = "VoteCast(address,address,address,uint256)";

const WORD: usize = 32;

/// keccak256 of a canonical event signature, as a `0x…` topic.
pub fn event_topic(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

struct Topics {
    campaign_created: String,
    tokens_purchased: String,
    tokens_sold: String,
    vote_cast: String,
}

fn topics() -> &'static Topics {
    static TOPICS: OnceLock<Topics> = OnceLock::new();
    TOPICS.get_or_init(|| Topics {
        campaign_created: event_topic(CAMPAIGN_CREATED),
        tokens_purchased: event_topic(TOKENS_PURCHASED),
        tokens_sold: event_topic(TOKENS_SOLD),
        vote_cast: event_topic(VOTE_CAST),
    })
}

/// Topic-0 values the given family can emit (useful as an `eth_getLogs`
/// topic filter).
pub fn topics_for(kind: ContractKind) -> Vec<String> {
    let t = topics();
    match kind {
        ContractKind::Factory => vec![t.campaign_created.clone()],
        ContractKind::Campaign => vec![t.tokens_purchased.clone(), t.tokens_sold.clone()],
        ContractKind::VoteTreasury => vec![t.vote_cast.clone()],
    }
}

/// Decode one log emitted by a contract of family `kind`.
///
/// Returns `Ok(None)` for logs that are not recognised.
pub fn decode_log(kind: ContractKind, log: &RawLog) -> Result<Option<DecodedEvent>, DecodeError> {
    let Some(topic0) = log.topic0() else {
        return Ok(None);
    };
    let topic0 = topic0.to_ascii_lowercase();
    let t = topics();

    let event = match kind {
        ContractKind::Factory if topic0 == t.campaign_created => {
            DecodedEvent::CampaignCreated(decode_campaign_created(log)?)
        }
        ContractKind::Campaign if topic0 == t.tokens_purchased => {
            DecodedEvent::Trade(decode_trade(log, TradeSide::Buy)?)
        }
        ContractKind::Campaign if topic0 == t.tokens_sold => {
            DecodedEvent::Trade(decode_trade(log, TradeSide::Sell)?)
        }
        ContractKind::VoteTreasury if topic0 == t.vote_cast => {
            DecodedEvent::Vote(decode_vote(log)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Decode every log of a batch, in chain order.
///
/// Removed logs and unrecognised topics are dropped; malformed logs are
/// logged and skipped so one bad entry never sinks the batch.
pub fn decode_batch(kind: ContractKind, logs: &[RawLog]) -> Vec<DecodedEvent> {
    let mut ordered: Vec<&RawLog> = logs.iter().filter(|l| !l.removed).collect();
    ordered.sort_by_key(|l| l.position());
    ordered.dedup_by(|a, b| a.position() == b.position() && a.tx_hash == b.tx_hash);

    let mut events = Vec::with_capacity(ordered.len());
    for log in ordered {
        match decode_log(kind, log) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {
                tracing::debug!(
                    chain_id = log.chain_id,
                    %kind,
                    tx = %log.tx_hash,
                    log_index = log.log_index,
                    "unrecognised log ignored"
                );
            }
            Err(e) => {
                tracing::warn!(
                    chain_id = log.chain_id,
                    %kind,
                    tx = %log.tx_hash,
                    log_index = log.log_index,
                    error = %e,
                    "skipping malformed log"
                );
            }
        }
    }
    events
}

fn decode_campaign_created(log: &RawLog) -> Result<CampaignCreated, DecodeError> {
    let campaign = address_from_topic(log, 1)?;
    let creator = address_from_topic(log, 2)?;
    let data = data_bytes(log)?;
    let token = address_from_word(word(&data, 0)?);

    Ok(CampaignCreated {
        chain_id: log.chain_id,
        campaign_address: campaign,
        creator,
        token_address: token,
        factory_address: log.address.to_ascii_lowercase(),
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        block_number: log.block_number,
        block_time: log.block_time,
    })
}

fn decode_trade(log: &RawLog, side: TradeSide) -> Result<TradeEvent, DecodeError> {
    let wallet = address_from_topic(log, 1)?;
    let data = data_bytes(log)?;
    let token_amount = uint_from_word(word(&data, 0)?, "tokenAmount")?;
    let native_amount = uint_from_word(word(&data, 1)?, "nativeAmount")?;
    if token_amount == 0 {
        return Err(DecodeError::ZeroAmount { field: "tokenAmount" });
    }

    Ok(TradeEvent {
        chain_id: log.chain_id,
        campaign_address: log.address.to_ascii_lowercase(),
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        block_number: log.block_number,
        block_time: log.block_time,
        side,
        wallet,
        token_amount,
        native_amount,
        price_native: native_amount as f64 / token_amount as f64,
        status: EventStatus::Confirmed,
    })
}

fn decode_vote(log: &RawLog) -> Result<VoteEvent, DecodeError> {
    let campaign = address_from_topic(log, 1)?;
    let voter = address_from_topic(log, 2)?;
    let data = data_bytes(log)?;
    let asset = address_from_word(word(&data, 0)?);
    let amount_raw = uint_from_word(word(&data, 1)?, "amount")?;

    Ok(VoteEvent {
        chain_id: log.chain_id,
        campaign_address: campaign,
        voter_address: voter,
        asset_address: asset,
        amount_raw,
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        block_number: log.block_number,
        block_time: log.block_time,
        meta: serde_json::json!({
            "treasury": log.address.to_ascii_lowercase(),
            "event": "VoteCast",
        }),
        status: EventStatus::Confirmed,
    })
}

// ─── ABI word helpers ────────────────────────────────────────────────────────

fn decode_hex(field: &'static str, s: &str) -> Result<Vec<u8>, DecodeError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| DecodeError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

fn data_bytes(log: &RawLog) -> Result<Vec<u8>, DecodeError> {
    decode_hex("data", &log.data)
}

fn word(data: &[u8], index: usize) -> Result<&[u8], DecodeError> {
    let end = (index + 1) * WORD;
    data.get(index * WORD..end).ok_or(DecodeError::ShortData {
        expected: end,
        actual: data.len(),
    })
}

fn address_from_word(w: &[u8]) -> String {
    format!("0x{}", hex::encode(&w[12..WORD]))
}

fn address_from_topic(log: &RawLog, index: usize) -> Result<String, DecodeError> {
    let topic = log
        .topics
        .get(index)
        .ok_or(DecodeError::MissingTopic { index })?;
    let bytes = decode_hex("topic", topic)?;
    if bytes.len() != WORD {
        return Err(DecodeError::ShortData {
            expected: WORD,
            actual: bytes.len(),
        });
    }
    Ok(address_from_word(&bytes))
}

fn uint_from_word(w: &[u8], field: &'static str) -> Result<u128, DecodeError> {
    let value = U256::from_be_slice(w);
    u128::try_from(value).map_err(|_| DecodeError::AmountOverflow { field })
}

/// Left-pad an address into a 32-byte topic (`0x` + 64 hex chars).
pub fn address_topic(address: &str) -> String {
    let hex = address.strip_prefix("0x").unwrap_or(address);
    format!("0x{:0>64}", hex.to_ascii_lowercase())
}

/// ABI-encode a sequence of static words as log data.
pub fn encode_words(words: &[AbiWord<'_>]) -> String {
    let mut out = String::with_capacity(2 + words.len() * 64);
    out.push_str("0x");
    for w in words {
        match w {
            AbiWord::Uint(v) => out.push_str(&format!("{v:064x}")),
            AbiWord::Address(a) => {
                let hex = a.strip_prefix("0x").unwrap_or(a);
                out.push_str(&format!("{:0>64}", hex.to_ascii_lowercase()));
            }
        }
    }
    out
}

/// A static ABI value for [`encode_words`].
#[derive(Debug, Clone, Copy)]
pub enum AbiWord<'a> {
    Uint(u128),
    Address(&'a str),
}
