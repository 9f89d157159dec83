//! Shared types for the indexing pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric EVM chain id (e.g. `8453` for Base).
pub type ChainId = u64;

/// `(block_number, log_index)`: the canonical chain order of a log.
pub type LogPosition = (u64, u32);

// ─── ContractKind ─────────────────────────────────────────────────────────────

/// Contract family a log was emitted by. One cursor exists per
/// `(chain, kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// Campaign factory: emits campaign registrations.
    Factory,
    /// Per-campaign sale contract: emits buys and sells.
    Campaign,
    /// Vote treasury: emits votes.
    VoteTreasury,
}

impl ContractKind {
    /// Scan order within a cycle. Factories go first so campaigns registered
    /// in this cycle are scanned in the same cycle.
    pub const ALL: [ContractKind; 3] = [Self::Factory, Self::Campaign, Self::VoteTreasury];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factory => "factory",
            Self::Campaign => "campaign",
            Self::VoteTreasury => "vote_treasury",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "factory" => Ok(Self::Factory),
            "campaign" => Ok(Self::Campaign),
            "vote_treasury" => Ok(Self::VoteTreasury),
            other => Err(format!("unknown contract kind '{other}'")),
        }
    }
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw log as handed from the chain client to the decoder. Lives only for
/// the duration of one scan batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub chain_id: ChainId,
    pub block_number: u64,
    /// Unix timestamp of the containing block (seconds).
    pub block_time: i64,
    pub tx_hash: String,
    pub log_index: u32,
    /// Emitting contract (lowercase `0x…`).
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    /// Set by the node when the log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }

    pub fn position(&self) -> LogPosition {
        (self.block_number, self.log_index)
    }
}

// ─── Domain events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("unknown trade side '{other}'")),
        }
    }
}

/// Lifecycle of a persisted event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Observed on the canonical chain at or below the confirmation lag.
    Confirmed,
    /// No longer observed by a repair rescan of its block window.
    Orphaned,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Orphaned => "orphaned",
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "orphaned" => Ok(Self::Orphaned),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// `(chain_id, tx_hash, log_index)`: identifies exactly one on-chain log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub chain_id: ChainId,
    pub tx_hash: String,
    pub log_index: u32,
}

/// A buy or sell on a campaign's sale contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub chain_id: ChainId,
    pub campaign_address: String,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub block_time: i64,
    pub side: TradeSide,
    pub wallet: String,
    /// Token quantity in base units (18 decimals).
    #[serde(with = "amount")]
    pub token_amount: u128,
    /// Native currency quantity in wei.
    #[serde(with = "amount")]
    pub native_amount: u128,
    /// Native per token.
    pub price_native: f64,
    pub status: EventStatus,
}

impl TradeEvent {
    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            chain_id: self.chain_id,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }

    pub fn position(&self) -> LogPosition {
        (self.block_number, self.log_index)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == EventStatus::Confirmed
    }
}

/// A vote recorded by the vote treasury.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEvent {
    pub chain_id: ChainId,
    pub campaign_address: String,
    pub voter_address: String,
    pub asset_address: String,
    #[serde(with = "amount")]
    pub amount_raw: u128,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub block_time: i64,
    pub meta: serde_json::Value,
    pub status: EventStatus,
}

impl VoteEvent {
    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            chain_id: self.chain_id,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }

    pub fn position(&self) -> LogPosition {
        (self.block_number, self.log_index)
    }
}

/// A campaign registered by a factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignCreated {
    pub chain_id: ChainId,
    pub campaign_address: String,
    pub creator: String,
    pub token_address: String,
    pub factory_address: String,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub block_time: i64,
}

/// Output of the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedEvent {
    Trade(TradeEvent),
    Vote(VoteEvent),
    CampaignCreated(CampaignCreated),
}

impl DecodedEvent {
    pub fn position(&self) -> LogPosition {
        match self {
            Self::Trade(t) => t.position(),
            Self::Vote(v) => v.position(),
            Self::CampaignCreated(c) => (c.block_number, c.log_index),
        }
    }

    pub fn campaign_address(&self) -> &str {
        match self {
            Self::Trade(t) => &t.campaign_address,
            Self::Vote(v) => &v.campaign_address,
            Self::CampaignCreated(c) => &c.campaign_address,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        match self {
            Self::Trade(t) => t.chain_id,
            Self::Vote(v) => v.chain_id,
            Self::CampaignCreated(c) => c.chain_id,
        }
    }
}

// ─── CampaignSummary ─────────────────────────────────────────────────────────

/// Aggregate view of one campaign, derived from registrations, confirmed
/// trades and confirmed votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub chain_id: ChainId,
    pub campaign_address: String,
    pub creator: Option<String>,
    pub token_address: Option<String>,
    pub created_block: Option<u64>,
    pub trade_count: u64,
    pub buy_count: u64,
    pub sell_count: u64,
    #[serde(with = "amount")]
    pub volume_native: u128,
    pub last_price_native: Option<f64>,
    pub last_trade_time: Option<i64>,
    pub vote_count: u64,
    pub voter_count: u64,
}

impl CampaignSummary {
    /// Summary with no activity.
    pub fn empty(chain_id: ChainId, campaign_address: impl Into<String>) -> Self {
        Self {
            chain_id,
            campaign_address: campaign_address.into(),
            creator: None,
            token_address: None,
            created_block: None,
            trade_count: 0,
            buy_count: 0,
            sell_count: 0,
            volume_native: 0,
            last_price_native: None,
            last_trade_time: None,
            vote_count: 0,
            voter_count: 0,
        }
    }
}

// ─── Address helpers ─────────────────────────────────────────────────────────

/// Returns `true` for `0x` followed by exactly 40 hex characters.
pub fn is_valid_address(addr: &str) -> bool {
    match addr.strip_prefix("0x").or_else(|| addr.strip_prefix("0X")) {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Lowercase an address so it can be compared and used as a storage key.
pub fn normalize_address(addr: &str) -> String {
    addr.trim().to_ascii_lowercase()
}

/// Serialises `u128` amounts as decimal strings (wei values overflow JS numbers).
pub mod amount {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn trade() -> TradeEvent {
        TradeEvent {
            chain_id: 8453,
            campaign_address: "0xabc".into(),
            tx_hash: "0x01".into(),
            log_index: 3,
            block_number: 100,
            block_time: 1_000,
            side: TradeSide::Buy,
            wallet: "0xwallet".into(),
            token_amount: 2_000_000_000_000_000_000,
            native_amount: 1_000_000_000_000_000_000,
            price_native: 0.5,
            status: EventStatus::Confirmed,
        }
    }

    #[test]
    fn contract_kind_roundtrip() {
        for kind in ContractKind::ALL {
            assert_eq!(kind.as_str().parse::<ContractKind>().unwrap(), kind);
        }
        assert!("router".parse::<ContractKind>().is_err());
    }

    #[test]
    fn trade_key_and_position() {
        let t = trade();
        assert_eq!(t.position(), (100, 3));
        assert_eq!(
            t.key(),
            NaturalKey { chain_id: 8453, tx_hash: "0x01".into(), log_index: 3 }
        );
    }

    #[test]
    fn amounts_serialise_as_strings() {
        let json = serde_json::to_value(trade()).unwrap();
        assert_eq!(json["tokenAmount"], "2000000000000000000");
        assert_eq!(json["side"], "buy");

        let back: TradeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.native_amount, 1_000_000_000_000_000_000);
    }

    #[test]
    fn decoded_event_is_tagged() {
        let json = serde_json::to_value(DecodedEvent::Trade(trade())).unwrap();
        assert_eq!(json["type"], "trade");
        assert_eq!(json["campaignAddress"], "0xabc");
    }

    #[test]
    fn address_validation() {
        assert!(is_valid_address("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_valid_address("52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_valid_address("0x1234"));
        assert_eq!(normalize_address(" 0xAbC "), "0xabc");
    }
}
