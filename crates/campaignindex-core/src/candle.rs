//! Candle aggregation: folds trades into fixed-timeframe OHLCV buckets.
//!
//! A candle is a materialised view over the confirmed trades whose block time
//! falls in `[bucket_start, bucket_start + timeframe)`. Trades must be folded
//! in chain order `(block_number, log_index)`: `open` is the first trade and
//! `close` the last, so arrival order would make both meaningless.
//!
//! Stores never patch a candle in place when trades change. They recompute
//! every affected bucket with [`recompute_bucket`], which is the same fold the
//! incremental [`CandleAggregator`] performs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IndexerError;
use crate::types::{amount, ChainId, LogPosition, TradeEvent};

// ─── Timeframe ───────────────────────────────────────────────────────────────

/// Candle width in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timeframe(u64);

impl Timeframe {
    pub const M1: Timeframe = Timeframe(60);
    pub const M5: Timeframe = Timeframe(300);
    pub const M15: Timeframe = Timeframe(900);
    pub const H1: Timeframe = Timeframe(3_600);
    pub const H4: Timeframe = Timeframe(14_400);
    pub const D1: Timeframe = Timeframe(86_400);

    /// The six standard widths, narrowest first.
    pub fn defaults() -> Vec<Timeframe> {
        vec![Self::M1, Self::M5, Self::M15, Self::H1, Self::H4, Self::D1]
    }

    pub fn from_secs(secs: u64) -> Result<Self, String> {
        if secs == 0 {
            return Err("timeframe must be at least one second".into());
        }
        Ok(Self(secs))
    }

    pub fn secs(&self) -> u64 {
        self.0
    }

    /// Short label: `1m`, `4h`, `1d`, or `<n>s` for odd widths.
    pub fn label(&self) -> String {
        let s = self.0;
        if s % 86_400 == 0 {
            format!("{}d", s / 86_400)
        } else if s % 3_600 == 0 {
            format!("{}h", s / 3_600)
        } else if s % 60 == 0 {
            format!("{}m", s / 60)
        } else {
            format!("{s}s")
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(secs) = s.parse::<u64>() {
            return Self::from_secs(secs);
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("invalid timeframe '{s}'"))?;
        let (num, unit) = s.split_at(split);
        let n: u64 = num.parse().map_err(|_| format!("invalid timeframe '{s}'"))?;
        let mult = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => return Err(format!("invalid timeframe unit in '{s}'")),
        };
        Self::from_secs(n * mult)
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Label(String),
        }
        match Raw::deserialize(d)? {
            Raw::Secs(secs) => Timeframe::from_secs(secs),
            Raw::Label(label) => label.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}

/// `floor(block_time / timeframe) * timeframe`.
pub fn bucket_start(block_time: i64, timeframe: Timeframe) -> i64 {
    let width = timeframe.secs() as i64;
    block_time.div_euclid(width) * width
}

// ─── Candle ──────────────────────────────────────────────────────────────────

/// Identifies one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub chain_id: ChainId,
    pub campaign_address: String,
    pub timeframe: Timeframe,
    pub bucket_start: i64,
}

impl BucketKey {
    pub fn for_trade(trade: &TradeEvent, timeframe: Timeframe) -> Self {
        Self {
            chain_id: trade.chain_id,
            campaign_address: trade.campaign_address.clone(),
            timeframe,
            bucket_start: bucket_start(trade.block_time, timeframe),
        }
    }

    /// Exclusive end of the bucket.
    pub fn end(&self) -> i64 {
        self.bucket_start + self.timeframe.secs() as i64
    }

    pub fn contains(&self, trade: &TradeEvent) -> bool {
        trade.chain_id == self.chain_id
            && trade.campaign_address == self.campaign_address
            && trade.block_time >= self.bucket_start
            && trade.block_time < self.end()
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub chain_id: ChainId,
    pub campaign_address: String,
    pub timeframe: Timeframe,
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(with = "amount")]
    pub volume_native: u128,
    pub trade_count: u64,
}

impl Candle {
    /// A fresh bucket seeded by its first trade.
    pub fn open_with(trade: &TradeEvent, timeframe: Timeframe) -> Self {
        let p = trade.price_native;
        Self {
            chain_id: trade.chain_id,
            campaign_address: trade.campaign_address.clone(),
            timeframe,
            bucket_start: bucket_start(trade.block_time, timeframe),
            open: p,
            high: p,
            low: p,
            close: p,
            volume_native: trade.native_amount,
            trade_count: 1,
        }
    }

    /// Fold the next trade (in chain order) into an existing bucket.
    pub fn apply(&mut self, trade: &TradeEvent) {
        let p = trade.price_native;
        self.high = self.high.max(p);
        self.low = self.low.min(p);
        self.close = p;
        self.volume_native = self.volume_native.saturating_add(trade.native_amount);
        self.trade_count += 1;
    }

    pub fn key(&self) -> BucketKey {
        BucketKey {
            chain_id: self.chain_id,
            campaign_address: self.campaign_address.clone(),
            timeframe: self.timeframe,
            bucket_start: self.bucket_start,
        }
    }
}

// ─── Aggregator ──────────────────────────────────────────────────────────────

/// Incremental candle builder over a set of timeframes.
///
/// Tracks the last applied position per bucket and refuses trades that would
/// go backwards in chain order.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    timeframes: Vec<Timeframe>,
    buckets: BTreeMap<BucketKey, (Candle, LogPosition)>,
}

impl CandleAggregator {
    pub fn new(timeframes: &[Timeframe]) -> Self {
        Self {
            timeframes: timeframes.to_vec(),
            buckets: BTreeMap::new(),
        }
    }

    /// Apply one trade to every configured timeframe. Orphaned trades are
    /// ignored.
    pub fn apply(&mut self, trade: &TradeEvent) -> Result<(), IndexerError> {
        if !trade.is_confirmed() {
            return Ok(());
        }
        let pos = trade.position();
        for &tf in &self.timeframes {
            let key = BucketKey::for_trade(trade, tf);
            match self.buckets.get_mut(&key) {
                Some((candle, last)) => {
                    if pos <= *last {
                        return Err(IndexerError::OutOfOrder {
                            block: pos.0,
                            log_index: pos.1,
                            last_block: last.0,
                            last_log_index: last.1,
                        });
                    }
                    candle.apply(trade);
                    *last = pos;
                }
                None => {
                    self.buckets.insert(key, (Candle::open_with(trade, tf), pos));
                }
            }
        }
        Ok(())
    }

    /// Sort `trades` into chain order and fold them all.
    pub fn apply_all<'a, I>(&mut self, trades: I) -> Result<(), IndexerError>
    where
        I: IntoIterator<Item = &'a TradeEvent>,
    {
        let mut sorted: Vec<&TradeEvent> = trades.into_iter().collect();
        sorted.sort_by_key(|t| t.position());
        sorted.dedup_by_key(|t| t.position());
        for trade in sorted {
            self.apply(trade)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &BucketKey) -> Option<&Candle> {
        self.buckets.get(key).map(|(c, _)| c)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// All candles, ordered by `(chain, campaign, timeframe, bucket_start)`.
    pub fn into_candles(self) -> Vec<Candle> {
        self.buckets.into_values().map(|(c, _)| c).collect()
    }
}

/// Recompute one bucket from scratch. `trades` may contain trades outside the
/// bucket or orphaned trades; both are ignored. Returns `None` when no
/// confirmed trade falls in the bucket (the stored candle should be removed).
pub fn recompute_bucket(key: &BucketKey, trades: &[TradeEvent]) -> Option<Candle> {
    let mut agg = CandleAggregator::new(&[key.timeframe]);
    // an orphaned row may share its position with the row that replaced it
    let inside = trades.iter().filter(|t| t.is_confirmed() && key.contains(t));
    // Duplicates are collapsed by position, so the fold cannot fail.
    agg.apply_all(inside).ok()?;
    agg.get(key).cloned()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
