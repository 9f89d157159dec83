//! Shared test rows for the storage backends.

use campaignindex_core::candle::{Candle, Timeframe};
use campaignindex_core::store::ScanBatch;
use campaignindex_core::types::{
    CampaignCreated, ChainId, ContractKind, DecodedEvent, EventStatus, TradeEvent, TradeSide,
    VoteEvent,
};

pub const CHAIN: ChainId = 8453;
pub const CAMPAIGN: &str = "0x0000000000000000000000000000000000000abc";
pub const CREATOR: &str = "0x00000000000000000000000000000000000000c1";
const WALLET: &str = "0x00000000000000000000000000000000000000aa";
const TREASURY: &str = "0x00000000000000000000000000000000000000fe";

pub fn tf() -> [Timeframe; 1] {
    [Timeframe::from_secs(100).unwrap()]
}

pub fn buy(tx: &str, log_index: u32, block: u64, time: i64, price: f64) -> TradeEvent {
    TradeEvent {
        chain_id: CHAIN,
        campaign_address: CAMPAIGN.into(),
        tx_hash: tx.into(),
        log_index,
        block_number: block,
        block_time: time,
        side: TradeSide::Buy,
        wallet: WALLET.into(),
        token_amount: 1_000,
        native_amount: (price * 1_000.0).round() as u128,
        price_native: price,
        status: EventStatus::Confirmed,
    }
}

/// Three buys at t=100..102 and a sell at t=250.
pub fn scenario_trades() -> Vec<TradeEvent> {
    let mut sell = buy("0x04", 0, 13, 250, 1.1);
    sell.side = TradeSide::Sell;
    vec![
        buy("0x01", 0, 10, 100, 1.0),
        buy("0x02", 0, 11, 101, 1.2),
        buy("0x03", 0, 12, 102, 0.9),
        sell,
    ]
}

pub fn assert_scenario_candles(candles: &[Candle]) {
    assert_eq!(candles.len(), 2);
    let (a, b) = (&candles[0], &candles[1]);
    assert_eq!(a.bucket_start, 100);
    assert_eq!((a.open, a.high, a.low, a.close), (1.0, 1.2, 0.9, 0.9));
    assert_eq!(a.volume_native, 3_100);
    assert_eq!(a.trade_count, 3);
    assert_eq!(b.bucket_start, 200);
    assert_eq!((b.open, b.high, b.low, b.close), (1.1, 1.1, 1.1, 1.1));
    assert_eq!(b.volume_native, 1_100);
    assert_eq!(b.trade_count, 1);
}

pub fn trade_batch(from: u64, to: u64, trades: Vec<TradeEvent>) -> ScanBatch {
    ScanBatch::new(CHAIN, ContractKind::Campaign, from, to)
        .with_events(trades.into_iter().map(DecodedEvent::Trade).collect())
}

pub fn registration_batch() -> ScanBatch {
    let created = CampaignCreated {
        chain_id: CHAIN,
        campaign_address: CAMPAIGN.into(),
        creator: CREATOR.into(),
        token_address: "0x00000000000000000000000000000000000000d0".into(),
        factory_address: "0x00000000000000000000000000000000000000f0".into(),
        tx_hash: "0xc0".into(),
        log_index: 0,
        block_number: 5,
        block_time: 50,
    };
    ScanBatch::new(CHAIN, ContractKind::Factory, 1, 5)
        .with_events(vec![DecodedEvent::CampaignCreated(created)])
}

pub fn vote(tx: &str, block: u64) -> VoteEvent {
    VoteEvent {
        chain_id: CHAIN,
        campaign_address: CAMPAIGN.into(),
        voter_address: WALLET.into(),
        asset_address: "0x00000000000000000000000000000000000000d0".into(),
        amount_raw: 5_000,
        tx_hash: tx.into(),
        log_index: 1,
        block_number: block,
        block_time: block as i64 * 10,
        meta: serde_json::json!({ "treasury": TREASURY, "event": "VoteCast" }),
        status: EventStatus::Confirmed,
    }
}

pub fn vote_batch() -> ScanBatch {
    ScanBatch::new(CHAIN, ContractKind::VoteTreasury, 1, 6).with_events(vec![
        DecodedEvent::Vote(vote("0xd1", 5)),
        DecodedEvent::Vote(vote("0xd2", 6)),
    ])
}
