//! End-to-end pipeline tests against a scripted chain client and the
//! in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use campaignindex_core::candle::Candle;
use campaignindex_core::config::ScanConfig;
use campaignindex_core::error::IndexerError;
use campaignindex_core::publisher::{channel_name, BroadcastHub, RealtimeHub};
use campaignindex_core::store::{IndexStore, ScanMode};
use campaignindex_core::types::{ContractKind, TradeSide};
use campaignindex_evm::{PipelineBuilder, RepairJob};
use campaignindex_storage::MemoryStore;

use common::*;

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn candles(store: &dyn IndexStore) -> Vec<Candle> {
    store.recent_candles(CHAIN, CAMPAIGN, tf(), 100).await.unwrap()
}

async fn cursor(store: &dyn IndexStore, kind: ContractKind) -> Option<u64> {
    store
        .load_cursor(CHAIN, kind)
        .await
        .unwrap()
        .map(|c| c.last_scanned_block)
}

fn assert_candle(c: &Candle, bucket: i64, ohlc: (f64, f64, f64, f64), volume: u128, count: u64) {
    assert_eq!(c.bucket_start, bucket, "bucket start");
    assert_eq!((c.open, c.high, c.low, c.close), ohlc, "ohlc of bucket {bucket}");
    assert_eq!(c.volume_native, volume, "volume of bucket {bucket}");
    assert_eq!(c.trade_count, count, "trade count of bucket {bucket}");
}

// ─── Live scanning ───────────────────────────────────────────────────────────

#[tokio::test]
async fn scan_cycle_indexes_registrations_trades_and_votes() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::default());
    let pipeline = pipeline(client.clone(), store.clone(), hub.clone());

    let channel = channel_name(CHAIN, CAMPAIGN);
    let grant = hub
        .issue_subscribe_token(&channel, Duration::from_secs(60))
        .await
        .unwrap();
    let mut rx = hub.subscribe_to(&channel, &grant.token).unwrap();

    let report = pipeline.scan_cycle().await.unwrap();
    assert_eq!(report.confirmed_head, 20);
    assert!(report.skipped.is_empty());
    assert_eq!(report.scanned.inserted, 5);
    assert_eq!(report.scanned.published, 5);

    // registration discovered and scanned within the same cycle
    assert_eq!(store.campaign_addresses(CHAIN).await.unwrap(), vec![CAMPAIGN.to_string()]);
    for kind in ContractKind::ALL {
        assert_eq!(cursor(&*store, kind).await, Some(20), "{kind} cursor");
    }

    let c = candles(&*store).await;
    assert_eq!(c.len(), 2);
    assert_candle(&c[0], 100, (1.0, 1.2, 0.9, 0.9), 3_100, 3);
    assert_candle(&c[1], 200, (1.1, 1.1, 1.1, 1.1), 1_100, 1);

    let summary = store.campaign_summary(CHAIN, CAMPAIGN).await.unwrap().unwrap();
    assert_eq!(summary.trade_count, 4);
    assert_eq!(summary.buy_count, 3);
    assert_eq!(summary.sell_count, 1);
    assert_eq!(summary.vote_count, 1);
    assert_eq!(summary.creator.as_deref(), Some(CREATOR));

    // trades then the vote, in commit order
    let mut received = vec![];
    while let Ok(msg) = rx.try_recv() {
        received.push(msg);
    }
    assert_eq!(received.len(), 5);
    assert_eq!(received[0]["type"], "trade");
    assert_eq!(received[0]["txHash"], "0xa1");
    assert_eq!(received[4]["type"], "vote");
}

#[tokio::test]
async fn later_cycles_only_scan_new_blocks() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default()));

    pipeline.scan_cycle().await.unwrap();
    let calls_after_first = client.calls().len();

    // head unchanged: nothing to fetch
    let idle = pipeline.scan_cycle().await.unwrap();
    assert_eq!(idle.scanned.sub_ranges, 0);
    assert_eq!(client.calls().len(), calls_after_first);

    client.set_head(30);
    pipeline.scan_cycle().await.unwrap();
    let new_calls = &client.calls()[calls_after_first..];
    assert!(!new_calls.is_empty());
    assert!(new_calls.iter().all(|&(from, to)| from == 21 && to == 30));
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, Some(30));
}

#[tokio::test]
async fn confirmations_hold_back_the_head() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let mut chain = chain_config();
    chain.confirmations = Some(8);
    let pipeline = PipelineBuilder::new(chain)
        .client(client)
        .store(store.clone())
        .scan(scan_config())
        .retry(fast_retry())
        .timeframes(vec![tf()])
        .build()
        .unwrap();

    let report = pipeline.scan_cycle().await.unwrap();
    assert_eq!(report.confirmed_head, 12);
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, Some(12));
    // blocks 10..=12 only; the sell at 13 is not yet confirmed
    assert_eq!(store.trade_count(), 3);
}

#[tokio::test]
async fn replaying_a_range_is_idempotent() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::default());
    let pipeline = pipeline(client, store.clone(), hub.clone());
    pipeline.scan_cycle().await.unwrap();
    let before = candles(&*store).await;

    let channel = channel_name(CHAIN, CAMPAIGN);
    let grant = hub
        .issue_subscribe_token(&channel, Duration::from_secs(60))
        .await
        .unwrap();
    let mut rx = hub.subscribe(&grant.token).unwrap();

    let replay = pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 20, ScanMode::Live)
        .await
        .unwrap();
    assert_eq!(replay.inserted, 0);
    assert_eq!(replay.unchanged, 4);
    assert_eq!(replay.published, 0);

    assert_eq!(store.trade_count(), 4);
    assert_eq!(candles(&*store).await, before);
    assert!(rx.try_recv().is_err(), "replay must not republish");
}

#[tokio::test]
async fn campaign_scan_waits_for_the_factory_cursor() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default()));

    // factory family stuck behind a failing node
    client.fail_with(vec![
        IndexerError::Rpc("boom".into()),
        IndexerError::Rpc("boom".into()),
        IndexerError::Rpc("boom".into()),
    ]);
    assert!(pipeline.scan_cycle().await.is_err());
    assert_eq!(cursor(&*store, ContractKind::Factory).await, None);
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, None);

    pipeline.scan_cycle().await.unwrap();
    let factory = cursor(&*store, ContractKind::Factory).await;
    let campaign = cursor(&*store, ContractKind::Campaign).await;
    assert!(campaign <= factory);
    assert_eq!(store.trade_count(), 4);
}

// ─── Chunking and retries ────────────────────────────────────────────────────

#[tokio::test]
async fn range_too_large_shrinks_window_and_continues() {
    let client = Arc::new(MockChainClient::new(1_000, vec![]));
    client.limit_range(130);
    let store = Arc::new(MemoryStore::new());
    let pipeline = builder(client.clone(), store.clone(), Arc::new(BroadcastHub::default()))
        .scan(ScanConfig {
            growth_after_successes: 1_000,
            ..scan_config()
        })
        .build()
        .unwrap();

    let report = pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 1_000, ScanMode::Live)
        .await
        .unwrap();

    // 1000 → 500 → 250 → 125
    assert_eq!(pipeline.scanner().window_size(), 125);
    let calls = client.calls();
    assert_eq!(&calls[..3], &[(1, 1_000), (1, 500), (1, 250)]);
    assert_eq!(calls[3], (1, 125));
    assert_eq!(report.sub_ranges, 8);
    assert_eq!(calls.len(), 3 + 8);
    assert!(calls[3..].iter().all(|&(from, to)| to - from + 1 <= 130));
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, Some(1_000));
}

#[tokio::test]
async fn window_never_shrinks_below_the_floor() {
    let client = Arc::new(MockChainClient::new(1_000, vec![]));
    client.limit_range(50);
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default()));

    let err = pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 1_000, ScanMode::Live)
        .await
        .unwrap_err();

    assert!(err.is_range_too_large());
    assert_eq!(pipeline.scanner().window_size(), 100);
    assert!(client.calls().iter().all(|&(from, to)| to - from + 1 >= 100));
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, None);
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default()));

    client.fail_with(vec![
        IndexerError::Timeout { ms: 10 },
        IndexerError::RateLimited("slow down".into()),
    ]);
    let report = pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 20, ScanMode::Live)
        .await
        .unwrap();

    assert_eq!(report.inserted, 4);
    assert_eq!(client.calls(), vec![(1, 20), (1, 20), (1, 20)]);
}

#[tokio::test]
async fn exhausted_retries_leave_the_cursor_untouched() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default()));

    client.fail_with((0..3).map(|_| IndexerError::Rpc("upstream 502".into())).collect());
    let err = pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 20, ScanMode::Live)
        .await
        .unwrap_err();

    assert!(matches!(err, IndexerError::Rpc(_)));
    assert_eq!(client.calls().len(), 3);
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, None);
    assert_eq!(store.trade_count(), 0);
}

#[tokio::test]
async fn non_retryable_errors_fail_fast() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default()));

    client.fail_with(vec![IndexerError::Other("bad filter".into())]);
    assert!(pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 20, ScanMode::Live)
        .await
        .is_err());
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn failed_commit_keeps_cursor_and_publishes_nothing() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(FlakyStore::new());
    let hub = Arc::new(BroadcastHub::default());
    let pipeline = pipeline(client, store.clone(), hub.clone());

    let channel = channel_name(CHAIN, CAMPAIGN);
    let grant = hub
        .issue_subscribe_token(&channel, Duration::from_secs(60))
        .await
        .unwrap();
    let mut rx = hub.subscribe(&grant.token).unwrap();

    store.fail_commits(true);
    let err = pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 20, ScanMode::Live)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::Storage(_)));
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, None);
    assert_eq!(store.inner.trade_count(), 0);
    assert!(rx.try_recv().is_err());

    // the same range succeeds once the store recovers
    store.fail_commits(false);
    let report = pipeline
        .scanner()
        .scan_range(ContractKind::Campaign, &[CAMPAIGN.to_string()], 1, 20, ScanMode::Live)
        .await
        .unwrap();
    assert_eq!(report.inserted, 4);
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, Some(20));
}

// ─── Repair ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn repair_corrects_a_shallow_reorg() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default())));
    pipeline.scan_cycle().await.unwrap();

    // block 12 reorged: 0xa3 is gone, 0xa5 took its place at a higher price
    let mut logs = scenario_logs();
    logs.retain(|l| l.tx_hash != "0xa3");
    logs.push(trade_log(TradeSide::Buy, "0xa5", 0, 12, 102, 1.5));
    client.set_logs(logs);

    let report = RepairJob::new(pipeline.clone()).run_once().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.orphaned, 1);

    let c = candles(&*store).await;
    assert_candle(&c[0], 100, (1.0, 1.5, 1.0, 1.5), 3_700, 3);
    assert_candle(&c[1], 200, (1.1, 1.1, 1.1, 1.1), 1_100, 1);

    let recent: Vec<String> = store
        .recent_trades(CHAIN, CAMPAIGN, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.tx_hash)
        .collect();
    assert_eq!(recent, vec!["0xa4", "0xa5", "0xa2", "0xa1"]);
    // orphaned row is kept, not deleted
    assert_eq!(store.trade_count(), 5);
    // cursors end where they were
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, Some(20));
}

#[tokio::test]
async fn repair_rewrites_a_trade_whose_block_fields_changed() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default())));
    pipeline.scan_cycle().await.unwrap();

    // same (tx, log index), re-mined with a later timestamp and new price
    let logs = scenario_logs()
        .into_iter()
        .map(|l| {
            if l.tx_hash == "0xa3" {
                trade_log(TradeSide::Buy, "0xa3", 0, 12, 205, 2.0)
            } else {
                l
            }
        })
        .collect();
    client.set_logs(logs);

    let report = RepairJob::new(pipeline).run_once().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.orphaned, 0);

    let stored = store.trades_for(CHAIN, CAMPAIGN);
    assert_eq!(stored.len(), 4);
    let a3 = stored.iter().find(|t| t.tx_hash == "0xa3").unwrap();
    assert_eq!((a3.block_time, a3.price_native), (205, 2.0));

    // the old bucket loses the trade, the new one gains it in chain order
    let c = candles(&*store).await;
    assert_candle(&c[0], 100, (1.0, 1.2, 1.0, 1.2), 2_200, 2);
    assert_candle(&c[1], 200, (2.0, 2.0, 1.1, 1.1), 3_100, 2);
}

#[tokio::test]
async fn repair_without_changes_is_a_no_op() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(pipeline(client, store.clone(), Arc::new(BroadcastHub::default())));
    pipeline.scan_cycle().await.unwrap();
    let before = candles(&*store).await;

    let report = RepairJob::new(pipeline).run_once().await.unwrap();
    assert_eq!(report.inserted + report.updated + report.orphaned, 0);
    assert_eq!(candles(&*store).await, before);
}

#[tokio::test]
async fn repair_skips_families_without_a_cursor() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(pipeline(client.clone(), store.clone(), Arc::new(BroadcastHub::default())));

    let report = RepairJob::new(pipeline).run_once().await.unwrap();
    assert_eq!(report.sub_ranges, 0);
    assert!(client.calls().is_empty());
    assert!(store.cursors().await.unwrap().is_empty());
}

#[tokio::test]
async fn scanner_skips_a_family_held_by_repair() {
    let client = Arc::new(MockChainClient::new(20, scenario_logs()));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(client, store.clone(), Arc::new(BroadcastHub::default()));

    let lock = pipeline.locks().handle(CHAIN, ContractKind::Campaign);
    let guard = lock.lock().await;
    let report = pipeline.scan_cycle().await.unwrap();
    assert_eq!(report.skipped, vec![ContractKind::Campaign]);
    assert_eq!(cursor(&*store, ContractKind::Factory).await, Some(20));
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, None);
    drop(guard);

    let report = pipeline.scan_cycle().await.unwrap();
    assert!(report.skipped.is_empty());
    assert_eq!(cursor(&*store, ContractKind::Campaign).await, Some(20));
    assert_eq!(store.trade_count(), 4);
}

#[tokio::test]
async fn builder_requires_client_and_store() {
    let err = PipelineBuilder::new(chain_config())
        .store(Arc::new(MemoryStore::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, IndexerError::Config(_)));

    let err = PipelineBuilder::new(chain_config())
        .client(Arc::new(MockChainClient::new(1, vec![])))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, IndexerError::Config(_)));
}
