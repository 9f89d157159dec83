//! campaignindex CLI: run the indexer and inspect what it has stored.
//!
//! # Commands
//! ```bash
//! campaignindex run      --config campaignindex.toml
//! campaignindex once     --config campaignindex.toml [--repair]
//! campaignindex cursors  --config campaignindex.toml
//! campaignindex summary  --chain 8453 --campaign 0x…
//! campaignindex trades   --chain 8453 --campaign 0x… --limit 50
//! campaignindex votes    --chain 8453 --campaign 0x… --limit 50
//! campaignindex candles  --chain 8453 --campaign 0x… --timeframe 5m --limit 500
//! campaignindex info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use campaignindex_core::candle::Timeframe;
use campaignindex_core::config::IndexerConfig;
use campaignindex_core::cursor::CursorLocks;
use campaignindex_core::publisher::{BroadcastHub, RealtimeHub};
use campaignindex_core::query::{QueryFacade, MAX_CANDLES, MAX_TRADES};
use campaignindex_core::store::IndexStore;
use campaignindex_core::types::ChainId;
use campaignindex_evm::{ChainPipeline, PipelineBuilder, RepairJob, Scheduler};
use campaignindex_storage::{MemoryStore, SqliteStore};

mod logging;

#[derive(Parser)]
#[command(
    name = "campaignindex",
    about = "Campaign event indexer: trades, votes and OHLCV candles from EVM chains",
    long_about = "
Scans campaign factories, campaigns and vote treasuries on one or more EVM
chains, persists trades and votes idempotently, keeps OHLCV candles and
repairs shallow reorgs.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the [log] section of the config
  Any variable named by an `rpc_url = \"env:VAR\"` entry
",
    version
)]
struct Cli {
    /// Indexer config file (TOML)
    #[arg(short, long, global = true, default_value = "campaignindex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every configured chain until Ctrl-C
    Run,

    /// Run a single scan cycle per chain and exit
    Once {
        /// Also run one repair pass afterwards
        #[arg(long)]
        repair: bool,
    },

    /// Show the persisted cursor of every chain and contract family
    Cursors,

    /// Campaign summary as JSON
    Summary {
        #[arg(long)]
        chain: ChainId,
        #[arg(long)]
        campaign: String,
    },

    /// Most recent trades, newest first
    Trades {
        #[arg(long)]
        chain: ChainId,
        #[arg(long)]
        campaign: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Most recent votes, newest first
    Votes {
        #[arg(long)]
        chain: ChainId,
        #[arg(long)]
        campaign: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// OHLCV candles, oldest first
    Candles {
        #[arg(long)]
        chain: ChainId,
        #[arg(long)]
        campaign: String,
        /// Bucket width: 1m, 5m, 15m, 1h, 4h, 1d or seconds
        #[arg(long, default_value = "1m")]
        timeframe: Timeframe,
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },

    /// Show build info and defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Info = cli.command {
        cmd_info();
        return Ok(());
    }

    let config = IndexerConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::Run => cmd_run(&config).await,
        Commands::Once { repair } => cmd_once(&config, repair).await,
        Commands::Cursors => cmd_cursors(&config).await,
        Commands::Summary { chain, campaign } => {
            let facade = facade(&config).await?;
            let summary = facade.get_campaign_summary(chain, &campaign).await?;
            print_json(&summary)
        }
        Commands::Trades { chain, campaign, limit } => {
            let facade = facade(&config).await?;
            print_json(&facade.list_trades(chain, &campaign, limit).await?)
        }
        Commands::Votes { chain, campaign, limit } => {
            let facade = facade(&config).await?;
            print_json(&facade.list_votes(chain, &campaign, limit).await?)
        }
        Commands::Candles { chain, campaign, timeframe, limit } => {
            let facade = facade(&config).await?;
            print_json(&facade.list_candles(chain, &campaign, timeframe, limit).await?)
        }
        Commands::Info => Ok(()),
    }
}

// ─── Wiring ──────────────────────────────────────────────────────────────────

async fn open_store(config: &IndexerConfig) -> Result<Arc<dyn IndexStore>> {
    let url = config.storage.url.as_str();
    if url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(url)
        .await
        .with_context(|| format!("opening store {url}"))?;
    Ok(Arc::new(store))
}

fn build_pipelines(
    config: &IndexerConfig,
    store: Arc<dyn IndexStore>,
    hub: Arc<dyn RealtimeHub>,
) -> Result<Vec<Arc<ChainPipeline>>> {
    let locks = Arc::new(CursorLocks::new());
    let mut pipelines = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let pipeline = PipelineBuilder::from_config(config, chain.clone())
            .store(store.clone())
            .hub(hub.clone())
            .locks(locks.clone())
            .http_client()?
            .build()
            .with_context(|| format!("chain {}", chain.label()))?;
        pipelines.push(Arc::new(pipeline));
    }
    Ok(pipelines)
}

async fn facade(config: &IndexerConfig) -> Result<QueryFacade> {
    let store = open_store(config).await?;
    let hub = Arc::new(BroadcastHub::new(config.realtime.channel_capacity));
    Ok(QueryFacade::new(store, hub, config.realtime.token_ttl()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(config: &IndexerConfig) -> Result<()> {
    let store = open_store(config).await?;
    let hub = Arc::new(BroadcastHub::new(config.realtime.channel_capacity));
    let pipelines = build_pipelines(config, store, hub)?;

    let token = CancellationToken::new();
    let mut scheduler = Scheduler::new().with_cancellation(token.clone());
    for pipeline in pipelines {
        info!(
            chain_id = pipeline.chain_id(),
            chain = %pipeline.chain().label(),
            "indexing chain"
        );
        scheduler = scheduler.add(pipeline);
    }
    let handle = scheduler.start();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        token.cancel();
    });

    handle.wait().await;
    Ok(())
}

async fn cmd_once(config: &IndexerConfig, repair: bool) -> Result<()> {
    let store = open_store(config).await?;
    let hub = Arc::new(BroadcastHub::new(config.realtime.channel_capacity));
    for pipeline in build_pipelines(config, store, hub)? {
        let label = pipeline.chain().label();
        let report = pipeline
            .scan_cycle()
            .await
            .with_context(|| format!("scanning {label}"))?;
        println!(
            "{label}: head {} | {} sub-ranges | {} inserted | {} updated | {} published",
            report.confirmed_head,
            report.scanned.sub_ranges,
            report.scanned.inserted,
            report.scanned.updated,
            report.scanned.published,
        );

        if repair {
            let repaired = RepairJob::new(pipeline.clone())
                .run_once()
                .await
                .with_context(|| format!("repairing {label}"))?;
            println!(
                "{label}: repair | {} updated | {} inserted | {} orphaned",
                repaired.updated, repaired.inserted, repaired.orphaned,
            );
        }
    }
    Ok(())
}

async fn cmd_cursors(config: &IndexerConfig) -> Result<()> {
    let store = open_store(config).await?;
    let cursors = store.cursors().await?;
    if cursors.is_empty() {
        println!("no cursors yet");
        return Ok(());
    }
    println!("{:<10} {:<14} {:>12}  updated", "chain", "family", "block");
    for c in cursors {
        let updated = chrono::DateTime::from_timestamp(c.updated_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| c.updated_at.to_string());
        println!(
            "{:<10} {:<14} {:>12}  {}",
            c.chain_id,
            c.kind.as_str(),
            c.last_scanned_block,
            updated
        );
    }
    Ok(())
}

fn cmd_info() {
    let scan = campaignindex_core::config::ScanConfig::default();
    let repair = campaignindex_core::config::RepairConfig::default();
    println!("campaignindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default confirmations: {} blocks", scan.confirmations);
    println!(
        "  Chunk window: {}..={} blocks (x{} after {} successes)",
        scan.chunk_floor, scan.chunk_ceiling, scan.growth_factor, scan.growth_after_successes
    );
    println!(
        "  Repair: every {} ms, lookback {} blocks, rewind {} blocks",
        repair.interval_ms, repair.lookback_depth, repair.rewind_depth
    );
    let timeframes: Vec<String> = Timeframe::defaults().iter().map(Timeframe::label).collect();
    println!("  Timeframes: {}", timeframes.join(", "));
    println!("  Query limits: {MAX_TRADES} trades, {MAX_CANDLES} candles");
    println!("  Storage backends: memory, SQLite");
}
