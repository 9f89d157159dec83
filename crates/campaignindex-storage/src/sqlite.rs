//! SQLite storage backend for CampaignIndex.
//!
//! Persists cursors, campaign registrations, trades, votes and candles to a
//! single SQLite file. Every batch commit runs in one `sqlx` transaction:
//! row upserts, orphaning, candle rebuilds and the cursor advance either all
//! land or none do.
//!
//! # Usage
//! ```rust,no_run
//! use campaignindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./campaigns.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use campaignindex_core::candle::{recompute_bucket, BucketKey, Candle, Timeframe};
use campaignindex_core::cursor::ChainCursor;
use campaignindex_core::error::IndexerError;
use campaignindex_core::store::{
    plan_commit, summarize, CommitOutcome, IndexStore, PriorRows, ScanBatch, ScanMode,
};
use campaignindex_core::types::{
    CampaignCreated, CampaignSummary, ChainId, ContractKind, DecodedEvent, EventStatus, NaturalKey,
    TradeEvent, VoteEvent,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cursors (
        chain_id           INTEGER NOT NULL,
        kind               TEXT    NOT NULL,
        last_scanned_block INTEGER NOT NULL,
        updated_at         INTEGER NOT NULL,
        PRIMARY KEY (chain_id, kind)
    );",
    "CREATE TABLE IF NOT EXISTS campaigns (
        chain_id         INTEGER NOT NULL,
        campaign_address TEXT    NOT NULL,
        creator          TEXT    NOT NULL,
        token_address    TEXT    NOT NULL,
        factory_address  TEXT    NOT NULL,
        tx_hash          TEXT    NOT NULL,
        log_index        INTEGER NOT NULL,
        block_number     INTEGER NOT NULL,
        block_time       INTEGER NOT NULL,
        PRIMARY KEY (chain_id, campaign_address)
    );",
    "CREATE TABLE IF NOT EXISTS trades (
        chain_id         INTEGER NOT NULL,
        tx_hash          TEXT    NOT NULL,
        log_index        INTEGER NOT NULL,
        campaign_address TEXT    NOT NULL,
        block_number     INTEGER NOT NULL,
        block_time       INTEGER NOT NULL,
        side             TEXT    NOT NULL,
        wallet           TEXT    NOT NULL,
        token_amount     TEXT    NOT NULL,
        native_amount    TEXT    NOT NULL,
        price_native     REAL    NOT NULL,
        status           TEXT    NOT NULL,
        PRIMARY KEY (chain_id, tx_hash, log_index)
    );",
    "CREATE INDEX IF NOT EXISTS idx_trades_campaign
        ON trades (chain_id, campaign_address, block_number, log_index);",
    "CREATE INDEX IF NOT EXISTS idx_trades_time
        ON trades (chain_id, campaign_address, block_time);",
    "CREATE TABLE IF NOT EXISTS votes (
        chain_id         INTEGER NOT NULL,
        tx_hash          TEXT    NOT NULL,
        log_index        INTEGER NOT NULL,
        campaign_address TEXT    NOT NULL,
        voter_address    TEXT    NOT NULL,
        asset_address    TEXT    NOT NULL,
        amount_raw       TEXT    NOT NULL,
        block_number     INTEGER NOT NULL,
        block_time       INTEGER NOT NULL,
        meta_json        TEXT    NOT NULL,
        status           TEXT    NOT NULL,
        PRIMARY KEY (chain_id, tx_hash, log_index)
    );",
    "CREATE INDEX IF NOT EXISTS idx_votes_campaign
        ON votes (chain_id, campaign_address, block_number, log_index);",
    "CREATE TABLE IF NOT EXISTS candles (
        chain_id         INTEGER NOT NULL,
        campaign_address TEXT    NOT NULL,
        timeframe        INTEGER NOT NULL,
        bucket_start     INTEGER NOT NULL,
        open             REAL    NOT NULL,
        high             REAL    NOT NULL,
        low              REAL    NOT NULL,
        close            REAL    NOT NULL,
        volume_native    TEXT    NOT NULL,
        trade_count      INTEGER NOT NULL,
        PRIMARY KEY (chain_id, campaign_address, timeframe, bucket_start)
    );",
];

fn db(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed index store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./campaigns.db"`) or a full
    /// SQLite URL (`"sqlite:./campaigns.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db)?;
        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// A single connection, since every `:memory:` connection is its own
    /// database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db)?;

        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), IndexerError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(db)?;
        }
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db)?;
        }
        Ok(())
    }

    // ─── Row loading ─────────────────────────────────────────────────────────────

    async fn prior_rows(
        conn: &mut SqliteConnection,
        batch: &ScanBatch,
    ) -> Result<PriorRows, IndexerError> {
        let mut prior = PriorRows::default();
        for event in &batch.events {
            match event {
                DecodedEvent::Trade(t) => {
                    let row = sqlx::query(
                        "SELECT * FROM trades WHERE chain_id = ? AND tx_hash = ? AND log_index = ?",
                    )
                    .bind(t.chain_id as i64)
                    .bind(&t.tx_hash)
                    .bind(t.log_index as i64)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(db)?;
                    if let Some(row) = row {
                        let old = trade_from_row(&row)?;
                        prior.trades.insert(old.key(), old);
                    }
                }
                DecodedEvent::Vote(v) => {
                    let row = sqlx::query(
                        "SELECT * FROM votes WHERE chain_id = ? AND tx_hash = ? AND log_index = ?",
                    )
                    .bind(v.chain_id as i64)
                    .bind(&v.tx_hash)
                    .bind(v.log_index as i64)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(db)?;
                    if let Some(row) = row {
                        let old = vote_from_row(&row)?;
                        prior.votes.insert(old.key(), old);
                    }
                }
                DecodedEvent::CampaignCreated(_) => {}
            }
        }

        if batch.mode == ScanMode::Repair {
            let table = match batch.kind {
                ContractKind::Campaign => "trades",
                ContractKind::VoteTreasury => "votes",
                ContractKind::Factory => return Ok(prior),
            };
            let rows = sqlx::query(&format!(
                "SELECT * FROM {table} WHERE chain_id = ? AND block_number BETWEEN ? AND ?"
            ))
            .bind(batch.chain_id as i64)
            .bind(batch.from_block as i64)
            .bind(batch.to_block as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(db)?;

            for row in &rows {
                if batch.kind == ContractKind::Campaign {
                    let t = trade_from_row(row)?;
                    prior.trades.insert(t.key(), t);
                } else {
                    let v = vote_from_row(row)?;
                    prior.votes.insert(v.key(), v);
                }
            }
        }
        Ok(prior)
    }

    // ─── Writes ──────────────────────────────────────────────────────────────────

    async fn upsert_campaign(conn: &mut SqliteConnection, c: &CampaignCreated) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO campaigns
             (chain_id, campaign_address, creator, token_address, factory_address,
              tx_hash, log_index, block_number, block_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(c.chain_id as i64)
        .bind(&c.campaign_address)
        .bind(&c.creator)
        .bind(&c.token_address)
        .bind(&c.factory_address)
        .bind(&c.tx_hash)
        .bind(c.log_index as i64)
        .bind(c.block_number as i64)
        .bind(c.block_time)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn upsert_trade(conn: &mut SqliteConnection, t: &TradeEvent) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO trades
             (chain_id, tx_hash, log_index, campaign_address, block_number, block_time,
              side, wallet, token_amount, native_amount, price_native, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (chain_id, tx_hash, log_index) DO UPDATE SET
              campaign_address = excluded.campaign_address,
              block_number     = excluded.block_number,
              block_time       = excluded.block_time,
              side             = excluded.side,
              wallet           = excluded.wallet,
              token_amount     = excluded.token_amount,
              native_amount    = excluded.native_amount,
              price_native     = excluded.price_native,
              status           = excluded.status",
        )
        .bind(t.chain_id as i64)
        .bind(&t.tx_hash)
        .bind(t.log_index as i64)
        .bind(&t.campaign_address)
        .bind(t.block_number as i64)
        .bind(t.block_time)
        .bind(t.side.as_str())
        .bind(&t.wallet)
        .bind(t.token_amount.to_string())
        .bind(t.native_amount.to_string())
        .bind(t.price_native)
        .bind(t.status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn upsert_vote(conn: &mut SqliteConnection, v: &VoteEvent) -> Result<(), IndexerError> {
        let meta = serde_json::to_string(&v.meta).map_err(|e| IndexerError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO votes
             (chain_id, tx_hash, log_index, campaign_address, voter_address, asset_address,
              amount_raw, block_number, block_time, meta_json, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (chain_id, tx_hash, log_index) DO UPDATE SET
              campaign_address = excluded.campaign_address,
              voter_address    = excluded.voter_address,
              asset_address    = excluded.asset_address,
              amount_raw       = excluded.amount_raw,
              block_number     = excluded.block_number,
              block_time       = excluded.block_time,
              meta_json        = excluded.meta_json,
              status           = excluded.status",
        )
        .bind(v.chain_id as i64)
        .bind(&v.tx_hash)
        .bind(v.log_index as i64)
        .bind(&v.campaign_address)
        .bind(&v.voter_address)
        .bind(&v.asset_address)
        .bind(v.amount_raw.to_string())
        .bind(v.block_number as i64)
        .bind(v.block_time)
        .bind(meta)
        .bind(v.status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn mark_orphaned(
        conn: &mut SqliteConnection,
        table: &str,
        key: &NaturalKey,
    ) -> Result<(), IndexerError> {
        sqlx::query(&format!(
            "UPDATE {table} SET status = ? WHERE chain_id = ? AND tx_hash = ? AND log_index = ?"
        ))
        .bind(EventStatus::Orphaned.as_str())
        .bind(key.chain_id as i64)
        .bind(&key.tx_hash)
        .bind(key.log_index as i64)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn rebuild_candle(conn: &mut SqliteConnection, key: &BucketKey) -> Result<(), IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM trades
             WHERE chain_id = ? AND campaign_address = ? AND block_time >= ? AND block_time < ?
               AND status = ?",
        )
        .bind(key.chain_id as i64)
        .bind(&key.campaign_address)
        .bind(key.bucket_start)
        .bind(key.end())
        .bind(EventStatus::Confirmed.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;
        let trades = rows.iter().map(trade_from_row).collect::<Result<Vec<_>, _>>()?;

        match recompute_bucket(key, &trades) {
            Some(c) => {
                sqlx::query(
                    "INSERT OR REPLACE INTO candles
                     (chain_id, campaign_address, timeframe, bucket_start,
                      open, high, low, close, volume_native, trade_count)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(c.chain_id as i64)
                .bind(&c.campaign_address)
                .bind(c.timeframe.secs() as i64)
                .bind(c.bucket_start)
                .bind(c.open)
                .bind(c.high)
                .bind(c.low)
                .bind(c.close)
                .bind(c.volume_native.to_string())
                .bind(c.trade_count as i64)
                .execute(&mut *conn)
                .await
                .map_err(db)?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM candles
                     WHERE chain_id = ? AND campaign_address = ? AND timeframe = ? AND bucket_start = ?",
                )
                .bind(key.chain_id as i64)
                .bind(&key.campaign_address)
                .bind(key.timeframe.secs() as i64)
                .bind(key.bucket_start)
                .execute(&mut *conn)
                .await
                .map_err(db)?;
            }
        }
        Ok(())
    }
}

// ─── Row decoding ────────────────────────────────────────────────────────────

fn parse_amount(row: &SqliteRow, column: &str) -> Result<u128, IndexerError> {
    let raw: String = row.get(column);
    raw.parse()
        .map_err(|_| IndexerError::Storage(format!("corrupt {column} '{raw}'")))
}

/// An INTEGER column that must fit the unsigned target type.
fn unsigned<T: TryFrom<i64>>(row: &SqliteRow, column: &str) -> Result<T, IndexerError> {
    let raw: i64 = row.get(column);
    T::try_from(raw).map_err(|_| IndexerError::Storage(format!("corrupt {column} {raw}")))
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeEvent, IndexerError> {
    let side: String = row.get("side");
    let status: String = row.get("status");
    Ok(TradeEvent {
        chain_id: unsigned(row, "chain_id")?,
        campaign_address: row.get("campaign_address"),
        tx_hash: row.get("tx_hash"),
        log_index: unsigned(row, "log_index")?,
        block_number: unsigned(row, "block_number")?,
        block_time: row.get("block_time"),
        side: side.parse().map_err(IndexerError::Storage)?,
        wallet: row.get("wallet"),
        token_amount: parse_amount(row, "token_amount")?,
        native_amount: parse_amount(row, "native_amount")?,
        price_native: row.get("price_native"),
        status: status.parse().map_err(IndexerError::Storage)?,
    })
}

fn vote_from_row(row: &SqliteRow) -> Result<VoteEvent, IndexerError> {
    let status: String = row.get("status");
    let meta: String = row.get("meta_json");
    Ok(VoteEvent {
        chain_id: unsigned(row, "chain_id")?,
        campaign_address: row.get("campaign_address"),
        voter_address: row.get("voter_address"),
        asset_address: row.get("asset_address"),
        amount_raw: parse_amount(row, "amount_raw")?,
        tx_hash: row.get("tx_hash"),
        log_index: unsigned(row, "log_index")?,
        block_number: unsigned(row, "block_number")?,
        block_time: row.get("block_time"),
        meta: serde_json::from_str(&meta)
            .map_err(|e| IndexerError::Storage(format!("corrupt meta_json: {e}")))?,
        status: status.parse().map_err(IndexerError::Storage)?,
    })
}

fn candle_from_row(row: &SqliteRow) -> Result<Candle, IndexerError> {
    let secs: u64 = unsigned(row, "timeframe")?;
    Ok(Candle {
        chain_id: unsigned(row, "chain_id")?,
        campaign_address: row.get("campaign_address"),
        timeframe: Timeframe::from_secs(secs).map_err(IndexerError::Storage)?,
        bucket_start: row.get("bucket_start"),
        open: row.get("open"),
        high: row.get("high"),
        low: row.get("low"),
        close: row.get("close"),
        volume_native: parse_amount(row, "volume_native")?,
        trade_count: unsigned(row, "trade_count")?,
    })
}

fn cursor_from_row(row: &SqliteRow) -> Result<ChainCursor, IndexerError> {
    let kind: String = row.get("kind");
    Ok(ChainCursor {
        chain_id: unsigned(row, "chain_id")?,
        kind: kind.parse().map_err(IndexerError::Storage)?,
        last_scanned_block: unsigned(row, "last_scanned_block")?,
        updated_at: row.get("updated_at"),
    })
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStore {
    async fn load_cursor(
        &self,
        chain_id: ChainId,
        kind: ContractKind,
    ) -> Result<Option<ChainCursor>, IndexerError> {
        let row = sqlx::query("SELECT * FROM cursors WHERE chain_id = ? AND kind = ?")
            .bind(chain_id as i64)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(cursor_from_row).transpose()
    }

    async fn cursors(&self) -> Result<Vec<ChainCursor>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM cursors ORDER BY chain_id, kind")
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        let mut cursors = rows.iter().map(cursor_from_row).collect::<Result<Vec<_>, _>>()?;
        cursors.sort_by_key(|c| (c.chain_id, c.kind));
        Ok(cursors)
    }

    async fn commit_batch(
        &self,
        batch: &ScanBatch,
        timeframes: &[Timeframe],
    ) -> Result<CommitOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let prior = Self::prior_rows(&mut *tx, batch).await?;
        let plan = plan_commit(batch, &prior, timeframes);

        for c in &plan.campaigns {
            Self::upsert_campaign(&mut *tx, c).await?;
        }
        for t in &plan.trades {
            Self::upsert_trade(&mut *tx, t).await?;
        }
        for v in &plan.votes {
            Self::upsert_vote(&mut *tx, v).await?;
        }
        for key in &plan.orphan_trades {
            Self::mark_orphaned(&mut *tx, "trades", key).await?;
        }
        for key in &plan.orphan_votes {
            Self::mark_orphaned(&mut *tx, "votes", key).await?;
        }
        for key in &plan.buckets {
            Self::rebuild_candle(&mut *tx, key).await?;
        }

        let cursor = batch.cursor();
        sqlx::query(
            "INSERT OR REPLACE INTO cursors (chain_id, kind, last_scanned_block, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(cursor.chain_id as i64)
        .bind(cursor.kind.as_str())
        .bind(cursor.last_scanned_block as i64)
        .bind(cursor.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;

        debug!(
            chain_id = batch.chain_id,
            kind = %batch.kind,
            to = batch.to_block,
            inserted = plan.outcome.inserted,
            updated = plan.outcome.updated,
            orphaned = plan.outcome.orphaned,
            "sqlite commit"
        );
        Ok(plan.outcome)
    }

    async fn campaign_addresses(&self, chain_id: ChainId) -> Result<Vec<String>, IndexerError> {
        let rows = sqlx::query(
            "SELECT campaign_address FROM campaigns WHERE chain_id = ? ORDER BY campaign_address",
        )
        .bind(chain_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows.iter().map(|r| r.get("campaign_address")).collect())
    }

    async fn campaign_summary(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
    ) -> Result<Option<CampaignSummary>, IndexerError> {
        let registration = sqlx::query(
            "SELECT * FROM campaigns WHERE chain_id = ? AND campaign_address = ?",
        )
        .bind(chain_id as i64)
        .bind(campaign_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .map(|r| -> Result<CampaignCreated, IndexerError> {
            Ok(CampaignCreated {
                chain_id,
                campaign_address: r.get("campaign_address"),
                creator: r.get("creator"),
                token_address: r.get("token_address"),
                factory_address: r.get("factory_address"),
                tx_hash: r.get("tx_hash"),
                log_index: unsigned(&r, "log_index")?,
                block_number: unsigned(&r, "block_number")?,
                block_time: r.get("block_time"),
            })
        })
        .transpose()?;

        let trades = sqlx::query("SELECT * FROM trades WHERE chain_id = ? AND campaign_address = ?")
            .bind(chain_id as i64)
            .bind(campaign_address)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?
            .iter()
            .map(trade_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let votes = sqlx::query("SELECT * FROM votes WHERE chain_id = ? AND campaign_address = ?")
            .bind(chain_id as i64)
            .bind(campaign_address)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?
            .iter()
            .map(vote_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        if registration.is_none() && trades.is_empty() && votes.is_empty() {
            return Ok(None);
        }
        Ok(Some(summarize(
            chain_id,
            campaign_address,
            registration.as_ref(),
            &trades,
            &votes,
        )))
    }

    async fn recent_trades(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<TradeEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM trades
             WHERE chain_id = ? AND campaign_address = ? AND status = ?
             ORDER BY block_number DESC, log_index DESC
             LIMIT ?",
        )
        .bind(chain_id as i64)
        .bind(campaign_address)
        .bind(EventStatus::Confirmed.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn recent_votes(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        limit: usize,
    ) -> Result<Vec<VoteEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM votes
             WHERE chain_id = ? AND campaign_address = ? AND status = ?
             ORDER BY block_number DESC, log_index DESC
             LIMIT ?",
        )
        .bind(chain_id as i64)
        .bind(campaign_address)
        .bind(EventStatus::Confirmed.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(vote_from_row).collect()
    }

    async fn recent_candles(
        &self,
        chain_id: ChainId,
        campaign_address: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM candles
             WHERE chain_id = ? AND campaign_address = ? AND timeframe = ?
             ORDER BY bucket_start DESC
             LIMIT ?",
        )
        .bind(chain_id as i64)
        .bind(campaign_address)
        .bind(timeframe.secs() as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        let mut candles = rows.iter().map(candle_from_row).collect::<Result<Vec<_>, _>>()?;
        candles.reverse();
        Ok(candles)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
