//! Persistent relational store for positions, trades, seen pools, the
//! blacklist table, and the pool-detection log. Single-writer, serialized by
//! `Arc<Mutex<Connection>>` the way `database_tracker.rs` serialized MEV
//! opportunity writes.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::constants::now_ms;

const PENDING_TRADE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub id: i64,
    pub token_mint: String,
    pub bonding_curve_address: String,
    pub pool_id: Option<String>,
    pub entry_price: f64,
    pub intended_sol: f64,
    pub amount_sol: f64,
    pub amount_token: i64,
    pub entry_ts: i64,
    pub status: String,
    pub closed_ts: Option<i64>,
    pub closed_reason: Option<String>,
    pub realized_sol: Option<f64>,
    pub take_profit_sol: Option<f64>,
    pub stop_loss_sol: Option<f64>,
    pub last_price_sol: Option<f64>,
    pub last_check_ts: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolDetection {
    pub id: i64,
    pub pool_id: String,
    pub token_mint: String,
    pub detected_at: i64,
    pub action: String,
    pub filter_results: String,
    pub risk_check_passed: bool,
    pub risk_check_reason: Option<String>,
    pub pool_quote_reserve: Option<f64>,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct Trade {
    pub id: i64,
    pub position_id: Option<i64>,
    pub side: String,
    pub token_mint: String,
    pub amount_sol: f64,
    pub amount_token: i64,
    pub price: f64,
    pub status: String,
    pub tx_signature: Option<String>,
}

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(data_dir: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir).context("failed to create data directory")?;
        let db_path = Path::new(data_dir).join("bot.db");

        let conn = Connection::open(&db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL").context("failed to enable WAL mode")?;
        conn.pragma_update(None, "foreign_keys", "ON").context("failed to enable foreign keys")?;

        let schema = include_str!("../schema.sql");
        conn.execute_batch(schema).context("failed to apply baseline schema")?;

        let store = Self { conn: Arc::new(Mutex::new(conn)) };
        store.migrate().await?;
        store.recover_stale_trades().await?;
        info!("persistent store opened at {}", db_path.display());
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let version: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
            .context("failed to read schema_version")?;

        if version < 2 {
            for stmt in [
                "ALTER TABLE positions ADD COLUMN take_profit_sol REAL",
                "ALTER TABLE positions ADD COLUMN stop_loss_sol REAL",
                "ALTER TABLE positions ADD COLUMN last_price_sol REAL",
                "ALTER TABLE positions ADD COLUMN last_check_ts INTEGER",
            ] {
                if let Err(e) = conn.execute(stmt, []) {
                    if !e.to_string().contains("duplicate column name") {
                        return Err(e).context("failed to apply version-2 migration");
                    }
                }
            }
            conn.execute("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (2, ?1)", params![now_ms() as i64])?;
            info!("persistent store migrated to schema version 2");
        }
        Ok(())
    }

    /// Marks pending trades older than 60s as failed, the startup recovery
    /// hook described for a store that survived a crash or restart.
    async fn recover_stale_trades(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let cutoff = now_ms() as i64 - PENDING_TRADE_TIMEOUT_MS as i64;
        let affected = conn.execute(
            "UPDATE trades SET status = 'failed', error_message = 'timed out on startup recovery'
             WHERE status = 'pending' AND intent_ts < ?1",
            params![cutoff],
        )?;
        if affected > 0 {
            warn!("startup recovery force-failed {affected} stale pending trade(s)");
        }
        Ok(())
    }

    pub async fn insert_position(
        &self,
        token_mint: &str,
        bonding_curve_address: &str,
        pool_id: Option<&str>,
        entry_price: f64,
        intended_sol: f64,
        amount_sol: f64,
        amount_token: i64,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO positions (token_mint, bonding_curve_address, pool_id, entry_price, intended_sol, amount_sol, amount_token, entry_ts, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open')",
            params![token_mint, bonding_curve_address, pool_id, entry_price, intended_sol, amount_sol, amount_token, now_ms() as i64],
        )
        .context("failed to insert position")?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_open_position(&self, token_mint: &str) -> Result<Option<Position>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, token_mint, bonding_curve_address, pool_id, entry_price, intended_sol, amount_sol,
                    amount_token, entry_ts, status, closed_ts, closed_reason, realized_sol,
                    take_profit_sol, stop_loss_sol, last_price_sol, last_check_ts
             FROM positions WHERE token_mint = ?1 AND status = 'open'",
            params![token_mint],
            row_to_position,
        )
        .optional()
        .context("failed to query open position")
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, token_mint, bonding_curve_address, pool_id, entry_price, intended_sol, amount_sol,
                    amount_token, entry_ts, status, closed_ts, closed_reason, realized_sol,
                    take_profit_sol, stop_loss_sol, last_price_sol, last_check_ts
             FROM positions WHERE status = 'open'",
        )?;
        let rows = stmt.query_map([], row_to_position)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to list open positions")
    }

    pub async fn update_position_check(&self, id: i64, last_price_sol: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET last_price_sol = ?2, last_check_ts = ?3 WHERE id = ?1",
            params![id, last_price_sol, now_ms() as i64],
        )
        .context("failed to update position check")?;
        Ok(())
    }

    pub async fn close_position(&self, id: i64, reason: &str, realized_sol: Option<f64>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET status = 'closed', closed_ts = ?2, closed_reason = ?3, realized_sol = ?4 WHERE id = ?1",
            params![id, now_ms() as i64, reason, realized_sol],
        )
        .context("failed to close position")?;
        Ok(())
    }

    pub async fn has_pending_trade(&self, token_mint: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        Self::pending_trade_count(&conn, token_mint).map(|count| count > 0)
    }

    fn pending_trade_count(conn: &Connection, token_mint: &str) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE token_mint = ?1 AND status = 'pending'",
            params![token_mint],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// Rejected if a pending trade already exists for this mint, enforcing
    /// the at-most-one-pending-trade-per-mint idempotency rule. The check and
    /// the insert run under the same connection-mutex hold so two concurrent
    /// callers for the same mint can't both observe "no pending trade".
    pub async fn insert_trade_intent(
        &self,
        position_id: Option<i64>,
        side: TradeSide,
        token_mint: &str,
        amount_sol: f64,
        amount_token: i64,
        price: f64,
        pool_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        if Self::pending_trade_count(&conn, token_mint)? > 0 {
            return Err(anyhow::anyhow!("pending trade already exists for {token_mint}"));
        }

        let now = now_ms() as i64;
        conn.execute(
            "INSERT INTO trades (position_id, side, token_mint, amount_sol, amount_token, price, ts, pool_id, status, intent_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?7)",
            params![position_id, side.as_str(), token_mint, amount_sol, amount_token, price, now, pool_id],
        )
        .context("failed to insert trade intent")?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn confirm_trade(&self, trade_id: i64, tx_signature: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE trades SET status = 'confirmed', tx_signature = ?2, confirmed_ts = ?3 WHERE id = ?1",
            params![trade_id, tx_signature, now_ms() as i64],
        )
        .context("failed to confirm trade")?;
        Ok(())
    }

    pub async fn fail_trade(&self, trade_id: i64, error_message: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE trades SET status = 'failed', error_message = ?2 WHERE id = ?1",
            params![trade_id, error_message],
        )
        .context("failed to mark trade failed")?;
        Ok(())
    }

    pub async fn record_seen_pool(&self, pool_id: &str, token_mint: &str, action_taken: &str, filter_reason: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO seen_pools (pool_id, token_mint, first_seen, action_taken, filter_reason)
             VALUES (?1, ?2, COALESCE((SELECT first_seen FROM seen_pools WHERE pool_id = ?1), ?3), ?4, ?5)",
            params![pool_id, token_mint, now_ms() as i64, action_taken, filter_reason],
        )
        .context("failed to record seen pool")?;
        Ok(())
    }

    pub async fn has_seen_pool(&self, pool_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM seen_pools WHERE pool_id = ?1", params![pool_id], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub async fn record_detection(
        &self,
        pool_id: &str,
        token_mint: &str,
        action: &str,
        filter_results_json: &str,
        risk_check_passed: bool,
        risk_check_reason: Option<&str>,
        pool_quote_reserve: Option<f64>,
        summary: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pool_detections (pool_id, token_mint, detected_at, action, filter_results, risk_check_passed, risk_check_reason, pool_quote_reserve, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![pool_id, token_mint, now_ms() as i64, action, filter_results_json, risk_check_passed, risk_check_reason, pool_quote_reserve, summary],
        )
        .context("failed to record detection")?;
        Ok(conn.last_insert_rowid())
    }

    /// Closed positions with `closed_ts >= since_ms`, newest first. Backs
    /// realized-pnl accounting for the snapshot aggregator.
    pub async fn closed_positions_since(&self, since_ms: i64) -> Result<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, token_mint, bonding_curve_address, pool_id, entry_price, intended_sol, amount_sol,
                    amount_token, entry_ts, status, closed_ts, closed_reason, realized_sol,
                    take_profit_sol, stop_loss_sol, last_price_sol, last_check_ts
             FROM positions WHERE status = 'closed' AND closed_ts >= ?1 ORDER BY closed_ts DESC",
        )?;
        let rows = stmt.query_map(params![since_ms], row_to_position)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to list closed positions")
    }

    /// Paginated, optionally action-filtered, optionally time-bounded read
    /// over `pool_detections`, newest first.
    pub async fn list_detections(&self, action: Option<&str>, since_ms: i64, limit: u32, offset: u32) -> Result<Vec<PoolDetection>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, pool_id, token_mint, detected_at, action, filter_results, risk_check_passed, risk_check_reason, pool_quote_reserve, summary
             FROM pool_detections
             WHERE detected_at >= ?1 AND (?2 IS NULL OR action = ?2)
             ORDER BY detected_at DESC
             LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(params![since_ms, action, limit, offset], row_to_detection)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to list pool detections")
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

fn row_to_position(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    Ok(Position {
        id: row.get(0)?,
        token_mint: row.get(1)?,
        bonding_curve_address: row.get(2)?,
        pool_id: row.get(3)?,
        entry_price: row.get(4)?,
        intended_sol: row.get(5)?,
        amount_sol: row.get(6)?,
        amount_token: row.get(7)?,
        entry_ts: row.get(8)?,
        status: row.get(9)?,
        closed_ts: row.get(10)?,
        closed_reason: row.get(11)?,
        realized_sol: row.get(12)?,
        take_profit_sol: row.get(13)?,
        stop_loss_sol: row.get(14)?,
        last_price_sol: row.get(15)?,
        last_check_ts: row.get(16)?,
    })
}

fn row_to_detection(row: &rusqlite::Row) -> rusqlite::Result<PoolDetection> {
    Ok(PoolDetection {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        token_mint: row.get(2)?,
        detected_at: row.get(3)?,
        action: row.get(4)?,
        filter_results: row.get(5)?,
        risk_check_passed: row.get(6)?,
        risk_check_reason: row.get(7)?,
        pool_quote_reserve: row.get(8)?,
        summary: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_close_position_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

        let id = store.insert_position("MintA", "CurveA", Some("pool1"), 0.001, 0.001, 0.00105, 34_000_000).await.unwrap();
        let position = store.get_open_position("MintA").await.unwrap().unwrap();
        assert_eq!(position.id, id);
        assert_eq!(position.status, "open");

        store.close_position(id, "take_profit", Some(0.0015)).await.unwrap();
        assert!(store.get_open_position("MintA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_trade_blocks_second_intent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

        store.insert_trade_intent(None, TradeSide::Buy, "MintA", 0.001, 0, 0.0, None).await.unwrap();
        let second = store.insert_trade_intent(None, TradeSide::Buy, "MintA", 0.001, 0, 0.0, None).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn confirming_trade_clears_pending_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

        let trade_id = store.insert_trade_intent(None, TradeSide::Buy, "MintA", 0.001, 0, 0.0, None).await.unwrap();
        store.confirm_trade(trade_id, "sig123").await.unwrap();
        assert!(!store.has_pending_trade("MintA").await.unwrap());
    }

    #[tokio::test]
    async fn seen_pool_dedup_preserves_first_seen() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

        assert!(!store.has_seen_pool("pool1").await.unwrap());
        store.record_seen_pool("pool1", "MintA", "bought", None).await.unwrap();
        assert!(store.has_seen_pool("pool1").await.unwrap());
    }
}
