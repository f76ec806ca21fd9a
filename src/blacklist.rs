//! Persistent set of banned token mints and banned creator addresses. Loaded
//! into memory at startup for O(1) lookups on the pipeline's hot path; writes
//! go through the `blacklist` table and update the in-memory set atomically.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::info;

use crate::constants::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Mint,
    Creator,
}

impl AddressKind {
    fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Mint => "mint",
            AddressKind::Creator => "creator",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub address: String,
    pub kind: String,
    pub reason: Option<String>,
    pub added_ts: i64,
}

pub struct Blacklist {
    conn: Arc<Mutex<Connection>>,
    addresses: RwLock<HashSet<String>>,
}

impl Blacklist {
    pub async fn load(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        let addresses = {
            let guard = conn.lock().await;
            let mut stmt = guard.prepare("SELECT address FROM blacklist").context("failed to prepare blacklist load")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<HashSet<_>>>().context("failed to load blacklist")?
        };

        info!("blacklist loaded with {} entries", addresses.len());
        Ok(Self { conn, addresses: RwLock::new(addresses) })
    }

    /// Checked against both the token mint and the creator address — the
    /// pipeline performs two independent lookups against the same set.
    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.addresses.read().contains(address)
    }

    pub async fn add(&self, address: &str, kind: AddressKind, reason: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO blacklist (address, type, reason, added_ts) VALUES (?1, ?2, ?3, ?4)",
            params![address, kind.as_str(), reason, now_ms() as i64],
        )
        .context("failed to persist blacklist entry")?;
        drop(conn);

        self.addresses.write().insert(address.to_string());
        Ok(())
    }

    pub async fn remove(&self, address: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM blacklist WHERE address = ?1", params![address])
            .context("failed to remove blacklist entry")?;
        drop(conn);

        self.addresses.write().remove(address);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<BlacklistEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT address, type, reason, added_ts FROM blacklist ORDER BY added_ts DESC")
            .context("failed to prepare blacklist list")?;
        let rows = stmt.query_map([], |row| {
            Ok(BlacklistEntry {
                address: row.get(0)?,
                kind: row.get(1)?,
                reason: row.get(2)?,
                added_ts: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to list blacklist")
    }

    pub fn len(&self) -> usize {
        self.addresses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn add_and_check_blacklist() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();
        let blacklist = Blacklist::load(store.connection()).await.unwrap();

        assert!(!blacklist.is_blacklisted("BadMint"));
        blacklist.add("BadMint", AddressKind::Mint, Some("rug")).await.unwrap();
        assert!(blacklist.is_blacklisted("BadMint"));
    }

    #[tokio::test]
    async fn remove_clears_in_memory_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();
        let blacklist = Blacklist::load(store.connection()).await.unwrap();

        blacklist.add("BadCreator", AddressKind::Creator, None).await.unwrap();
        blacklist.remove("BadCreator").await.unwrap();
        assert!(!blacklist.is_blacklisted("BadCreator"));
    }

    #[tokio::test]
    async fn load_populates_from_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();
        let first = Blacklist::load(store.connection()).await.unwrap();
        first.add("BadMint", AddressKind::Mint, None).await.unwrap();

        let second = Blacklist::load(store.connection()).await.unwrap();
        assert!(second.is_blacklisted("BadMint"));
    }
}
