//! TTL-bounded mapping from mint to detection record. First-write-wins: a
//! mint already present is never overwritten by a later, possibly-stale
//! detection from a fallback source.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::constants::now_ms;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    PrimaryFeed,
    Fallback,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    source: DetectionSource,
    detected_at_ms: u64,
    signature: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MintCacheStats {
    pub inserts_primary_feed: u64,
    pub inserts_fallback: u64,
    pub hits: u64,
    pub misses: u64,
}

impl MintCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

pub struct MintCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    stats: Arc<RwLock<MintCacheStats>>,
    ttl_ms: u64,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MintCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(MintCacheStats::default())),
            ttl_ms: ttl.as_millis() as u64,
            sweeper: std::sync::Mutex::new(None),
        });
        cache.clone().spawn_sweeper();
        cache
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let sweeper = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                sweeper.cleanup();
            }
        });
        *self.sweeper.lock().unwrap() = Some(handle);
    }

    /// Inserts `mint` if absent. Does nothing if already present, regardless
    /// of source — the first detection always wins.
    pub fn add(&self, mint: &str, source: DetectionSource, signature: Option<String>) {
        let mut entries = self.entries.write();
        if entries.contains_key(mint) {
            return;
        }
        entries.insert(
            mint.to_string(),
            CacheEntry {
                source,
                detected_at_ms: now_ms(),
                signature,
            },
        );
        drop(entries);

        let mut stats = self.stats.write();
        match source {
            DetectionSource::PrimaryFeed => stats.inserts_primary_feed += 1,
            DetectionSource::Fallback => stats.inserts_fallback += 1,
        }
    }

    pub fn contains(&self, mint: &str) -> bool {
        self.get_signature(mint).is_some()
    }

    /// Returns `Some(signature)` if the entry exists and hasn't expired,
    /// `None` on a miss or expiry. Records a hit or miss either way.
    pub fn get_signature(&self, mint: &str) -> Option<Option<String>> {
        let entries = self.entries.read();
        let found = entries.get(mint).filter(|entry| !self.is_expired(entry)).map(|entry| entry.signature.clone());
        drop(entries);

        let mut stats = self.stats.write();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        now_ms().saturating_sub(entry.detected_at_ms) >= self.ttl_ms
    }

    pub fn cleanup(&self) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now_ms().saturating_sub(entry.detected_at_ms) < self.ttl_ms);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("mint cache swept {removed} expired entries");
        }
    }

    pub fn stats(&self) -> MintCacheStats {
        self.stats.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Halts the periodic sweeper. Call during graceful shutdown.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
            info!("mint cache sweeper stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_write_wins() {
        let cache = MintCache::new(Duration::from_secs(60));
        cache.add("mint1", DetectionSource::PrimaryFeed, Some("sig1".to_string()));
        cache.add("mint1", DetectionSource::Fallback, Some("sig2".to_string()));

        assert_eq!(cache.get_signature("mint1").unwrap(), Some("sig1".to_string()));
        let stats = cache.stats();
        assert_eq!(stats.inserts_primary_feed, 1);
        assert_eq!(stats.inserts_fallback, 0);
        cache.stop();
    }

    #[tokio::test]
    async fn expired_entry_returns_none() {
        let cache = MintCache::new(Duration::from_millis(1));
        cache.add("mint1", DetectionSource::PrimaryFeed, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get_signature("mint1").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        cache.stop();
    }

    #[tokio::test]
    async fn cleanup_removes_expired_entries() {
        let cache = MintCache::new(Duration::from_millis(1));
        cache.add("mint1", DetectionSource::PrimaryFeed, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.cleanup();
        assert_eq!(cache.len(), 0);
        cache.stop();
    }

    #[tokio::test]
    async fn hit_rate_tracks_hits_and_misses() {
        let cache = MintCache::new(Duration::from_secs(60));
        cache.add("mint1", DetectionSource::PrimaryFeed, None);
        cache.get_signature("mint1");
        cache.get_signature("missing");
        let stats = cache.stats();
        assert_eq!(stats.hit_rate(), 50.0);
        cache.stop();
    }
}
