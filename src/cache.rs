//! Short-TTL response cache for per-token price lookups. Expired records are
//! treated as absent rather than evicted (lazy expiry), and a `None` value
//! remembers a confirmed "no price found" so failing tokens are not re-fetched
//! within the TTL.

use crate::models::PriceEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

struct CacheRecord {
    timestamp: Instant,
    value: Option<PriceEntry>,
}

/// Keyed by `platform:address` (address lowercased by the caller).
#[derive(Clone)]
pub struct PriceCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CacheRecord>>>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn key(platform: &str, address: &str) -> String {
        format!("{}:{}", platform, address)
    }

    /// Returns the cached record while fresh: `Some(Some(entry))` for a price,
    /// `Some(None)` for a remembered miss, `None` when absent or expired.
    pub async fn get(&self, key: &str) -> Option<Option<PriceEntry>> {
        let entries = self.entries.read().await;
        let record = entries.get(key)?;
        if Instant::now() - record.timestamp < self.ttl {
            Some(record.value.clone())
        } else {
            None
        }
    }

    /// Unconditionally overwrite, stamping the current time. `None` records a
    /// confirmed miss.
    pub async fn set(&self, key: String, value: Option<PriceEntry>) {
        let record = CacheRecord {
            timestamp: Instant::now(),
            value,
        };
        self.entries.write().await.insert(key, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(usd: f64) -> PriceEntry {
        PriceEntry {
            usd,
            ..PriceEntry::zero()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn serves_until_ttl_then_expires() {
        let cache = PriceCache::new(Duration::from_millis(60_000));
        cache.set("ethereum:0xabc".into(), Some(entry(1.5))).await;

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert_eq!(
            cache.get("ethereum:0xabc").await,
            Some(Some(entry(1.5))),
            "one millisecond before the TTL the record is still valid"
        );

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("ethereum:0xabc").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn remembers_confirmed_miss() {
        let cache = PriceCache::new(Duration::from_millis(60_000));
        cache.set("base:0xdead".into(), None).await;

        assert_eq!(cache.get("base:0xdead").await, Some(None));

        tokio::time::advance(Duration::from_millis(60_001)).await;
        assert_eq!(cache.get("base:0xdead").await, None);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let cache = PriceCache::new(Duration::from_millis(60_000));
        let key = PriceCache::key("ethereum", "0xabc");
        cache.set(key.clone(), Some(entry(1.0))).await;
        cache.set(key.clone(), Some(entry(2.0))).await;
        assert_eq!(cache.get(&key).await, Some(Some(entry(2.0))));
    }
}
