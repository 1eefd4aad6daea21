//! Price resolution service: batch orchestration with a bounded worker pool,
//! per-platform progress tracking, the cached native-price slot, and the
//! single-item lookups. All state is owned by `PriceService` so tests can
//! build independent instances; production wires one per process.

use crate::cache::PriceCache;
use crate::coingecko::{self, CoinGeckoClient, UpstreamReply};
use crate::config::Config;
use crate::models::{BatchProgress, PriceEntry, PriceMap, TokenDetail};
use log::{info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

/// Primary simple-price lookup: attempts and backoff base per identifier.
const SIMPLE_PRICE_ATTEMPTS: u64 = 3;
const SIMPLE_PRICE_BACKOFF_MS: u64 = 500;
/// Fallback contract-detail lookup.
const DETAIL_ATTEMPTS: u64 = 2;
const DETAIL_BACKOFF_MS: u64 = 700;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("upstream error {status}")]
    Upstream {
        status: u16,
        content_type: Option<String>,
        body: String,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    fn passthrough(reply: UpstreamReply) -> Self {
        Self::Upstream {
            status: reply.status,
            content_type: reply.content_type,
            body: reply.body,
        }
    }
}

/// Native-price slot: one cached value plus a fetch lock so concurrent cold
/// callers produce a single upstream call.
struct NativeSlot {
    cached: RwLock<Option<(PriceEntry, Instant)>>,
    fetch_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct PriceService {
    client: Arc<CoinGeckoClient>,
    cache: PriceCache,
    native: Arc<NativeSlot>,
    native_ttl: Duration,
    native_coin_id: String,
    /// `platform:address` -> logo URL; logos never change, so no TTL.
    logos: Arc<RwLock<HashMap<String, String>>>,
    progress: Arc<RwLock<HashMap<String, BatchProgress>>>,
    batch_concurrency: usize,
}

impl PriceService {
    pub fn new(config: &Config, api_key: Option<String>) -> Self {
        Self {
            client: Arc::new(CoinGeckoClient::new(&config.coingecko, api_key)),
            cache: PriceCache::new(Duration::from_millis(config.prices.cache_ttl_ms)),
            native: Arc::new(NativeSlot {
                cached: RwLock::new(None),
                fetch_lock: Mutex::new(()),
            }),
            native_ttl: Duration::from_millis(config.prices.native_cache_ttl_ms),
            native_coin_id: config.coingecko.native_coin_id.clone(),
            logos: Arc::new(RwLock::new(HashMap::new())),
            progress: Arc::new(RwLock::new(HashMap::new())),
            batch_concurrency: config.prices.batch_concurrency.max(1),
        }
    }

    /// Resolve prices for a set of contract addresses on one platform with a
    /// bounded worker pool. Confirmed misses are cached but omitted from the
    /// merged map.
    pub async fn batch_prices(
        &self,
        platform: &str,
        addresses: &[String],
    ) -> Result<PriceMap, ServiceError> {
        if platform.is_empty() || addresses.is_empty() {
            return Err(ServiceError::BadRequest(
                "Missing platform or contract_addresses".to_string(),
            ));
        }

        let list = Arc::new(normalize_addresses(addresses));
        self.progress.write().await.insert(
            platform.to_string(),
            BatchProgress::started(platform, list.len()),
        );
        info!("batch {}: resolving {} tokens", platform, list.len());

        let cursor = Arc::new(AtomicUsize::new(0));
        let out: Arc<Mutex<PriceMap>> = Arc::new(Mutex::new(HashMap::new()));

        let workers = self.batch_concurrency.min(list.len());
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let service = self.clone();
            let platform = platform.to_string();
            let list = Arc::clone(&list);
            let cursor = Arc::clone(&cursor);
            let out = Arc::clone(&out);
            handles.push(tokio::spawn(async move {
                loop {
                    let i = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(address) = list.get(i) else { break };
                    let resolved = service.resolve_price(&platform, address).await;
                    // Workers update whatever record currently sits under the
                    // platform key; a replacing batch inherits increments from
                    // the one it displaced (latest-wins).
                    {
                        let mut progress = service.progress.write().await;
                        if let Some(p) = progress.get_mut(&platform) {
                            p.processed += 1;
                            if resolved.is_some() {
                                p.success += 1;
                            }
                        }
                    }
                    if let Some(entry) = resolved {
                        out.lock().await.insert(address.clone(), entry);
                    }
                }
            }));
        }
        futures_util::future::try_join_all(handles)
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        if let Some(p) = self.progress.write().await.get_mut(platform) {
            p.running = false;
        }

        let merged = out.lock().await.clone();
        info!(
            "batch {}: done, {}/{} resolved",
            platform,
            merged.len(),
            list.len()
        );
        Ok(merged)
    }

    /// Current progress for a platform; an all-zero, not-running shape when no
    /// batch has been recorded.
    pub async fn progress_for(&self, platform: &str) -> BatchProgress {
        self.progress
            .read()
            .await
            .get(platform)
            .cloned()
            .unwrap_or_else(|| BatchProgress::idle(platform))
    }

    /// Full per-identifier flow: fresh cache record, else primary lookup, else
    /// contract-detail fallback. Every failure exit caches a confirmed miss so
    /// the identifier is not re-fetched within the TTL.
    async fn resolve_price(&self, platform: &str, address: &str) -> Option<PriceEntry> {
        let key = PriceCache::key(platform, address);
        if let Some(record) = self.cache.get(&key).await {
            return record;
        }

        if let Some(entry) = self.simple_price_lookup(platform, address).await {
            self.cache.set(key, Some(entry.clone())).await;
            return Some(entry);
        }

        let resolved = self.detail_lookup(platform, address).await;
        self.cache.set(key, resolved.clone()).await;
        resolved
    }

    /// Primary path: `/simple/token_price`, up to three attempts. A 2xx with
    /// no entry for the address, a terminal status, or a network error ends
    /// the path and defers to the fallback.
    async fn simple_price_lookup(&self, platform: &str, address: &str) -> Option<PriceEntry> {
        for attempt in 1..=SIMPLE_PRICE_ATTEMPTS {
            let reply = match self.client.simple_token_price(platform, address).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("batch {}: simple price for {} failed: {}", platform, address, e);
                    return None;
                }
            };
            if reply.is_transient() {
                if attempt < SIMPLE_PRICE_ATTEMPTS {
                    backoff(&reply, SIMPLE_PRICE_BACKOFF_MS, attempt).await;
                }
                continue;
            }
            if !reply.is_success() {
                return None;
            }
            return reply
                .json()
                .as_ref()
                .and_then(|json| coingecko::parse_simple_entry(json, address));
        }
        None
    }

    /// Fallback path: `/coins/{platform}/contract/{address}`, up to two
    /// attempts.
    async fn detail_lookup(&self, platform: &str, address: &str) -> Option<PriceEntry> {
        for attempt in 1..=DETAIL_ATTEMPTS {
            let reply = match self.client.coin_contract_detail(platform, address).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("batch {}: detail fetch for {} failed: {}", platform, address, e);
                    return None;
                }
            };
            if reply.is_transient() {
                if attempt < DETAIL_ATTEMPTS {
                    backoff(&reply, DETAIL_BACKOFF_MS, attempt).await;
                }
                continue;
            }
            if !reply.is_success() {
                return None;
            }
            return reply.json().as_ref().and_then(coingecko::parse_detail_entry);
        }
        None
    }

    /// Native asset price with a cached slot, in-flight deduplication, and
    /// stale-serve on upstream failure. Only a never-cached total failure
    /// surfaces an error.
    pub async fn native_price(&self) -> Result<PriceEntry, ServiceError> {
        if let Some(entry) = self.fresh_native().await {
            return Ok(entry);
        }

        let _fetching = self.native.fetch_lock.lock().await;
        if let Some(entry) = self.fresh_native().await {
            // Another caller refreshed the slot while we waited.
            return Ok(entry);
        }

        match self.client.simple_price(&self.native_coin_id).await {
            Ok(reply) if reply.is_success() => {
                let entry = reply
                    .json()
                    .as_ref()
                    .and_then(|json| coingecko::parse_simple_entry(json, &self.native_coin_id))
                    .unwrap_or_else(PriceEntry::zero);
                *self.native.cached.write().await = Some((entry.clone(), Instant::now()));
                Ok(entry)
            }
            Ok(reply) => {
                if let Some((entry, _)) = self.native.cached.read().await.clone() {
                    warn!("native price: upstream {}, serving stale value", reply.status);
                    return Ok(entry);
                }
                Err(ServiceError::passthrough(reply))
            }
            Err(e) => {
                if let Some((entry, _)) = self.native.cached.read().await.clone() {
                    warn!("native price: fetch failed ({}), serving stale value", e);
                    return Ok(entry);
                }
                Err(ServiceError::Internal(e))
            }
        }
    }

    async fn fresh_native(&self) -> Option<PriceEntry> {
        let cached = self.native.cached.read().await;
        match &*cached {
            Some((entry, at)) if Instant::now() - *at < self.native_ttl => Some(entry.clone()),
            _ => None,
        }
    }

    /// One-shot detail lookup, no cache, no retry; upstream failures pass
    /// through verbatim.
    pub async fn token_detail(
        &self,
        platform: &str,
        address: &str,
    ) -> Result<TokenDetail, ServiceError> {
        if platform.is_empty() || address.is_empty() {
            return Err(ServiceError::BadRequest(
                "Missing platform or address".to_string(),
            ));
        }
        let reply = self
            .client
            .coin_contract_detail(platform, &address.trim().to_lowercase())
            .await?;
        if !reply.is_success() {
            return Err(ServiceError::passthrough(reply));
        }
        let json = reply
            .json()
            .ok_or_else(|| anyhow::anyhow!("Invalid JSON from contract detail endpoint"))?;
        Ok(coingecko::parse_token_detail(&json))
    }

    /// Best-effort logo lookups; individual failures are skipped and the
    /// partial map returned. Resolved logos are kept for the process lifetime.
    pub async fn token_logos(
        &self,
        platform: &str,
        contracts: &str,
    ) -> Result<HashMap<String, String>, ServiceError> {
        if platform.is_empty() || contracts.is_empty() {
            return Err(ServiceError::BadRequest(
                "Missing platform or contracts".to_string(),
            ));
        }
        let list = normalize_addresses(
            &contracts.split(',').map(str::to_string).collect::<Vec<_>>(),
        );

        let mut out = HashMap::new();
        for address in list {
            let key = PriceCache::key(platform, &address);
            if let Some(url) = self.logos.read().await.get(&key).cloned() {
                out.insert(address, url);
                continue;
            }
            let reply = match self.client.coin_contract(platform, &address).await {
                Ok(reply) if reply.is_success() => reply,
                Ok(_) | Err(_) => continue,
            };
            if let Some(url) = reply.json().as_ref().and_then(coingecko::parse_detail_logo) {
                self.logos.write().await.insert(key, url.clone());
                out.insert(address, url);
            }
        }
        Ok(out)
    }

    /// Alias endpoint: one batched simple-price call, response keys lowercased,
    /// otherwise passed through as the provider sent it.
    pub async fn token_price(
        &self,
        platform: &str,
        contracts: &str,
    ) -> Result<Value, ServiceError> {
        if platform.is_empty() || contracts.is_empty() {
            return Err(ServiceError::BadRequest(
                "Missing platform or contracts".to_string(),
            ));
        }
        let list = normalize_addresses(
            &contracts.split(',').map(str::to_string).collect::<Vec<_>>(),
        );
        let reply = self
            .client
            .simple_token_price(platform, &list.join(","))
            .await?;
        if !reply.is_success() {
            return Err(ServiceError::passthrough(reply));
        }
        let json = reply
            .json()
            .ok_or_else(|| anyhow::anyhow!("Invalid JSON from simple price endpoint"))?;

        let mut norm = serde_json::Map::new();
        if let Some(object) = json.as_object() {
            for (key, value) in object {
                norm.insert(key.to_lowercase(), value.clone());
            }
        }
        Ok(Value::Object(norm))
    }
}

/// Trim, lowercase, drop empties, and dedupe preserving first-seen order.
pub fn normalize_addresses(addresses: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses
        .iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

async fn backoff(reply: &UpstreamReply, base_ms: u64, attempt: u64) {
    let wait = reply
        .retry_after
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_millis(base_ms * attempt));
    sleep(wait).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        let input = vec!["0xABC ".to_string(), "0xabc".to_string()];
        assert_eq!(normalize_addresses(&input), vec!["0xabc".to_string()]);
    }

    #[test]
    fn normalize_preserves_first_seen_order() {
        let input = vec![
            " 0xB ".to_string(),
            "0xA".to_string(),
            "".to_string(),
            "0xb".to_string(),
        ];
        assert_eq!(
            normalize_addresses(&input),
            vec!["0xb".to_string(), "0xa".to_string()]
        );
    }

    #[tokio::test]
    async fn progress_defaults_to_idle_shape() {
        let service = PriceService::new(&Config::default(), None);
        let progress = service.progress_for("ethereum").await;
        assert_eq!(progress.total, 0);
        assert_eq!(progress.processed, 0);
        assert_eq!(progress.success, 0);
        assert_eq!(progress.start_at, 0);
        assert!(!progress.running);
    }
}
