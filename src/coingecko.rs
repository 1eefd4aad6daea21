//! Upstream CoinGecko v3 client. Every request goes through the shared
//! throttle, carries the optional API key header, and is bounded by the
//! configured timeout. The provider's JSON shapes are confined to the parse
//! helpers at the bottom so the rest of the crate never touches them.

use crate::config::CoinGeckoConfig;
use crate::models::{PriceEntry, TokenDetail};
use crate::throttle::RequestThrottle;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Statuses the caller is expected to retry with backoff.
const TRANSIENT_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Extra fields requested from the simple-price endpoints.
const SIMPLE_PRICE_PARAMS: [(&str, &str); 5] = [
    ("vs_currencies", "usd"),
    ("include_24hr_change", "true"),
    ("include_market_cap", "true"),
    ("include_24hr_vol", "true"),
    ("include_last_updated_at", "true"),
];

/// Trim the contract-detail endpoint down to market data only.
const DETAIL_PARAMS: [(&str, &str); 6] = [
    ("localization", "false"),
    ("tickers", "false"),
    ("market_data", "true"),
    ("community_data", "false"),
    ("developer_data", "false"),
    ("sparkline", "false"),
];

/// One upstream response, read fully. Status travels as a plain `u16` because
/// reqwest and axum link different `http` major versions.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub content_type: Option<String>,
    pub body: String,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_transient(&self) -> bool {
        TRANSIENT_STATUSES.contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

pub struct CoinGeckoClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    throttle: RequestThrottle,
}

impl CoinGeckoClient {
    pub fn new(config: &CoinGeckoConfig, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            throttle: RequestThrottle::new(Duration::from_millis(config.min_request_gap_ms)),
        }
    }

    /// `/simple/price` for one or more coin ids (native asset path).
    pub async fn simple_price(&self, ids: &str) -> Result<UpstreamReply> {
        let url = format!("{}/simple/price", self.api_url);
        let mut params = vec![("ids", ids)];
        params.extend(SIMPLE_PRICE_PARAMS);
        self.request(&url, &params).await
    }

    /// `/simple/token_price/{platform}` for comma-separated contract addresses.
    pub async fn simple_token_price(&self, platform: &str, contracts: &str) -> Result<UpstreamReply> {
        let url = format!("{}/simple/token_price/{}", self.api_url, platform);
        let mut params = vec![("contract_addresses", contracts)];
        params.extend(SIMPLE_PRICE_PARAMS);
        self.request(&url, &params).await
    }

    /// `/coins/{platform}/contract/{address}` restricted to market data.
    pub async fn coin_contract_detail(&self, platform: &str, address: &str) -> Result<UpstreamReply> {
        let url = format!("{}/coins/{}/contract/{}", self.api_url, platform, address);
        self.request(&url, &DETAIL_PARAMS).await
    }

    /// Bare `/coins/{platform}/contract/{address}`, used by the logo path.
    pub async fn coin_contract(&self, platform: &str, address: &str) -> Result<UpstreamReply> {
        let url = format!("{}/coins/{}/contract/{}", self.api_url, platform, address);
        self.request::<(&str, &str)>(&url, &[]).await
    }

    async fn request<P: serde::Serialize>(&self, url: &str, params: &[P]) -> Result<UpstreamReply> {
        self.throttle.acquire().await;

        let mut req = self
            .client
            .get(url)
            .header("accept", "application/json")
            .query(params);
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-api-key", key);
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Upstream request to {} failed", url))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read upstream body from {}", url))?;

        Ok(UpstreamReply {
            status,
            retry_after,
            content_type,
            body,
        })
    }
}

/// Entry for `id` out of a simple-price map `{ [id]: {usd, ...} }`.
pub fn parse_simple_entry(json: &Value, id: &str) -> Option<PriceEntry> {
    let entry = json
        .get(id)
        .or_else(|| json.get(id.to_lowercase().as_str()))?;
    serde_json::from_value(entry.clone()).ok()
}

/// Price entry out of the contract-detail shape: `market_data.current_price.usd`
/// plus the 24h change when present.
pub fn parse_detail_entry(json: &Value) -> Option<PriceEntry> {
    Some(PriceEntry {
        usd: detail_price(json)?,
        usd_24h_change: detail_change(json),
        ..PriceEntry::zero()
    })
}

/// `{price?, change?, logo?}` for the token-detail endpoint.
pub fn parse_token_detail(json: &Value) -> TokenDetail {
    TokenDetail {
        price: detail_price(json),
        change: detail_change(json),
        logo: parse_detail_logo(json),
    }
}

/// Small logo URL, falling back to the thumbnail.
pub fn parse_detail_logo(json: &Value) -> Option<String> {
    let image = json.get("image")?;
    image
        .get("small")
        .and_then(Value::as_str)
        .or_else(|| image.get("thumb").and_then(Value::as_str))
        .filter(|url| !url.is_empty())
        .map(|url| url.to_string())
}

fn detail_price(json: &Value) -> Option<f64> {
    json.get("market_data")?
        .get("current_price")?
        .get("usd")?
        .as_f64()
}

fn detail_change(json: &Value) -> Option<f64> {
    let market_data = json.get("market_data")?;
    market_data
        .get("price_change_percentage_24h_in_currency")
        .and_then(|v| v.get("usd"))
        .and_then(Value::as_f64)
        .or_else(|| {
            market_data
                .get("price_change_percentage_24h")
                .and_then(Value::as_f64)
        })
}
