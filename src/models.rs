use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One token's USD price snapshot as CoinGecko reports it. Optional fields are
/// omitted from the JSON when the provider did not include them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_24h_change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_24h_vol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<i64>,
}

impl PriceEntry {
    /// Placeholder served when the provider answers 200 without the requested
    /// coin id (native-price path).
    pub fn zero() -> Self {
        Self {
            usd: 0.0,
            usd_24h_change: None,
            usd_market_cap: None,
            usd_24h_vol: None,
            last_updated_at: None,
        }
    }
}

/// Merged batch response body: lowercased contract address -> price entry.
pub type PriceMap = HashMap<String, PriceEntry>;

/// Request body for `POST /api/prices/batch`. Both fields default so a short
/// body deserializes and is rejected by validation (400), not by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub contract_addresses: Vec<String>,
}

/// Live progress of the most recent batch for a platform. `start_at` is epoch
/// milliseconds; the wire name `startAt` is what dashboard clients poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub platform: String,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    #[serde(rename = "startAt")]
    pub start_at: i64,
    pub running: bool,
}

impl BatchProgress {
    /// All-zero, not-running shape returned when no batch has been recorded.
    pub fn idle(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            total: 0,
            processed: 0,
            success: 0,
            start_at: 0,
            running: false,
        }
    }

    pub fn started(platform: &str, total: usize) -> Self {
        Self {
            platform: platform.to_string(),
            total,
            processed: 0,
            success: 0,
            start_at: chrono::Utc::now().timestamp_millis(),
            running: true,
        }
    }
}

/// Response body for `GET /api/token-detail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDetail {
    pub price: Option<f64>,
    pub change: Option<f64>,
    pub logo: Option<String>,
}
