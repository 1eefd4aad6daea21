use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub coingecko: CoinGeckoConfig,
    #[serde(default)]
    pub prices: PricesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port; the PORT environment variable takes precedence.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinGeckoConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Optional API key; environment variables win (see `resolve_api_key`).
    pub api_key: Option<String>,
    /// Coin id used by the native-price endpoint.
    #[serde(default = "default_native_coin_id")]
    pub native_coin_id: String,
    /// Per-request timeout for upstream calls.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Minimum gap between upstream request starts, shared across workers.
    #[serde(default = "default_min_request_gap_ms")]
    pub min_request_gap_ms: u64,
}

/// Cache and batch tuning for the price endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricesConfig {
    /// TTL for per-token batch cache records.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// TTL for the native-price slot.
    #[serde(default = "default_cache_ttl_ms")]
    pub native_cache_ttl_ms: u64,
    /// Worker count for batch resolution.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_port() -> u16 {
    3000
}
fn default_api_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_native_coin_id() -> String {
    "ethereum".to_string()
}
fn default_request_timeout_ms() -> u64 {
    7_000
}
fn default_min_request_gap_ms() -> u64 {
    150
}
fn default_cache_ttl_ms() -> u64 {
    60_000
}
fn default_batch_concurrency() -> usize {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            native_coin_id: default_native_coin_id(),
            request_timeout_ms: default_request_timeout_ms(),
            min_request_gap_ms: default_min_request_gap_ms(),
        }
    }
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            native_cache_ttl_ms: default_cache_ttl_ms(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            coingecko: CoinGeckoConfig::default(),
            prices: PricesConfig::default(),
        }
    }
}

/// Environment variables checked for the CoinGecko key, in order.
const API_KEY_ENV_VARS: [&str; 4] = ["COINGECKO_API_KEY", "COINGECKO_API", "CG_API_KEY", "CG_KEY"];

impl Config {
    pub fn load(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            let config = Config::default();
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(path, content)?;
            Ok(config)
        }
    }

    /// First non-empty API key among the well-known environment variables,
    /// falling back to the config file. Absence degrades to unauthenticated
    /// (rate-limited) upstream access.
    pub fn resolve_api_key(&self) -> Option<String> {
        first_non_empty(
            API_KEY_ENV_VARS
                .iter()
                .map(|name| std::env::var(name).ok())
                .chain(std::iter::once(self.coingecko.api_key.clone())),
        )
    }

    /// Listen port, honoring the PORT environment variable like the dashboard
    /// deployments expect.
    pub fn listen_port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.server.port)
    }
}

fn first_non_empty(candidates: impl Iterator<Item = Option<String>>) -> Option<String> {
    candidates
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
