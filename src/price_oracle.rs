//! USD price feed for bridged tokens.
//!
//! The batch requester needs a rough dollar value for pooled withdrawal
//! fees. Prices come from a CoinGecko-compatible endpoint and are cached
//! in memory for a short TTL; stale-ish data is fine, the threshold is an
//! economic dampener and not an accounting surface.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ethers::types::Address;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// USD quote per foreign token contract address.
#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
    /// Spot USD price of one whole token.
    async fn usd_price(&self, token: Address) -> Result<f64>;
}

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(90);

/// A price feed backed by the CoinGecko token price endpoint.
pub struct CoinGeckoPriceFeed {
    host: String,
    client: reqwest::Client,
    cache_ttl: Duration,
    cache: Mutex<HashMap<Address, (Instant, f64)>>,
}

#[derive(Debug, Clone, serde::Serialize, Deserialize)]
struct TokenPriceResponse {
    usd: Option<f64>,
}

impl CoinGeckoPriceFeed {
    /// Creates a feed against `host`, e.g.
    /// `https://api.coingecko.com/api/v3`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client: reqwest::Client::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn fetch(&self, token: Address) -> Result<f64> {
        let url = format!(
            "{}/simple/token_price/ethereum?contract_addresses={:?}&vs_currencies=usd",
            self.host, token,
        );
        let response: HashMap<String, TokenPriceResponse> =
            self.client.get(&url).send().await?.json().await?;
        response
            .get(&format!("{token:?}"))
            .and_then(|price| price.usd)
            .ok_or(Error::PriceNotListed(token))
    }
}

#[async_trait::async_trait]
impl PriceFeed for CoinGeckoPriceFeed {
    async fn usd_price(&self, token: Address) -> Result<f64> {
        {
            let cache = self.cache.lock().await;
            if let Some((fetched_at, price)) = cache.get(&token) {
                if fetched_at.elapsed() < self.cache_ttl {
                    return Ok(*price);
                }
            }
        }
        let price = self.fetch(token).await?;
        self.cache
            .lock()
            .await
            .insert(token, (Instant::now(), price));
        Ok(price)
    }
}
