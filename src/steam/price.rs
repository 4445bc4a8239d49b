//! Community market price cache.
//!
//! Prices come from `/market/priceoverview/` and are persisted per
//! `market_hash_name` with their own TTL (a multiple of the base refresh
//! interval). Failed lookups are stored too, as sentinel strings, so a
//! broken item is not re-queried on every inventory line until its entry
//! goes stale. The exception is "not listed": those entries are always
//! re-queried.
//!
//! Endpoint: `GET <community>/market/priceoverview/?currency=1&appid=730&market_hash_name=<name>`
//! Response: `{ "success": true, "lowest_price": "$1.23", ... }`

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::http::{HttpGet, HttpRequest, MARKET_REFERER};
use super::pacing::RateGate;
use super::{is_truthy, RetryPolicy};
use crate::storage::CacheBackend;
use crate::types::{sentinel, PriceCacheEntry, Timestamped};

/// Anything that can price a market item. The inventory fetcher only
/// needs this much of the price cache.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    /// Price string for one item: either a market price such as `"$1.23"`
    /// or a sentinel.
    async fn price_of(&self, market_hash_name: &str) -> String;
}

/// Persisted, TTL-bound cache in front of the price overview endpoint.
pub struct PriceCache {
    store: Arc<dyn CacheBackend<PriceCacheEntry>>,
    http: Arc<dyn HttpGet>,
    gate: Arc<RateGate>,
    url: String,
    currency: u32,
    app_id: u32,
    ttl_secs: i64,
    policy: RetryPolicy,
}

impl PriceCache {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CacheBackend<PriceCacheEntry>>,
        http: Arc<dyn HttpGet>,
        gate: Arc<RateGate>,
        community_base: &str,
        currency: u32,
        app_id: u32,
        ttl_secs: i64,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            http,
            gate,
            url: format!("{}/market/priceoverview/", community_base.trim_end_matches('/')),
            currency,
            app_id,
            ttl_secs,
            policy,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Cached price if fresh and usable, otherwise a live lookup.
    pub async fn get_price(&self, market_hash_name: &str) -> String {
        self.get_price_at(market_hash_name, Utc::now().timestamp()).await
    }

    /// `get_price` against an explicit clock.
    pub async fn get_price_at(&self, market_hash_name: &str, now: i64) -> String {
        let entry = match self.store.get(market_hash_name).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(item = market_hash_name, error = %e, "Price cache read failed, treating as miss");
                None
            }
        };

        match entry {
            Some(entry) if !entry.is_stale(now, self.ttl_secs) => {
                if entry.price.is_empty() || sentinel::is_non_price(&entry.price) {
                    debug!(item = market_hash_name, cached = %entry.price, "Cached price is not a price, refetching");
                    self.refresh(market_hash_name).await
                } else {
                    info!(item = market_hash_name, price = %entry.price, "Found price from cache");
                    entry.price
                }
            }
            _ => self.refresh(market_hash_name).await,
        }
    }

    /// Re-query every item currently in the cache. Returns how many
    /// entries were rewritten.
    pub async fn refresh_all(&self) -> usize {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Could not list price cache keys");
                return 0;
            }
        };
        info!(count = keys.len(), "Refreshing all cached prices");

        let mut refreshed = 0;
        for key in &keys {
            self.refresh(key).await;
            refreshed += 1;
        }
        refreshed
    }

    /// Live lookup, stamped once the query returns.
    async fn refresh(&self, market_hash_name: &str) -> String {
        let price = self.query_price(market_hash_name).await;
        let entry = PriceCacheEntry {
            price: price.clone(),
            last_updated: Utc::now().timestamp(),
        };
        if let Err(e) = self.store.put(market_hash_name, entry).await {
            warn!(item = market_hash_name, error = %e, "Failed to persist price");
        }
        price
    }

    /// One live lookup. Always yields a string: the market price or a
    /// sentinel. Non-200 answers are retried after a fixed delay, up to
    /// `policy.price_max_attempts` (0 = no cap).
    pub async fn query_price(&self, market_hash_name: &str) -> String {
        let request = HttpRequest::new(&self.url, self.policy.price_timeout)
            .query("currency", self.currency)
            .query("appid", self.app_id)
            .query("market_hash_name", market_hash_name)
            .referer(MARKET_REFERER);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.gate.wait().await;
            debug!(item = market_hash_name, attempt, "Querying market");

            let resp = match self.http.send(request.clone()).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(item = market_hash_name, error = %e, "Error fetching market data");
                    tokio::time::sleep(self.policy.price_error_delay).await;
                    return sentinel::REQUEST_RESTRICTED.to_string();
                }
            };

            if !resp.is_ok() {
                let cap = self.policy.price_max_attempts;
                if cap > 0 && attempt >= cap {
                    error!(item = market_hash_name, status = resp.status, attempts = attempt, "Market still blocked, giving up");
                    return sentinel::REQUEST_RESTRICTED.to_string();
                }
                warn!(
                    item = market_hash_name,
                    status = resp.status,
                    delay_secs = self.policy.price_blocked_delay.as_secs(),
                    "Market request blocked, retrying"
                );
                tokio::time::sleep(self.policy.price_blocked_delay).await;
                continue;
            }

            let data: serde_json::Value = match serde_json::from_str(&resp.body) {
                Ok(v) => v,
                Err(e) => {
                    warn!(item = market_hash_name, error = %e, "Invalid JSON returned by market");
                    tokio::time::sleep(self.policy.price_error_delay).await;
                    return sentinel::INVALID_JSON.to_string();
                }
            };

            let lowest = data
                .get("lowest_price")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty());

            return match lowest {
                Some(price) if data.get("success").is_some_and(is_truthy) => {
                    info!(item = market_hash_name, price, "Found price from steam");
                    price.to_string()
                }
                _ => {
                    info!(item = market_hash_name, "Item not listed");
                    sentinel::NOT_LISTED.to_string()
                }
            };
        }
    }
}

#[async_trait]
impl PriceLookup for PriceCache {
    async fn price_of(&self, market_hash_name: &str) -> String {
        self.get_price(market_hash_name).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
