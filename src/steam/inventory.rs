//! CS2 inventory fetching, aggregation, and caching.
//!
//! Endpoint: `GET <community>/inventory/<steamid>/<appid>/<contextid>`
//! Response: `{ "success": 1, "assets": [...], "descriptions": [...] }`
//!
//! The community inventory endpoint is aggressively rate limited, so each
//! fetch retries up to `inventory_max_attempts` times with pacing between
//! attempts and exponential backoff on 429. Every outcome, including the
//! failure sentinels, is rendered as text and persisted in the inventory
//! cache so downstream valuation and reporting never see an error.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::http::{HttpGet, HttpRequest, HttpResponse, COMMUNITY_REFERER};
use super::pacing::RateGate;
use super::price::PriceLookup;
use super::{is_truthy, RetryPolicy};
use crate::storage::CacheBackend;
use crate::types::{sentinel, AggregatedItem, FetchError, InventoryCacheEntry, Timestamped};

/// Inventory text for one account, as seen by the scan orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn get_summary(
        &self,
        steam_id: &str,
        app_id: u32,
        context_id: u32,
        use_cache: bool,
    ) -> String;
}

/// First line of every rendered inventory.
pub const ITEMS_HEADER: &str = "Items:";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawAsset {
    #[serde(default)]
    classid: Value,
    #[serde(default)]
    instanceid: Value,
}

#[derive(Debug, Deserialize)]
struct RawDescription {
    #[serde(default)]
    classid: Value,
    #[serde(default)]
    instanceid: Value,
    #[serde(default)]
    market_name: Option<String>,
    #[serde(default)]
    market_hash_name: Option<String>,
    #[serde(default)]
    tradable: Value,
    #[serde(default)]
    marketable: Value,
}

/// Ids arrive as strings or numbers depending on the endpoint revision.
fn id_string(value: &Value, default: &str) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => default.to_string(),
    }
}

fn flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Count assets per `(classid, instanceid)`.
fn count_assets(assets: &[Value]) -> HashMap<(String, String), u32> {
    let mut counts = HashMap::new();
    for raw in assets {
        let Ok(asset) = RawAsset::deserialize(raw) else {
            continue;
        };
        let key = (id_string(&asset.classid, ""), id_string(&asset.instanceid, "0"));
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

/// Merge descriptions by `market_hash_name`, attaching asset counts.
/// Prices are left empty; a description without matching assets counts
/// once. Order follows the first occurrence of each item.
pub fn merge_descriptions(assets: &[Value], descriptions: &[Value]) -> Vec<AggregatedItem> {
    let counts = count_assets(assets);
    let mut items: Vec<AggregatedItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for raw in descriptions {
        let Ok(desc) = RawDescription::deserialize(raw) else {
            continue;
        };
        let name = desc.market_name.unwrap_or_else(|| "Unknown".to_string());
        let market_hash_name = desc.market_hash_name.unwrap_or_else(|| name.clone());
        let key = (id_string(&desc.classid, ""), id_string(&desc.instanceid, "0"));
        let count = counts.get(&key).copied().unwrap_or(1);
        let tradable = flag(&desc.tradable);
        let marketable = flag(&desc.marketable);

        match index.get(&market_hash_name) {
            Some(&i) => {
                let existing = &mut items[i];
                existing.count += count;
                existing.tradable |= tradable;
                existing.marketable |= marketable;
            }
            None => {
                index.insert(market_hash_name.clone(), items.len());
                items.push(AggregatedItem {
                    name,
                    market_hash_name,
                    count,
                    price: String::new(),
                    tradable,
                    marketable,
                });
            }
        }
    }

    items
}

/// Render aggregated items as the cached inventory text.
pub fn render_items(items: &[AggregatedItem]) -> String {
    let lines: Vec<String> = items.iter().map(|i| i.to_string()).collect();
    format!("{ITEMS_HEADER}\n{}", lines.join("\n"))
}

/// What to do after one fetch attempt.
enum Attempt {
    /// Terminal text (rendered inventory or sentinel).
    Done(String),
    /// Parsed payload that still needs pricing.
    Items(Vec<AggregatedItem>),
    /// Try again after the given delay.
    Retry(std::time::Duration),
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct InventoryFetcher {
    http: Arc<dyn HttpGet>,
    gate: Arc<RateGate>,
    prices: Arc<dyn PriceLookup>,
    store: Arc<dyn CacheBackend<InventoryCacheEntry>>,
    community_base: String,
    ttl_secs: i64,
    policy: RetryPolicy,
}

impl InventoryFetcher {
    pub fn new(
        http: Arc<dyn HttpGet>,
        gate: Arc<RateGate>,
        prices: Arc<dyn PriceLookup>,
        store: Arc<dyn CacheBackend<InventoryCacheEntry>>,
        community_base: &str,
        ttl_secs: i64,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            gate,
            prices,
            store,
            community_base: community_base.trim_end_matches('/').to_string(),
            ttl_secs,
            policy,
        }
    }

    /// Cached summary when `use_cache` is set and the entry is fresh;
    /// otherwise a live fetch whose result (sentinels included) is
    /// persisted.
    pub async fn get_summary(
        &self,
        steam_id: &str,
        app_id: u32,
        context_id: u32,
        use_cache: bool,
    ) -> String {
        self.get_summary_at(steam_id, app_id, context_id, use_cache, Utc::now().timestamp())
            .await
    }

    /// `get_summary` against an explicit clock.
    pub async fn get_summary_at(
        &self,
        steam_id: &str,
        app_id: u32,
        context_id: u32,
        use_cache: bool,
        now: i64,
    ) -> String {
        if use_cache {
            match self.store.get(steam_id).await {
                Ok(Some(entry)) if !entry.is_stale(now, self.ttl_secs) => {
                    info!(steam_id, "Returning cached inventory");
                    return entry.inventory;
                }
                Ok(_) => {}
                Err(e) => warn!(steam_id, error = %e, "Inventory cache read failed, fetching live"),
            }
        }

        let inventory = self.fetch(steam_id, app_id, context_id).await;
        info!(steam_id, "Returning inventory from Steam");
        // Stamped after the fetch; retries can take minutes.
        self.persist(steam_id, &inventory, Utc::now().timestamp()).await;
        inventory
    }

    /// Re-fetch every inventory currently cached. Returns how many
    /// entries were rewritten.
    pub async fn refresh_all(&self, app_id: u32, context_id: u32) -> usize {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Could not list inventory cache keys");
                return 0;
            }
        };
        info!(count = keys.len(), "Refreshing all cached inventories");

        for steam_id in &keys {
            let inventory = self.fetch(steam_id, app_id, context_id).await;
            self.persist(steam_id, &inventory, Utc::now().timestamp()).await;
        }
        keys.len()
    }

    async fn persist(&self, steam_id: &str, inventory: &str, now: i64) {
        let entry = InventoryCacheEntry {
            inventory: inventory.to_string(),
            last_updated: now,
        };
        if let Err(e) = self.store.put(steam_id, entry).await {
            warn!(steam_id, error = %e, "Failed to persist inventory");
        }
    }

    /// Live fetch with retries. Always returns text: the rendered
    /// inventory or a sentinel.
    pub async fn fetch(&self, steam_id: &str, app_id: u32, context_id: u32) -> String {
        match self.fetch_live(steam_id, app_id, context_id).await {
            Ok(text) => text,
            Err(e) => {
                error!(steam_id, error = %e, "Inventory fetch gave up");
                let text = match e {
                    FetchError::RateLimited { .. } => sentinel::INVENTORY_RATE_LIMITED,
                    _ => sentinel::INVENTORY_UNAVAILABLE,
                };
                text.to_string()
            }
        }
    }

    /// Retry loop behind `fetch`. Terminal responses (sentinels included)
    /// come back as `Ok`; running out of attempts is `RateLimited`.
    pub async fn fetch_live(
        &self,
        steam_id: &str,
        app_id: u32,
        context_id: u32,
    ) -> Result<String, FetchError> {
        let url = format!("{}/inventory/{steam_id}/{app_id}/{context_id}", self.community_base);
        let request =
            HttpRequest::new(&url, self.policy.inventory_timeout).referer(COMMUNITY_REFERER);
        let max_attempts = self.policy.inventory_max_attempts;

        for attempt in 0..max_attempts {
            self.gate.wait().await;

            let outcome = match self.http.send(request.clone()).await {
                Ok(resp) => self.classify(steam_id, attempt, resp),
                Err(e) => {
                    warn!(steam_id, attempt = attempt + 1, error = %e, "Inventory request failed");
                    Attempt::Retry(self.policy.network_retry_delay)
                }
            };

            match outcome {
                Attempt::Done(text) => return Ok(text),
                Attempt::Items(items) => return Ok(self.price_and_render(items).await),
                Attempt::Retry(delay) => tokio::time::sleep(delay).await,
            }
        }

        warn!(steam_id, attempts = max_attempts, "Exhausted inventory retries");
        Err(FetchError::RateLimited { endpoint: url })
    }

    fn classify(&self, steam_id: &str, attempt: u32, resp: HttpResponse) -> Attempt {
        if resp.status == 429 {
            let backoff = self.policy.rate_limit_delay(attempt);
            warn!(
                steam_id,
                attempt = attempt + 1,
                backoff_secs = backoff.as_secs_f64(),
                "Received 429 for inventory, backing off"
            );
            return Attempt::Retry(backoff);
        }

        if !resp.is_ok() {
            warn!(steam_id, status = resp.status, "Inventory request returned non-200");
            return Attempt::Retry(self.policy.server_error_delay);
        }

        Attempt::from_body(steam_id, &resp.body)
    }

    async fn price_and_render(&self, mut items: Vec<AggregatedItem>) -> String {
        for item in items.iter_mut() {
            let price = self.prices.price_of(&item.market_hash_name).await;
            if !price.is_empty() {
                item.price = price;
            }
        }
        render_items(&items)
    }
}

impl Attempt {
    /// Interpret a 200 body.
    fn from_body(steam_id: &str, body: &str) -> Attempt {
        if body.is_empty() {
            debug!(steam_id, "Empty inventory response");
            return Attempt::Done(sentinel::INVENTORY_UNAVAILABLE.to_string());
        }

        let data: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => {
                warn!(steam_id, "Inventory JSON decode failed");
                return Attempt::Done(sentinel::INVENTORY_PRIVATE_OR_RATE_LIMITED.to_string());
            }
        };

        let Some(obj) = data.as_object() else {
            debug!(steam_id, "Inventory response is not an object");
            return Attempt::Done(sentinel::INVENTORY_UNAVAILABLE.to_string());
        };

        if !obj.get("success").is_some_and(is_truthy) {
            debug!(steam_id, "Inventory success flag != 1");
            return Attempt::Done(sentinel::INVENTORY_PRIVATE_OR_UNAVAILABLE.to_string());
        }

        let descriptions: Vec<Value> = match obj.get("descriptions") {
            Some(Value::Array(list)) => list.clone(),
            Some(Value::Object(map)) => map.values().cloned().collect(),
            _ => Vec::new(),
        };
        if descriptions.is_empty() {
            debug!(steam_id, "No descriptions found in inventory");
            return Attempt::Done(sentinel::NO_ITEMS_FOUND.to_string());
        }

        let assets: Vec<Value> = match obj.get("assets") {
            Some(Value::Array(list)) => list.clone(),
            _ => Vec::new(),
        };

        Attempt::Items(merge_descriptions(&assets, &descriptions))
    }
}

#[async_trait]
impl InventorySource for InventoryFetcher {
    async fn get_summary(
        &self,
        steam_id: &str,
        app_id: u32,
        context_id: u32,
        use_cache: bool,
    ) -> String {
        InventoryFetcher::get_summary(self, steam_id, app_id, context_id, use_cache).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
