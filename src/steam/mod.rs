//! Steam integration: Web API ban lookups, community inventories, and
//! market prices.
//!
//! All three endpoint families are reached through the `HttpGet` seam and
//! paced by a shared `RateGate` per family. Failures never escape as
//! errors; each client degrades to `None` or a sentinel string.

pub mod http;
pub mod inventory;
pub mod pacing;
pub mod price;
pub mod resolver;

use std::sync::Arc;
use std::time::Duration;

use crate::config::SteamConfig;
use pacing::{jitter, rate_limit_backoff, RateGate};

pub use http::{HttpGet, ReqwestHttp};
pub use inventory::{InventoryFetcher, InventorySource};
pub use price::{PriceCache, PriceLookup};
pub use resolver::{BanResolver, ProfileLookup};

/// Steam's `success` flag: `true` or the number 1. Any other value,
/// including other integers, counts as failure.
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

/// Timeouts, attempt limits, and fixed delays for every Steam call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub web_api_timeout: Duration,
    pub inventory_timeout: Duration,
    pub price_timeout: Duration,
    pub inventory_max_attempts: u32,
    pub network_retry_delay: Duration,
    pub server_error_delay: Duration,
    /// Base of the 429 backoff. Zero disables the backoff entirely.
    pub backoff_base_secs: f64,
    pub price_blocked_delay: Duration,
    pub price_error_delay: Duration,
    /// 0 = retry blocked price lookups forever.
    pub price_max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            web_api_timeout: Duration::from_secs(10),
            inventory_timeout: Duration::from_secs(15),
            price_timeout: Duration::from_secs(30),
            inventory_max_attempts: 10,
            network_retry_delay: Duration::from_secs(2),
            server_error_delay: Duration::from_secs(5),
            backoff_base_secs: 1.5,
            price_blocked_delay: Duration::from_secs(30),
            price_error_delay: Duration::from_secs(10),
            price_max_attempts: 20,
        }
    }
}

impl RetryPolicy {
    /// Same attempt limits as the default, with every delay removed.
    pub fn immediate() -> Self {
        Self {
            network_retry_delay: Duration::ZERO,
            server_error_delay: Duration::ZERO,
            backoff_base_secs: 0.0,
            price_blocked_delay: Duration::ZERO,
            price_error_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn from_config(cfg: &SteamConfig) -> Self {
        Self {
            price_max_attempts: cfg.price_max_attempts,
            ..Self::default()
        }
    }

    /// Delay after an HTTP 429 on the zero-based `attempt`.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        if self.backoff_base_secs <= 0.0 {
            return Duration::ZERO;
        }
        rate_limit_backoff(self.backoff_base_secs, attempt, jitter())
    }
}

/// One gate per endpoint family, shared by every client that calls it.
#[derive(Clone)]
pub struct SteamGates {
    pub web_api: Arc<RateGate>,
    pub inventory: Arc<RateGate>,
    pub market: Arc<RateGate>,
}

impl SteamGates {
    pub fn from_config(cfg: &SteamConfig) -> Self {
        let interval = Duration::from_millis(cfg.min_request_interval_ms);
        Self {
            web_api: Arc::new(RateGate::new("web_api", interval)),
            inventory: Arc::new(RateGate::new("inventory", interval)),
            market: Arc::new(RateGate::new("market", interval)),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            web_api: Arc::new(RateGate::unlimited("web_api")),
            inventory: Arc::new(RateGate::unlimited("inventory")),
            market: Arc::new(RateGate::unlimited("market")),
        }
    }
}
