//! Shared types for the BANWATCH pipeline.
//!
//! These types form the data model used across all modules: profile
//! references parsed from chat, resolved identities, ban status, cache
//! entries, aggregated inventory items, and the per-scan grouping
//! containers handed to the reporting engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default group tag for links posted without a trailing tag.
pub const UNGROUPED: &str = "UNGROUPED";

// ---------------------------------------------------------------------------
// Sentinels
// ---------------------------------------------------------------------------

/// Fixed diagnostic strings returned in place of a value when retrieval
/// fails in a known way. They flow through valuation (as 0.0) and into
/// the reports unchanged.
pub mod sentinel {
    pub const REQUEST_RESTRICTED: &str = "Request Restricted";
    pub const INVALID_JSON: &str = "Invalid JSON";
    pub const NOT_LISTED: &str = "Not Listed";

    pub const INVENTORY_UNAVAILABLE: &str = "Inventory unavailable";
    pub const INVENTORY_PRIVATE_OR_RATE_LIMITED: &str = "Inventory private or rate-limited";
    pub const INVENTORY_PRIVATE_OR_UNAVAILABLE: &str = "Inventory private or unavailable";
    pub const NO_ITEMS_FOUND: &str = "No items found";
    pub const INVENTORY_RATE_LIMITED: &str = "Inventory rate-limited";

    /// Cached price values that never count as a usable price, compared
    /// case-insensitively.
    pub const NON_PRICE: &[&str] = &["n/a", "not listed"];

    /// Whether a cached price string is a known non-price marker.
    pub fn is_non_price(value: &str) -> bool {
        let lower = value.to_lowercase();
        NON_PRICE.iter().any(|s| *s == lower)
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// The two URL shapes a Steam community profile can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileKind {
    /// `/profiles/<steamid64>`
    NumericId,
    /// `/id/<vanity>`
    VanityName,
}

impl ProfileKind {
    /// The URL path segment for this kind.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ProfileKind::NumericId => "profiles",
            ProfileKind::VanityName => "id",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "profiles" => Some(ProfileKind::NumericId),
            "id" => Some(ProfileKind::VanityName),
            _ => None,
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

/// A profile link as found in free text. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileReference {
    pub kind: ProfileKind,
    pub token: String,
    pub raw_link: String,
}

impl ProfileReference {
    /// Build a reference with the canonical `https://steamcommunity.com/...`
    /// link (no trailing slash).
    pub fn new(kind: ProfileKind, token: &str) -> Self {
        Self {
            kind,
            token: token.to_string(),
            raw_link: format!("https://steamcommunity.com/{}/{}", kind.path_segment(), token),
        }
    }
}

/// A profile link mapped to its 64-bit numeric identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProfile {
    pub canonical_id: String,
    pub original_reference: String,
}

// ---------------------------------------------------------------------------
// Ban status
// ---------------------------------------------------------------------------

/// Ban flags for one account, as returned by `GetPlayerBans`. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BanStatus {
    #[serde(rename = "VACBanned", default)]
    pub vac_banned: bool,
    #[serde(rename = "CommunityBanned", default)]
    pub community_banned: bool,
    #[serde(rename = "NumberOfGameBans", default)]
    pub game_ban_count: u32,
}

impl BanStatus {
    /// Every bucket this account belongs to. The flags are independent, so
    /// a VAC- and game-banned account lands in both buckets; `Clean` only
    /// appears when no flag is set.
    pub fn buckets(&self) -> Vec<Bucket> {
        let mut out = Vec::new();
        if self.vac_banned {
            out.push(Bucket::Vac);
        }
        if self.community_banned {
            out.push(Bucket::Community);
        }
        if self.game_ban_count > 0 {
            out.push(Bucket::Game);
        }
        if out.is_empty() {
            out.push(Bucket::Clean);
        }
        out
    }

    /// Highest-priority bucket (`vac > community > game > clean`).
    pub fn primary_bucket(&self) -> Bucket {
        self.buckets()[0]
    }
}

/// Report classification buckets, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Vac,
    Community,
    Game,
    Clean,
    Invalid,
}

impl Bucket {
    pub const ALL: &'static [Bucket] = &[
        Bucket::Vac,
        Bucket::Community,
        Bucket::Game,
        Bucket::Clean,
        Bucket::Invalid,
    ];

    /// Embed title used when reporting this bucket.
    pub fn title(&self) -> &'static str {
        match self {
            Bucket::Vac => "VAC Banned Accounts",
            Bucket::Community => "Community Banned Accounts",
            Bucket::Game => "Game Banned Accounts",
            Bucket::Clean => "Not Banned Accounts",
            Bucket::Invalid => "Invalid Accounts",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Vac => write!(f, "vac"),
            Bucket::Community => write!(f, "community"),
            Bucket::Game => write!(f, "game"),
            Bucket::Clean => write!(f, "clean"),
            Bucket::Invalid => write!(f, "invalid"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

/// Anything stored with a unix `last_updated` stamp.
pub trait Timestamped {
    fn last_updated(&self) -> i64;

    /// `now - last_updated >= ttl`.
    fn is_stale(&self, now: i64, ttl_secs: i64) -> bool {
        now - self.last_updated() >= ttl_secs
    }
}

/// Persisted market price, keyed by exact `market_hash_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCacheEntry {
    pub price: String,
    pub last_updated: i64,
}

impl Timestamped for PriceCacheEntry {
    fn last_updated(&self) -> i64 {
        self.last_updated
    }
}

/// Persisted inventory summary text, keyed by canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCacheEntry {
    pub inventory: String,
    pub last_updated: i64,
}

impl Timestamped for InventoryCacheEntry {
    fn last_updated(&self) -> i64 {
        self.last_updated
    }
}

// ---------------------------------------------------------------------------
// Inventory items
// ---------------------------------------------------------------------------

/// One line of an inventory summary, merged by `market_hash_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedItem {
    pub name: String,
    pub market_hash_name: String,
    pub count: u32,
    pub price: String,
    pub tradable: bool,
    pub marketable: bool,
}

impl fmt::Display for AggregatedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count > 1 {
            write!(f, "{} x{} - {}", self.name, self.count, self.price)
        } else {
            write!(f, "{} - {}", self.name, self.price)
        }
    }
}

// ---------------------------------------------------------------------------
// Per-scan grouping
// ---------------------------------------------------------------------------

/// Formatted account blocks keyed by group tag, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedAccounts {
    groups: Vec<(String, Vec<String>)>,
}

impl GroupedAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, group: &str, block: String) {
        match self.groups.iter_mut().find(|(g, _)| g == group) {
            Some((_, blocks)) => blocks.push(block),
            None => self.groups.push((group.to_string(), vec![block])),
        }
    }

    pub fn get(&self, group: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(g, _)| g == group)
            .map(|(_, blocks)| blocks.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups.iter().map(|(g, b)| (g.as_str(), b.as_slice()))
    }

    /// Number of distinct groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total blocks across all groups.
    pub fn account_count(&self) -> usize {
        self.groups.iter().map(|(_, b)| b.len()).sum()
    }
}

/// Accumulated inventory value per group tag, in first-seen order.
/// Serializes as a JSON object in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTotals {
    entries: Vec<(String, f64)>,
}

impl GroupTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, group: &str, value: f64) {
        match self.entries.iter_mut().find(|(g, _)| g == group) {
            Some((_, total)) => *total += value,
            None => self.entries.push((group.to_string(), value)),
        }
    }

    pub fn get(&self, group: &str) -> Option<f64> {
        self.entries.iter().find(|(g, _)| g == group).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(g, v)| (g.as_str(), *v))
    }

    /// Sum over every group.
    pub fn grand_total(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for GroupTotals {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure taxonomy for Steam lookups. None of these abort a scan; callers
/// turn them into sentinels or report lines.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error ({endpoint}): {message}")]
    Network { endpoint: String, message: String },

    #[error("Rate limited by {endpoint}")]
    RateLimited { endpoint: String },

    #[error("Malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("Could not resolve profile link: {0}")]
    ResolutionFailure(String),

    #[error("No ban data returned for {0}")]
    UnretrievableProfile(String),
}

/// Errors raised by a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error ({location}): {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage serialisation error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
